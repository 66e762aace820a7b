//! Tests for configuration loading.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use gitlab_oauth::auth::AuthError;
use gitlab_oauth::config::{GitLabConfig, DEFAULT_BASE_URL};
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 6] = [
    "GITLAB_BASE_URL",
    "GITLAB_CLIENT_ID",
    "GITLAB_REDIRECT_URI",
    "GITLAB_SCOPES",
    "GITLAB_REQUEST_TIMEOUT_SECS",
    "GITLAB_REFRESH_BUFFER_SECS",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        for key in keys {
            std::env::remove_var(key);
        }
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[test]
fn from_env_reads_gitlab_variables() {
    let _lock = env_lock_guard();
    let _env = EnvGuard::capture(&CONFIG_ENV_VARS);
    std::env::set_var("GITLAB_CLIENT_ID", "env-client");
    std::env::set_var("GITLAB_REDIRECT_URI", "gitlabexplorer://auth/callback");
    std::env::set_var("GITLAB_SCOPES", "read_user api");
    std::env::set_var("GITLAB_REQUEST_TIMEOUT_SECS", "12");

    let config = GitLabConfig::from_env().expect("config");

    assert_eq!(config.oauth.client_id, "env-client");
    assert_eq!(config.oauth.scopes, vec!["read_user", "api"]);
    assert_eq!(config.request_timeout, Duration::from_secs(12));
    assert_eq!(config.base_url.as_str(), format!("{DEFAULT_BASE_URL}/"));
}

#[test]
fn from_env_without_client_id_is_configuration_error() {
    let _lock = env_lock_guard();
    let _env = EnvGuard::capture(&CONFIG_ENV_VARS);
    std::env::set_var("GITLAB_REDIRECT_URI", "gitlabexplorer://auth/callback");

    assert!(matches!(
        GitLabConfig::from_env(),
        Err(AuthError::Configuration(_))
    ));
}

#[test]
fn from_toml_file_reads_all_keys() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("gitlab.toml");
    std::fs::write(
        &path,
        r#"
        base_url = "https://gitlab.example.com"
        client_id = "file-client"
        redirect_uri = "gitlabexplorer://auth/callback"
        scopes = ["read_user", "read_api"]
        refresh_buffer_secs = 120
        "#,
    )
    .expect("write config");

    let config = GitLabConfig::from_toml_file(&path).expect("config");

    assert_eq!(config.oauth.client_id, "file-client");
    assert_eq!(config.refresh_buffer, Duration::from_secs(120));
    assert_eq!(
        config.revoke_url().expect("revoke").as_str(),
        "https://gitlab.example.com/oauth/revoke"
    );
}

#[test]
fn missing_toml_file_is_io_error() {
    let dir = TempDir::new().expect("tempdir");
    let result = GitLabConfig::from_toml_file(dir.path().join("absent.toml"));
    assert!(matches!(result, Err(AuthError::Io(_))));
}

#[test]
fn malformed_toml_is_serialization_error() {
    let result = GitLabConfig::from_toml_str("client_id = ");
    assert!(matches!(result, Err(AuthError::Serialization(_))));
}

#[test]
fn endpoints_keep_base_url_path_prefix() {
    for base in ["https://host.example/gitlab", "https://host.example/gitlab/"] {
        let config = GitLabConfig::new("client", "app://cb")
            .with_base_url(base)
            .expect("base url");

        assert_eq!(
            config.token_url().expect("token").as_str(),
            "https://host.example/gitlab/oauth/token"
        );
        assert_eq!(
            config.graphql_url().expect("graphql").as_str(),
            "https://host.example/gitlab/api/graphql"
        );
        assert_eq!(
            config.rest_url("user").expect("rest").as_str(),
            "https://host.example/gitlab/api/v4/user"
        );
    }
}
