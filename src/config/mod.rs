//! Client configuration (layered: code > env > TOML file).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::auth::credential::DEFAULT_REFRESH_BUFFER;
use crate::auth::error::AuthError;
use crate::auth::pkce::{DEFAULT_STATE_BYTES, DEFAULT_VERIFIER_BYTES};

pub const DEFAULT_BASE_URL: &str = "https://gitlab.com";
pub const DEFAULT_SCOPES: &[&str] = &["read_user", "read_api", "read_repository"];
pub const DEFAULT_GRAPHQL_PATH: &str = "/api/graphql";
pub const DEFAULT_API_VERSION: &str = "v4";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth endpoint paths, relative to the instance base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthEndpoints {
    pub authorize: String,
    pub token: String,
    pub revoke: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            authorize: "/oauth/authorize".to_string(),
            token: "/oauth/token".to_string(),
            revoke: "/oauth/revoke".to_string(),
        }
    }
}

/// Application registration on the GitLab instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub endpoints: OAuthEndpoints,
}

impl OAuthConfig {
    /// Scopes as sent in the authorization request.
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }
}

/// Everything the auth core needs to talk to one GitLab instance.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use gitlab_oauth::config::GitLabConfig;
///
/// let config = GitLabConfig::new("my-client-id", "gitlabexplorer://auth/callback")
///     .with_base_url("https://gitlab.example.com")?
///     .with_request_timeout(Duration::from_secs(10));
/// assert_eq!(
///     config.token_url()?.as_str(),
///     "https://gitlab.example.com/oauth/token"
/// );
/// # Ok::<(), gitlab_oauth::auth::AuthError>(())
/// ```
#[derive(Debug, Clone)]
pub struct GitLabConfig {
    pub base_url: Url,
    pub oauth: OAuthConfig,
    pub graphql_path: String,
    pub api_version: String,
    /// Upper bound for every token-endpoint and user-info request.
    pub request_timeout: Duration,
    /// Credentials with less remaining lifetime than this are refreshed.
    pub refresh_buffer: Duration,
    pub verifier_bytes: usize,
    pub state_bytes: usize,
}

impl GitLabConfig {
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            base_url: default_base_url(),
            oauth: OAuthConfig {
                client_id: client_id.into(),
                redirect_uri: redirect_uri.into(),
                scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
                endpoints: OAuthEndpoints::default(),
            },
            graphql_path: DEFAULT_GRAPHQL_PATH.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            verifier_bytes: DEFAULT_VERIFIER_BYTES,
            state_bytes: DEFAULT_STATE_BYTES,
        }
    }

    /// Instance root. A path prefix is kept, so `https://host/gitlab` serves
    /// `https://host/gitlab/oauth/token`.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, AuthError> {
        self.base_url = Url::parse(base_url)?;
        Ok(self)
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.oauth.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.oauth.endpoints = endpoints;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    pub fn with_pkce_lengths(mut self, verifier_bytes: usize, state_bytes: usize) -> Self {
        self.verifier_bytes = verifier_bytes;
        self.state_bytes = state_bytes;
        self
    }

    pub fn authorize_url(&self) -> Result<Url, AuthError> {
        self.endpoint(&self.oauth.endpoints.authorize)
    }

    pub fn token_url(&self) -> Result<Url, AuthError> {
        self.endpoint(&self.oauth.endpoints.token)
    }

    pub fn revoke_url(&self) -> Result<Url, AuthError> {
        self.endpoint(&self.oauth.endpoints.revoke)
    }

    pub fn graphql_url(&self) -> Result<Url, AuthError> {
        self.endpoint(&self.graphql_path)
    }

    /// REST endpoint under `/api/{version}`, e.g. `rest_url("user")`.
    pub fn rest_url(&self, path: &str) -> Result<Url, AuthError> {
        self.endpoint(&format!(
            "/api/{}/{}",
            self.api_version,
            path.trim_start_matches('/')
        ))
    }

    fn endpoint(&self, path: &str) -> Result<Url, AuthError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let prefixed = format!("{}/", base.path());
            base.set_path(&prefixed);
        }
        Ok(base.join(path.trim_start_matches('/'))?)
    }

    /// Reject configurations that can never complete a sign-in.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.oauth.client_id.trim().is_empty() {
            return Err(AuthError::Configuration("client_id is empty".to_string()));
        }
        Url::parse(&self.oauth.redirect_uri).map_err(|err| {
            AuthError::Configuration(format!(
                "redirect_uri '{}' is not a URL: {err}",
                self.oauth.redirect_uri
            ))
        })?;
        if self.oauth.scopes.is_empty() {
            return Err(AuthError::Configuration("no scopes requested".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(AuthError::Configuration(
                "request_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from `GITLAB_*` environment variables (a `.env` file is honored).
    ///
    /// Required: `GITLAB_CLIENT_ID`, `GITLAB_REDIRECT_URI`. Optional:
    /// `GITLAB_BASE_URL`, `GITLAB_SCOPES`, `GITLAB_REQUEST_TIMEOUT_SECS`,
    /// `GITLAB_REFRESH_BUFFER_SECS`.
    pub fn from_env() -> Result<Self, AuthError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = RawConfig {
            base_url: lookup("GITLAB_BASE_URL"),
            client_id: lookup("GITLAB_CLIENT_ID"),
            redirect_uri: lookup("GITLAB_REDIRECT_URI"),
            scopes: lookup("GITLAB_SCOPES").map(|value| split_scopes(&value)),
            request_timeout_secs: parse_secs(&lookup, "GITLAB_REQUEST_TIMEOUT_SECS")?,
            refresh_buffer_secs: parse_secs(&lookup, "GITLAB_REFRESH_BUFFER_SECS")?,
        };
        raw.into_config()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, AuthError> {
        let raw: RawConfig = toml::from_str(raw)?;
        raw.into_config()
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    base_url: Option<String>,
    client_id: Option<String>,
    redirect_uri: Option<String>,
    scopes: Option<Vec<String>>,
    request_timeout_secs: Option<u64>,
    refresh_buffer_secs: Option<u64>,
}

impl RawConfig {
    fn into_config(self) -> Result<GitLabConfig, AuthError> {
        let client_id = self
            .client_id
            .ok_or_else(|| AuthError::Configuration("client_id is not set".to_string()))?;
        let redirect_uri = self
            .redirect_uri
            .ok_or_else(|| AuthError::Configuration("redirect_uri is not set".to_string()))?;
        let mut config = GitLabConfig::new(client_id, redirect_uri);
        if let Some(base_url) = self.base_url {
            config = config.with_base_url(&base_url)?;
        }
        if let Some(scopes) = self.scopes {
            config = config.with_scopes(scopes);
        }
        if let Some(secs) = self.request_timeout_secs {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.refresh_buffer_secs {
            config = config.with_refresh_buffer(Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(config)
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).unwrap_or_else(|_| unreachable!("default base URL is valid"))
}

fn split_scopes(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<u64>, AuthError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value.trim().parse::<u64>().map_err(|_| {
                AuthError::Configuration(format!("{key} must be a number of seconds"))
            })
        })
        .transpose()
}
