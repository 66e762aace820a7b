//! CLI handlers for login, status, whoami and logout.

use std::sync::Arc;

use super::{Cli, StoreKind};
use crate::auth::{
    AuthError, AuthSession, CredentialStore, FileCredentialStore, ReaderPresenter,
};
use crate::config::GitLabConfig;
use crate::user::GitLabUser;

/// Build the session described by the global CLI options.
pub fn build_session(cli: &Cli) -> Result<AuthSession, AuthError> {
    let config = match &cli.config {
        Some(path) => GitLabConfig::from_toml_file(path)?,
        None => GitLabConfig::from_env()?,
    };
    let store = open_store(cli.store, &config.oauth.client_id)?;
    AuthSession::from_config(config, store, Arc::new(ReaderPresenter::stdin()))
}

fn open_store(kind: StoreKind, client_id: &str) -> Result<Arc<dyn CredentialStore>, AuthError> {
    match kind {
        StoreKind::File => Ok(Arc::new(FileCredentialStore::new_default(client_id))),
        #[cfg(feature = "keychain")]
        StoreKind::Keychain => Ok(Arc::new(crate::auth::KeychainCredentialStore::for_client(
            client_id,
        ))),
        #[cfg(not(feature = "keychain"))]
        StoreKind::Keychain => Err(AuthError::Configuration(
            "built without the `keychain` feature".to_string(),
        )),
    }
}

/// Handle `gitlab-oauth login`.
pub async fn handle_login(session: &AuthSession) -> Result<(), AuthError> {
    if session.refresh_auth_state().await.is_authenticated() {
        println!("Already signed in. Run `gitlab-oauth logout` first to switch accounts.");
        return Ok(());
    }
    match session.sign_in().await? {
        Some(user) => println!("Signed in as {}", describe(&user)),
        None => println!("Signed in"),
    }
    Ok(())
}

/// Handle `gitlab-oauth status`.
pub async fn handle_status(session: &AuthSession) -> Result<(), AuthError> {
    let base = &session.flow().config().base_url;
    match session.tokens().peek().await? {
        None => println!("{base}: not signed in"),
        Some(credential) => {
            let expiry = credential
                .expires_at()
                .map(|at| at.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            if credential.is_stale(session.tokens().refresh_buffer()) {
                println!("{base}: signed in, token expiring {expiry} (refreshes on next use)");
            } else {
                println!("{base}: signed in, token valid until {expiry}");
            }
        }
    }
    Ok(())
}

/// Handle `gitlab-oauth whoami`.
pub async fn handle_whoami(session: &AuthSession) -> Result<(), AuthError> {
    match session.get_current_user().await? {
        Some(user) => {
            println!("{}", describe(&user));
            if let Some(url) = &user.web_url {
                println!("  {url}");
            }
            println!("  state: {}", user.state);
        }
        None => println!("Signed in, but the server reported no current user"),
    }
    Ok(())
}

/// Handle `gitlab-oauth logout`.
pub async fn handle_logout(session: &AuthSession) -> Result<(), AuthError> {
    session.sign_out().await;
    match session.snapshot().last_error {
        Some(err) => Err(err),
        None => {
            println!("Signed out");
            Ok(())
        }
    }
}

fn describe(user: &GitLabUser) -> String {
    format!("{} (@{})", user.display_name(), user.username)
}
