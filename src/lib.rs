//! gitlab-oauth: OAuth2 authorization-code + PKCE sign-in for GitLab clients.
//!
//! Builds the authorization URL, validates the redirect callback, exchanges
//! the code for a credential, persists it, and refreshes it before expiry so
//! every API call can carry a valid bearer token.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use gitlab_oauth::prelude::*;
//!
//! # async fn example() -> Result<(), AuthError> {
//! let config = GitLabConfig::from_env()?;
//! let store = Arc::new(FileCredentialStore::new_default(config.oauth.client_id.clone()));
//! let session = AuthSession::from_config(config, store, Arc::new(ReaderPresenter::stdin()))?;
//!
//! if !session.refresh_auth_state().await.is_authenticated() {
//!     session.sign_in().await?;
//! }
//! let bearer = session.tokens().get_valid_token().await?.bearer();
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod prelude;
pub mod user;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
