//! CLI entry point for gitlab-oauth.

pub mod auth;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::auth::AuthError;

/// GitLab OAuth sign-in helper
#[derive(Parser, Debug)]
#[command(name = "gitlab-oauth", version, about = "Sign in to GitLab with OAuth + PKCE")]
pub struct Cli {
    /// TOML configuration file (defaults to GITLAB_* environment variables)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Where the credential is persisted
    #[arg(long, global = true, value_enum, default_value_t = StoreKind::File)]
    pub store: StoreKind,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    File,
    Keychain,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in through the browser
    Login,
    /// Show whether a usable credential is stored
    Status,
    /// Print the signed-in user
    Whoami,
    /// Revoke and forget the stored credential
    Logout,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Map an [`AuthError`] to a user-facing message with a next step.
pub fn format_error_help(err: &AuthError) -> String {
    match err {
        AuthError::NoCredential | AuthError::AuthenticationRequired => {
            "Not signed in. Run: gitlab-oauth login".to_string()
        }
        AuthError::RefreshFailed(_) | AuthError::AuthenticationRejected => {
            format!("{err}. Your session ended; run: gitlab-oauth login")
        }
        AuthError::Cancelled => "Sign-in cancelled.".to_string(),
        AuthError::Configuration(msg) => {
            format!("Configuration error: {msg}. Set GITLAB_CLIENT_ID and GITLAB_REDIRECT_URI or pass --config")
        }
        AuthError::Storage(msg) => {
            format!("Credential storage unavailable: {msg}. Try --store file")
        }
        other => other.to_string(),
    }
}
