//! Convenience re-exports for common use.

pub use crate::auth::{
    AuthError, AuthPhase, AuthSession, AuthSnapshot, AuthorizationFlow, BrowserPresenter,
    Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore, ReaderPresenter,
    TokenManager,
};
pub use crate::config::GitLabConfig;
pub use crate::user::{GitLabUser, UserFetcher};
