//! OAuth authorization-code + PKCE sign-in and credential lifecycle.

pub mod credential;
pub mod error;
pub mod flow;
#[cfg(feature = "keychain")]
pub mod keychain;
pub mod manager;
pub mod pkce;
pub mod presenter;
pub mod session;
pub mod store;

pub use credential::{Credential, DEFAULT_REFRESH_BUFFER};
pub use error::AuthError;
pub use flow::{is_auth_callback, AuthorizationFlow, TokenRefresher};
#[cfg(feature = "keychain")]
pub use keychain::{KeychainCredentialStore, DEFAULT_KEYCHAIN_SERVICE};
pub use manager::{CredentialEvent, TokenManager};
pub use pkce::PkceSession;
pub use presenter::{BrowserPresenter, ReaderPresenter};
pub use session::{AuthPhase, AuthSession, AuthSnapshot};
pub use store::{CredentialStore, CredentialStoreConfig, FileCredentialStore, MemoryCredentialStore};
