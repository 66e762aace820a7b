//! Credential store backed by the platform keychain.
//!
//! One entry per (service, client id) holding the JSON-serialized
//! [`Credential`]. Keychain calls are blocking and run on the blocking pool.

use std::sync::Arc;

use async_trait::async_trait;
use keyring::Entry;
use tokio::sync::Mutex;

use super::credential::Credential;
use super::error::AuthError;
use super::store::CredentialStore;

/// Service identifier used for keychain entries.
pub const DEFAULT_KEYCHAIN_SERVICE: &str = "com.gitlabexplorer.oauth";

pub struct KeychainCredentialStore {
    service: String,
    account: String,
    lock: Arc<Mutex<()>>,
}

impl KeychainCredentialStore {
    pub fn new(service: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: client_id.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn for_client(client_id: impl Into<String>) -> Self {
        Self::new(DEFAULT_KEYCHAIN_SERVICE, client_id)
    }

    async fn with_entry<T, F>(&self, op: F) -> Result<T, AuthError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, AuthError> + Send + 'static,
    {
        let _guard = self.lock.lock().await;
        let service = self.service.clone();
        let account = self.account.clone();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &account).map_err(keychain_error)?;
            op(entry)
        })
        .await
        .map_err(|err| AuthError::Storage(format!("keychain task failed: {err}")))?
    }
}

#[async_trait]
impl CredentialStore for KeychainCredentialStore {
    async fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        let blob = serde_json::to_string(credential)?;
        self.with_entry(move |entry| entry.set_password(&blob).map_err(keychain_error))
            .await?;
        tracing::debug!(service = %self.service, "credential saved to keychain");
        Ok(())
    }

    async fn load(&self) -> Result<Option<Credential>, AuthError> {
        let blob = self
            .with_entry(|entry| match entry.get_password() {
                Ok(blob) => Ok(Some(blob)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(err) => Err(keychain_error(err)),
            })
            .await?;
        match blob {
            Some(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self) -> Result<(), AuthError> {
        self.with_entry(|entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(keychain_error(err)),
        })
        .await
    }
}

fn keychain_error(err: keyring::Error) -> AuthError {
    AuthError::Storage(err.to_string())
}
