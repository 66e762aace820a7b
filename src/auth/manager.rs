//! Cached credential ownership and coalesced refresh.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{watch, Mutex};

use super::credential::{buffer_secs, unix_now, Credential, DEFAULT_REFRESH_BUFFER};
use super::error::AuthError;
use super::flow::TokenRefresher;
use super::store::CredentialStore;

type SharedRefresh = Shared<BoxFuture<'static, Result<Credential, AuthError>>>;

/// Most recent change to the managed credential.
///
/// Published on [`TokenManager::watch_credential`] so owners of derived state
/// (such as [`AuthSession`](super::AuthSession)) can follow invalidations
/// that happen inside `get_valid_token` calls made by API clients.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CredentialEvent {
    #[default]
    Unchanged,
    Saved,
    Refreshed,
    /// Removed through [`TokenManager::clear_token`].
    Cleared,
    /// The token endpoint refused the refresh token; cache and store were
    /// cleared.
    Rejected(AuthError),
}

struct CacheState {
    current: Option<Credential>,
    in_flight: Option<SharedRefresh>,
    // Bumped by save/clear so a refresh started before them cannot write back.
    generation: u64,
}

/// Owns the in-memory credential and hands out valid bearer credentials.
///
/// `get_valid_token`, `save_token` and `clear_token` are serialized on one
/// lock. When the cached credential is stale, the first caller spawns a
/// refresh task and every concurrent caller awaits that same task, so at most
/// one refresh request is in flight and all waiters see the same outcome.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use gitlab_oauth::auth::{AuthorizationFlow, MemoryCredentialStore, TokenManager};
/// use gitlab_oauth::config::GitLabConfig;
///
/// # async fn run() -> Result<(), gitlab_oauth::auth::AuthError> {
/// let flow = Arc::new(AuthorizationFlow::new(GitLabConfig::new("client-id", "app://cb"))?);
/// let manager = TokenManager::new(Arc::new(MemoryCredentialStore::new()), flow);
/// let bearer = manager.get_valid_token().await?.bearer();
/// # Ok(())
/// # }
/// ```
pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    state: Arc<Mutex<CacheState>>,
    events: Arc<watch::Sender<CredentialEvent>>,
    refresh_buffer: Duration,
}

impl TokenManager {
    pub fn new(store: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            state: Arc::new(Mutex::new(CacheState {
                current: None,
                in_flight: None,
                generation: 0,
            })),
            events: Arc::new(watch::channel(CredentialEvent::default()).0),
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
        }
    }

    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    pub fn refresh_buffer(&self) -> Duration {
        self.refresh_buffer
    }

    /// Receiver notified after every save, refresh, clear or rejection.
    pub fn watch_credential(&self) -> watch::Receiver<CredentialEvent> {
        self.events.subscribe()
    }

    /// Return a credential that is not stale, refreshing it if needed.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoCredential`] when nothing is cached or stored.
    /// - [`AuthError::RefreshFailed`] when the token endpoint rejected the
    ///   refresh token; cache and store have been cleared.
    /// - [`AuthError::Storage`] when the store cannot be read or written.
    /// - [`AuthError::Network`] / [`AuthError::Timeout`] for transport
    ///   failures during refresh; cached state is left untouched.
    pub async fn get_valid_token(&self) -> Result<Credential, AuthError> {
        let refresh = {
            let mut state = self.state.lock().await;
            if let Some(in_flight) = state.in_flight.clone() {
                in_flight
            } else {
                if state.current.is_none() {
                    state.current = self.store.load().await?;
                }
                let Some(current) = state.current.as_ref() else {
                    return Err(AuthError::NoCredential);
                };
                if !current.needs_refresh_at(unix_now(), buffer_secs(self.refresh_buffer)) {
                    return Ok(current.clone());
                }
                tracing::debug!(
                    expires_at = current.expires_at_unix(),
                    "cached credential is stale, refreshing"
                );
                let refresh = self.spawn_refresh(current.clone(), state.generation);
                state.in_flight = Some(refresh.clone());
                refresh
            }
        };
        refresh.await
    }

    /// Bearer token string for an outbound API request.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.get_valid_token().await?.access_token.clone())
    }

    /// Cached (or stored) credential without refreshing it.
    pub async fn peek(&self) -> Result<Option<Credential>, AuthError> {
        let mut state = self.state.lock().await;
        if state.current.is_none() {
            state.current = self.store.load().await?;
        }
        Ok(state.current.clone())
    }

    /// Persist a freshly obtained credential and make it current.
    pub async fn save_token(&self, credential: Credential) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        self.store.save(&credential).await?;
        state.generation += 1;
        state.in_flight = None;
        if credential.is_short_lived(buffer_secs(self.refresh_buffer)) {
            tracing::warn!(
                expires_in = credential.expires_in,
                "credential lifetime is shorter than the refresh buffer, using it until expiry"
            );
        }
        state.current = Some(credential);
        self.events.send_replace(CredentialEvent::Saved);
        tracing::debug!("credential saved");
        Ok(())
    }

    /// Forget the credential in memory and in the store. Idempotent.
    pub async fn clear_token(&self) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.in_flight = None;
        state.current = None;
        self.events.send_replace(CredentialEvent::Cleared);
        self.store.delete().await?;
        tracing::debug!("credential cleared");
        Ok(())
    }

    /// True iff a valid credential can be produced without user interaction.
    pub async fn is_authenticated(&self) -> bool {
        match self.get_valid_token().await {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(error = %err, "not authenticated");
                false
            }
        }
    }

    fn spawn_refresh(&self, stale: Credential, generation: u64) -> SharedRefresh {
        let refresher = self.refresher.clone();
        let store = self.store.clone();
        let state = self.state.clone();
        let events = self.events.clone();
        let buffer = buffer_secs(self.refresh_buffer);
        let handle = tokio::spawn(async move {
            let outcome = refresher.refresh(&stale).await;
            let mut state = state.lock().await;
            if state.generation != generation {
                tracing::debug!("credential replaced during refresh, discarding result");
                return state.current.clone().ok_or(AuthError::NoCredential);
            }
            state.in_flight = None;
            match outcome {
                Ok(refreshed) => {
                    if refreshed.is_short_lived(buffer) {
                        tracing::warn!(
                            expires_in = refreshed.expires_in,
                            "refreshed credential is shorter-lived than the refresh buffer, using it until expiry"
                        );
                    }
                    let persisted = store.save(&refreshed).await;
                    // The previous refresh token is spent either way.
                    state.current = Some(refreshed.clone());
                    events.send_replace(CredentialEvent::Refreshed);
                    persisted?;
                    Ok(refreshed)
                }
                Err(AuthError::RefreshFailed(message)) => {
                    tracing::info!("refresh token rejected, clearing credential");
                    state.current = None;
                    if let Err(err) = store.delete().await {
                        tracing::warn!(error = %err, "failed to delete rejected credential");
                    }
                    let err = AuthError::RefreshFailed(message);
                    events.send_replace(CredentialEvent::Rejected(err.clone()));
                    Err(err)
                }
                Err(other) => {
                    tracing::warn!(error = %other, "credential refresh failed");
                    Err(other)
                }
            }
        });
        async move {
            handle.await.unwrap_or_else(|err| {
                Err(AuthError::Network(format!("refresh task aborted: {err}")))
            })
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryCredentialStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for StaticRefresher {
        async fn refresh(&self, _credential: &Credential) -> Result<Credential, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(credential("refreshed", 7200, chrono::Utc::now().timestamp()))
        }
    }

    fn credential(access: &str, expires_in: i64, created_at: i64) -> Credential {
        Credential {
            access_token: access.to_string(),
            token_type: "Bearer".to_string(),
            expires_in,
            refresh_token: format!("{access}-refresh"),
            created_at,
        }
    }

    fn manager(store: Arc<MemoryCredentialStore>) -> (Arc<StaticRefresher>, TokenManager) {
        let refresher = Arc::new(StaticRefresher {
            calls: AtomicUsize::new(0),
        });
        (refresher.clone(), TokenManager::new(store, refresher))
    }

    #[tokio::test]
    async fn empty_store_yields_no_credential() {
        let (_, manager) = manager(Arc::new(MemoryCredentialStore::new()));
        assert_eq!(manager.get_valid_token().await, Err(AuthError::NoCredential));
        assert!(!manager.is_authenticated().await);
    }

    #[tokio::test]
    async fn fresh_credential_is_loaded_from_store_once() {
        let now = chrono::Utc::now().timestamp();
        let store = Arc::new(MemoryCredentialStore::with_credential(credential(
            "stored", 7200, now,
        )));
        let (refresher, manager) = manager(store.clone());
        assert_eq!(manager.get_valid_token().await.unwrap().access_token, "stored");
        store.delete().await.unwrap();
        // Served from the cache after the first load.
        assert_eq!(manager.access_token().await.unwrap(), "stored");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn custom_buffer_changes_staleness_decision() {
        let now = chrono::Utc::now().timestamp();
        let store = Arc::new(MemoryCredentialStore::with_credential(credential(
            "stored",
            3600,
            now - 3400,
        )));
        let (refresher, manager) = manager(store);
        let manager = manager.with_refresh_buffer(Duration::from_secs(60));
        assert_eq!(manager.get_valid_token().await.unwrap().access_token, "stored");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn short_lived_credential_is_served_without_refresh_storm() {
        let now = chrono::Utc::now().timestamp();
        let (refresher, manager) = manager(Arc::new(MemoryCredentialStore::new()));
        manager.save_token(credential("brief", 120, now)).await.unwrap();

        for _ in 0..5 {
            assert_eq!(manager.access_token().await.unwrap(), "brief");
        }
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_short_lived_credential_is_refreshed() {
        let now = chrono::Utc::now().timestamp();
        let store = Arc::new(MemoryCredentialStore::with_credential(credential(
            "brief",
            120,
            now - 121,
        )));
        let (refresher, manager) = manager(store);
        assert_eq!(manager.access_token().await.unwrap(), "refreshed");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn save_and_clear_are_published() {
        let now = chrono::Utc::now().timestamp();
        let (_, manager) = manager(Arc::new(MemoryCredentialStore::new()));
        let mut events = manager.watch_credential();
        assert_eq!(*events.borrow(), CredentialEvent::Unchanged);

        manager.save_token(credential("saved", 7200, now)).await.unwrap();
        assert!(events.has_changed().unwrap());
        assert_eq!(*events.borrow_and_update(), CredentialEvent::Saved);

        manager.clear_token().await.unwrap();
        assert_eq!(*events.borrow_and_update(), CredentialEvent::Cleared);
    }

    #[tokio::test]
    async fn clear_token_is_idempotent() {
        let (_, manager) = manager(Arc::new(MemoryCredentialStore::new()));
        manager.clear_token().await.unwrap();
        manager.clear_token().await.unwrap();
        assert!(manager.peek().await.unwrap().is_none());
    }
}
