//! Sign-in façade with observable authentication state.

use std::sync::Arc;

use strum::Display;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::error::AuthError;
use super::flow::AuthorizationFlow;
use super::manager::{CredentialEvent, TokenManager};
use super::presenter::BrowserPresenter;
use super::store::CredentialStore;
use crate::config::GitLabConfig;
use crate::user::{GitLabUser, GraphQlUserFetcher, UserFetcher};

/// Coarse session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "snake_case")]
pub enum AuthPhase {
    #[default]
    SignedOut,
    /// Interactive sign-in in progress.
    Authenticating,
    SignedIn,
}

/// Point-in-time view of the session, delivered to subscribers after every
/// transition. Subscribe via [`AuthSession::subscribe`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSnapshot {
    pub phase: AuthPhase,
    pub current_user: Option<GitLabUser>,
    pub is_loading_user: bool,
    pub last_error: Option<AuthError>,
}

impl AuthSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.phase == AuthPhase::SignedIn
    }

    pub fn is_authenticating(&self) -> bool {
        self.phase == AuthPhase::Authenticating
    }
}

/// User-facing authentication façade.
///
/// Drives `SignedOut -> Authenticating -> SignedIn` through the authorization
/// flow, the token manager and a user fetcher. Every public operation returns
/// with the session out of `Authenticating`, and any failure is recorded in
/// [`AuthSnapshot::last_error`]. A refresh rejected inside
/// [`TokenManager::get_valid_token`], or a credential cleared directly on the
/// manager, signs the session out as well.
///
/// Must be created inside a Tokio runtime: the session spawns a task that
/// follows the token manager's [`CredentialEvent`]s until it is dropped.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use gitlab_oauth::auth::{AuthSession, MemoryCredentialStore, ReaderPresenter};
/// use gitlab_oauth::config::GitLabConfig;
///
/// # async fn run() -> Result<(), gitlab_oauth::auth::AuthError> {
/// let session = AuthSession::from_config(
///     GitLabConfig::new("client-id", "app://cb"),
///     Arc::new(MemoryCredentialStore::new()),
///     Arc::new(ReaderPresenter::stdin()),
/// )?;
/// let mut changes = session.subscribe();
/// session.sign_in().await?;
/// assert!(changes.borrow_and_update().is_authenticated());
/// # Ok(())
/// # }
/// ```
pub struct AuthSession {
    flow: Arc<AuthorizationFlow>,
    tokens: Arc<TokenManager>,
    users: Arc<dyn UserFetcher>,
    presenter: Arc<dyn BrowserPresenter>,
    snapshot_tx: Arc<watch::Sender<AuthSnapshot>>,
    sign_in_lock: Mutex<()>,
    follower: JoinHandle<()>,
}

impl AuthSession {
    pub fn new(
        flow: Arc<AuthorizationFlow>,
        tokens: Arc<TokenManager>,
        users: Arc<dyn UserFetcher>,
        presenter: Arc<dyn BrowserPresenter>,
    ) -> Self {
        let snapshot_tx = Arc::new(watch::channel(AuthSnapshot::default()).0);
        let follower = tokio::spawn(follow_credential(
            tokens.watch_credential(),
            snapshot_tx.clone(),
        ));
        Self {
            flow,
            tokens,
            users,
            presenter,
            snapshot_tx,
            sign_in_lock: Mutex::new(()),
            follower,
        }
    }

    /// Wire the default collaborators: GraphQL user lookup and a token
    /// manager using `config.refresh_buffer`.
    pub fn from_config(
        config: GitLabConfig,
        store: Arc<dyn CredentialStore>,
        presenter: Arc<dyn BrowserPresenter>,
    ) -> Result<Self, AuthError> {
        let flow = Arc::new(AuthorizationFlow::new(config)?);
        let tokens = Arc::new(
            TokenManager::new(store, flow.clone()).with_refresh_buffer(flow.config().refresh_buffer),
        );
        let users = Arc::new(GraphQlUserFetcher::new(flow.config(), tokens.clone())?);
        Ok(Self::new(flow, tokens, users, presenter))
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn flow(&self) -> &Arc<AuthorizationFlow> {
        &self.flow
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Receiver notified after every state change.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Run the interactive sign-in and load the user.
    ///
    /// On any failure the pending PKCE attempt is discarded and nothing from
    /// the attempt stays persisted. The phase then follows the token manager:
    /// `SignedIn` if an earlier credential is still usable, `SignedOut`
    /// otherwise. Dropping the returned future has the same effect, with
    /// [`AuthError::Cancelled`] recorded.
    pub async fn sign_in(&self) -> Result<Option<GitLabUser>, AuthError> {
        let _attempt = self.sign_in_lock.lock().await;
        let previous_user = self.snapshot_tx.borrow().current_user.clone();
        self.update(|snap| {
            snap.phase = AuthPhase::Authenticating;
            snap.last_error = None;
        });
        let mut guard = SignInGuard::new(self);

        let result = self.run_sign_in(&mut guard.saved).await;
        let signed_in = match &result {
            Ok(_) => true,
            Err(_) => {
                self.flow.cancel_pending();
                self.tokens.is_authenticated().await
            }
        };
        guard.disarm();

        match result {
            Ok(user) => {
                tracing::info!(username = user.as_ref().map(|u| u.username.as_str()), "signed in");
                self.update(|snap| {
                    snap.phase = AuthPhase::SignedIn;
                    snap.current_user = user.clone();
                    snap.is_loading_user = false;
                });
                Ok(user)
            }
            Err(err) => {
                if err == AuthError::Cancelled {
                    tracing::info!("sign-in cancelled");
                } else {
                    tracing::warn!(error = %err, "sign-in failed");
                }
                self.update(|snap| {
                    if signed_in {
                        snap.phase = AuthPhase::SignedIn;
                        snap.current_user = previous_user;
                    } else {
                        snap.phase = AuthPhase::SignedOut;
                        snap.current_user = None;
                    }
                    snap.is_loading_user = false;
                    snap.last_error = Some(err.clone());
                });
                Err(err)
            }
        }
    }

    async fn run_sign_in(&self, saved: &mut bool) -> Result<Option<GitLabUser>, AuthError> {
        let authorize_url = self.flow.begin_authorization()?;
        let callback = self.presenter.present(&authorize_url).await?;
        let credential = self.flow.complete_authorization(&callback).await?;
        self.tokens.save_token(credential).await?;
        *saved = true;

        self.update(|snap| snap.is_loading_user = true);
        match self.users.current_user().await {
            Ok(user) => Ok(user),
            Err(err) => {
                if let Err(clear_err) = self.tokens.clear_token().await {
                    tracing::warn!(error = %clear_err, "failed to discard credential after sign-in failure");
                }
                *saved = false;
                Err(err)
            }
        }
    }

    /// Revoke (best effort), forget the credential and the user.
    ///
    /// Always ends in `SignedOut`; a store deletion failure is recorded in
    /// `last_error` rather than returned.
    pub async fn sign_out(&self) {
        match self.tokens.peek().await {
            Ok(Some(credential)) => {
                if let Err(err) = self.flow.revoke(&credential).await {
                    tracing::warn!(error = %err, "token revocation failed");
                }
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "could not read credential for revocation"),
        }

        let cleared = self.tokens.clear_token().await;
        if let Err(err) = &cleared {
            tracing::warn!(error = %err, "failed to delete stored credential");
        }
        self.update(|snap| {
            snap.phase = AuthPhase::SignedOut;
            snap.current_user = None;
            snap.is_loading_user = false;
            snap.last_error = cleared.err();
        });
        tracing::info!("signed out");
    }

    /// Recompute the phase from the token manager and load the user if needed.
    ///
    /// Left alone while an interactive sign-in holds the session.
    pub async fn refresh_auth_state(&self) -> AuthSnapshot {
        let Ok(_attempt) = self.sign_in_lock.try_lock() else {
            return self.snapshot();
        };

        if !self.tokens.is_authenticated().await {
            self.update(|snap| {
                snap.phase = AuthPhase::SignedOut;
                snap.current_user = None;
                snap.is_loading_user = false;
            });
            return self.snapshot();
        }

        let needs_user = self.snapshot_tx.borrow().current_user.is_none();
        self.update(|snap| {
            snap.phase = AuthPhase::SignedIn;
            snap.is_loading_user = needs_user;
        });
        if needs_user {
            // Errors are recorded in the snapshot.
            let _ = self.load_user().await;
        }
        self.snapshot()
    }

    /// Fetch the user behind the current credential.
    ///
    /// # Errors
    ///
    /// [`AuthError::AuthenticationRequired`] when no usable credential exists.
    /// An authentication failure from the fetch clears the credential and
    /// signs the session out before being returned.
    pub async fn get_current_user(&self) -> Result<Option<GitLabUser>, AuthError> {
        if !self.tokens.is_authenticated().await {
            self.update(|snap| {
                snap.phase = AuthPhase::SignedOut;
                snap.current_user = None;
            });
            return Err(AuthError::AuthenticationRequired);
        }
        self.update(|snap| snap.is_loading_user = true);
        self.load_user().await
    }

    pub fn clear_error(&self) {
        self.update(|snap| snap.last_error = None);
    }

    async fn load_user(&self) -> Result<Option<GitLabUser>, AuthError> {
        match self.users.current_user().await {
            Ok(user) => {
                self.update(|snap| {
                    snap.phase = AuthPhase::SignedIn;
                    snap.current_user = user.clone();
                    snap.is_loading_user = false;
                });
                Ok(user)
            }
            Err(err) if err.requires_reauthentication() => {
                tracing::info!(error = %err, "credential no longer accepted, signing out");
                if let Err(clear_err) = self.tokens.clear_token().await {
                    tracing::warn!(error = %clear_err, "failed to delete rejected credential");
                }
                self.update(|snap| {
                    snap.phase = AuthPhase::SignedOut;
                    snap.current_user = None;
                    snap.is_loading_user = false;
                    snap.last_error = Some(err.clone());
                });
                Err(err)
            }
            Err(err) => {
                self.update(|snap| {
                    snap.is_loading_user = false;
                    snap.last_error = Some(err.clone());
                });
                Err(err)
            }
        }
    }

    fn update(&self, change: impl FnOnce(&mut AuthSnapshot)) {
        update(&self.snapshot_tx, change);
    }
}

impl Drop for AuthSession {
    fn drop(&mut self) {
        self.follower.abort();
    }
}

fn update(tx: &watch::Sender<AuthSnapshot>, change: impl FnOnce(&mut AuthSnapshot)) {
    tx.send_if_modified(|snap| {
        let before = snap.clone();
        change(snap);
        *snap != before
    });
}

/// Signs the session out when the token manager drops its credential behind
/// the session's back, e.g. a refresh rejected during an API call.
async fn follow_credential(
    mut events: watch::Receiver<CredentialEvent>,
    snapshot_tx: Arc<watch::Sender<AuthSnapshot>>,
) {
    while events.changed().await.is_ok() {
        let reason = match events.borrow_and_update().clone() {
            CredentialEvent::Cleared => None,
            CredentialEvent::Rejected(err) => Some(err),
            _ => continue,
        };
        update(&snapshot_tx, |snap| {
            // Sign-in settles its own phase.
            if snap.phase != AuthPhase::SignedIn {
                return;
            }
            tracing::info!("credential invalidated, signing out");
            snap.phase = AuthPhase::SignedOut;
            snap.current_user = None;
            snap.is_loading_user = false;
            if reason.is_some() {
                snap.last_error = reason;
            }
        });
    }
}

/// Settles a `sign_in` whose future is dropped before it completes.
struct SignInGuard<'a> {
    session: &'a AuthSession,
    saved: bool,
    armed: bool,
}

impl<'a> SignInGuard<'a> {
    fn new(session: &'a AuthSession) -> Self {
        Self {
            session,
            saved: false,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for SignInGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::info!("sign-in abandoned");
        self.session.flow.cancel_pending();
        let saved = self.saved;
        self.session.update(|snap| {
            if snap.phase != AuthPhase::Authenticating {
                return;
            }
            // A saved credential is usable even though the user was never loaded.
            snap.phase = if saved {
                AuthPhase::SignedIn
            } else {
                AuthPhase::SignedOut
            };
            snap.is_loading_user = false;
            snap.last_error = Some(AuthError::Cancelled);
        });
    }
}
