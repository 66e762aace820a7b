#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gitlab_oauth::auth::{
    AuthError, AuthPhase, AuthSnapshot, BrowserPresenter, Credential, CredentialStore,
    MemoryCredentialStore,
};
use gitlab_oauth::config::GitLabConfig;
use gitlab_oauth::user::{GitLabUser, UserFetcher, UserState};
use serde_json::{json, Value};
use tokio::sync::watch;
use url::Url;
use wiremock::MockServer;

pub const CLIENT_ID: &str = "test-client";
pub const REDIRECT_URI: &str = "gitlabexplorer://auth/callback";

pub fn config_for(server: &MockServer) -> GitLabConfig {
    GitLabConfig::new(CLIENT_ID, REDIRECT_URI)
        .with_base_url(&server.uri())
        .expect("mock server uri")
        .with_request_timeout(Duration::from_secs(2))
}

pub fn credential(access_token: &str, expires_in: i64, created_at: i64) -> Credential {
    Credential {
        access_token: access_token.to_string(),
        token_type: "Bearer".to_string(),
        expires_in,
        refresh_token: format!("{access_token}-refresh"),
        created_at,
    }
}

pub fn fresh_credential(access_token: &str) -> Credential {
    credential(access_token, 7200, Utc::now().timestamp())
}

/// 200s of lifetime left: stale under the default 300s buffer.
pub fn stale_credential(access_token: &str) -> Credential {
    credential(access_token, 3600, Utc::now().timestamp() - 3400)
}

pub fn token_response(access_token: &str, refresh_token: &str) -> Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 7200,
        "refresh_token": refresh_token,
        "created_at": Utc::now().timestamp(),
    })
}

pub fn sample_user() -> GitLabUser {
    GitLabUser {
        id: 42,
        username: "octo".to_string(),
        name: "Octo Cat".to_string(),
        email: Some("octo@example.com".to_string()),
        public_email: None,
        avatar_url: None,
        bio: None,
        location: None,
        web_url: Some("https://gitlab.com/octo".to_string()),
        created_at: None,
        last_activity_on: None,
        state: UserState::Active,
    }
}

/// Memory store that counts calls and can be told to fail deletes.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryCredentialStore,
    pub saves: AtomicUsize,
    pub loads: AtomicUsize,
    pub deletes: AtomicUsize,
    pub fail_delete: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            inner: MemoryCredentialStore::with_credential(credential),
            ..Self::default()
        }
    }

    pub async fn stored(&self) -> Option<Credential> {
        self.inner.load().await.expect("memory load")
    }
}

#[async_trait]
impl CredentialStore for RecordingStore {
    async fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(credential).await
    }

    async fn load(&self) -> Result<Option<Credential>, AuthError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load().await
    }

    async fn delete(&self) -> Result<(), AuthError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(AuthError::Storage("keychain locked".to_string()));
        }
        self.inner.delete().await
    }
}

/// Plays the browser: answers with a redirect carrying the issued state, or
/// a scripted outcome.
pub struct CallbackPresenter {
    code: String,
    forced_state: Option<String>,
    outcome: Option<AuthError>,
    observer: Mutex<Option<watch::Receiver<AuthSnapshot>>>,
    pub presented: Mutex<Vec<Url>>,
    pub phase_during_present: Mutex<Option<AuthPhase>>,
}

impl CallbackPresenter {
    pub fn approving(code: &str) -> Self {
        Self {
            code: code.to_string(),
            forced_state: None,
            outcome: None,
            observer: Mutex::new(None),
            presented: Mutex::new(Vec::new()),
            phase_during_present: Mutex::new(None),
        }
    }

    pub fn with_state(mut self, state: &str) -> Self {
        self.forced_state = Some(state.to_string());
        self
    }

    pub fn failing(err: AuthError) -> Self {
        let mut presenter = Self::approving("unused");
        presenter.outcome = Some(err);
        presenter
    }

    pub fn observe(&self, rx: watch::Receiver<AuthSnapshot>) {
        *self.observer.lock().expect("observer lock") = Some(rx);
    }

    pub fn last_presented(&self) -> Option<Url> {
        self.presented.lock().expect("presented lock").last().cloned()
    }
}

#[async_trait]
impl BrowserPresenter for CallbackPresenter {
    async fn present(&self, authorize_url: &Url) -> Result<String, AuthError> {
        self.presented
            .lock()
            .expect("presented lock")
            .push(authorize_url.clone());
        if let Some(rx) = self.observer.lock().expect("observer lock").as_ref() {
            *self.phase_during_present.lock().expect("phase lock") = Some(rx.borrow().phase);
        }
        if let Some(err) = &self.outcome {
            return Err(err.clone());
        }
        let state = match &self.forced_state {
            Some(state) => state.clone(),
            None => query_param(authorize_url, "state").expect("state in authorize url"),
        };
        Ok(format!("{REDIRECT_URI}?code={}&state={state}", self.code))
    }
}

/// User fetcher returning a scripted result.
pub struct ScriptedUserFetcher {
    result: Mutex<Result<Option<GitLabUser>, AuthError>>,
    pub calls: AtomicUsize,
}

impl ScriptedUserFetcher {
    pub fn returning(result: Result<Option<GitLabUser>, AuthError>) -> Self {
        Self {
            result: Mutex::new(result),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, result: Result<Option<GitLabUser>, AuthError>) {
        *self.result.lock().expect("result lock") = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserFetcher for ScriptedUserFetcher {
    async fn current_user(&self) -> Result<Option<GitLabUser>, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.lock().expect("result lock").clone()
    }
}

pub fn query_param(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}
