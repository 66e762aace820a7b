//! Authorization-code + PKCE flow against the GitLab OAuth endpoints.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use url::Url;

use super::credential::Credential;
use super::error::AuthError;
use super::pkce::PkceSession;
use crate::config::GitLabConfig;
use crate::util::with_timeout;

/// Exchanges a refresh token for a new credential.
///
/// [`AuthorizationFlow`] is the production implementation; the seam exists so
/// the token manager can be driven without a token endpoint.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError>;
}

/// Builds authorization URLs, validates redirect callbacks and talks to the
/// token endpoint.
///
/// Holds at most one pending [`PkceSession`]: every call to
/// [`begin_authorization`](Self::begin_authorization) replaces it and every
/// call to [`complete_authorization`](Self::complete_authorization) consumes
/// it, whatever the outcome.
///
/// # Example
/// ```no_run
/// use gitlab_oauth::auth::AuthorizationFlow;
/// use gitlab_oauth::config::GitLabConfig;
///
/// # async fn run() -> Result<(), gitlab_oauth::auth::AuthError> {
/// let flow = AuthorizationFlow::new(GitLabConfig::new("client-id", "app://cb"))?;
/// let url = flow.begin_authorization()?;
/// println!("open {url}");
/// // ... browser redirects to app://cb?code=...&state=...
/// let credential = flow.complete_authorization("app://cb?code=abc&state=xyz").await?;
/// # Ok(())
/// # }
/// ```
pub struct AuthorizationFlow {
    client: reqwest::Client,
    config: GitLabConfig,
    pending: Mutex<Option<PkceSession>>,
}

impl AuthorizationFlow {
    pub fn new(config: GitLabConfig) -> Result<Self, AuthError> {
        config.validate()?;
        Ok(Self {
            client: reqwest::Client::new(),
            config,
            pending: Mutex::new(None),
        })
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn config(&self) -> &GitLabConfig {
        &self.config
    }

    pub fn has_pending(&self) -> bool {
        self.pending().is_some()
    }

    /// Drop the pending attempt, e.g. after the browser was dismissed.
    pub fn cancel_pending(&self) {
        if self.pending().take().is_some() {
            tracing::debug!("pending authorization discarded");
        }
    }

    /// Start a new attempt and return the URL to present in a browser.
    pub fn begin_authorization(&self) -> Result<Url, AuthError> {
        let session =
            PkceSession::generate_with(self.config.verifier_bytes, self.config.state_bytes);
        let oauth = &self.config.oauth;
        let mut url = self.config.authorize_url()?;
        url.query_pairs_mut()
            .append_pair("client_id", &oauth.client_id)
            .append_pair("redirect_uri", &oauth.redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &oauth.scope_param())
            .append_pair("state", &session.state)
            .append_pair("code_challenge", &session.code_challenge)
            .append_pair("code_challenge_method", "S256");

        let replaced = self.pending().replace(session).is_some();
        tracing::debug!(replaced, "authorization started");
        Ok(url)
    }

    /// Validate the redirect callback and exchange its code for a credential.
    pub async fn complete_authorization(&self, callback_url: &str) -> Result<Credential, AuthError> {
        // Consumed up front: a failed callback must not leave a reusable verifier.
        let pending = self.pending().take();
        let callback = parse_callback(callback_url)?;
        let session = pending.ok_or(AuthError::MissingVerifier)?;
        if callback.state != session.state {
            tracing::warn!("authorization callback state mismatch");
            return Err(AuthError::StateMismatch);
        }

        let oauth = &self.config.oauth;
        let request = TokenExchangeRequest {
            grant_type: "authorization_code",
            client_id: &oauth.client_id,
            code: &callback.code,
            redirect_uri: &oauth.redirect_uri,
            code_verifier: &session.code_verifier,
        };
        let (status, body) = self.post_token(&request).await?;
        if status != StatusCode::OK {
            tracing::warn!(status = status.as_u16(), "authorization code exchange rejected");
            return Err(AuthError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let credential = decode_credential(&body)?;
        tracing::info!(expires_in = credential.expires_in, "authorization code exchanged");
        Ok(credential)
    }

    /// Exchange the credential's refresh token for a new credential.
    pub async fn refresh_credential(&self, credential: &Credential) -> Result<Credential, AuthError> {
        let oauth = &self.config.oauth;
        let request = RefreshTokenRequest {
            grant_type: "refresh_token",
            client_id: &oauth.client_id,
            refresh_token: &credential.refresh_token,
            redirect_uri: &oauth.redirect_uri,
        };
        let (status, body) = self.post_token(&request).await?;
        if status != StatusCode::OK {
            tracing::warn!(status = status.as_u16(), "refresh token rejected");
            let message = if body.trim().is_empty() {
                format!("status {}", status.as_u16())
            } else {
                body
            };
            return Err(AuthError::RefreshFailed(message));
        }
        let refreshed = decode_credential(&body)?;
        tracing::info!(expires_in = refreshed.expires_in, "credential refreshed");
        Ok(refreshed)
    }

    /// Revoke the access token server-side.
    pub async fn revoke(&self, credential: &Credential) -> Result<(), AuthError> {
        let url = self.config.revoke_url()?;
        let request = RevokeRequest {
            client_id: &self.config.oauth.client_id,
            token: &credential.access_token,
        };
        let client = self.client.clone();
        let status = with_timeout(self.config.request_timeout, async move {
            let resp = client.post(url).json(&request).send().await?;
            Ok(resp.status())
        })
        .await?;
        if !status.is_success() {
            return Err(AuthError::Http {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        tracing::debug!("access token revoked");
        Ok(())
    }

    async fn post_token<B: Serialize + Sync>(
        &self,
        request: &B,
    ) -> Result<(StatusCode, String), AuthError> {
        let url = self.config.token_url()?;
        with_timeout(self.config.request_timeout, async {
            let resp = self
                .client
                .post(url)
                .header("Accept", "application/json")
                .json(request)
                .send()
                .await?;
            let status = resp.status();
            let body = resp.text().await?;
            Ok((status, body))
        })
        .await
    }

    fn pending(&self) -> MutexGuard<'_, Option<PkceSession>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TokenRefresher for AuthorizationFlow {
    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        self.refresh_credential(credential).await
    }
}

/// Whether `url` is a redirect to `redirect_uri` carrying an authorization code.
pub fn is_auth_callback(url: &str, redirect_uri: &str) -> bool {
    let (Ok(url), Ok(redirect)) = (Url::parse(url), Url::parse(redirect_uri)) else {
        return false;
    };
    url.scheme() == redirect.scheme()
        && url.host_str() == redirect.host_str()
        && url.path() == redirect.path()
        && url.query_pairs().any(|(key, _)| key == "code")
}

#[derive(Debug)]
struct CallbackParams {
    code: String,
    state: String,
}

fn parse_callback(callback_url: &str) -> Result<CallbackParams, AuthError> {
    let url = Url::parse(callback_url)
        .map_err(|err| AuthError::InvalidCallback(format!("unparseable callback URL: {err}")))?;
    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }
    if let Some(error) = error {
        if error == "access_denied" {
            return Err(AuthError::Cancelled);
        }
        return Err(AuthError::InvalidCallback(match error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        }));
    }
    let code = code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| AuthError::InvalidCallback("missing code".to_string()))?;
    let state = state.ok_or_else(|| AuthError::InvalidCallback("missing state".to_string()))?;
    Ok(CallbackParams { code, state })
}

fn decode_credential(body: &str) -> Result<Credential, AuthError> {
    serde_json::from_str(body)
        .map_err(|err| AuthError::InvalidResponse(format!("token response: {err}")))
}

#[derive(Serialize)]
struct TokenExchangeRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
    code_verifier: &'a str,
}

#[derive(Serialize)]
struct RefreshTokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    refresh_token: &'a str,
    redirect_uri: &'a str,
}

#[derive(Serialize)]
struct RevokeRequest<'a> {
    client_id: &'a str,
    token: &'a str,
}
