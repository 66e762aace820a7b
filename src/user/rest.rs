//! `GET /api/v4/user`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use super::{GitLabUser, UserFetcher};
use crate::auth::{AuthError, TokenManager};
use crate::config::GitLabConfig;
use crate::util::with_timeout;

pub struct RestUserFetcher {
    client: reqwest::Client,
    endpoint: Url,
    tokens: Arc<TokenManager>,
    timeout: Duration,
}

impl RestUserFetcher {
    pub fn new(config: &GitLabConfig, tokens: Arc<TokenManager>) -> Result<Self, AuthError> {
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: config.rest_url("user")?,
            tokens,
            timeout: config.request_timeout,
        })
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl UserFetcher for RestUserFetcher {
    async fn current_user(&self) -> Result<Option<GitLabUser>, AuthError> {
        let bearer = self.tokens.get_valid_token().await?.bearer();
        let (status, body) = with_timeout(self.timeout, async {
            let resp = self
                .client
                .get(self.endpoint.clone())
                .header("Authorization", bearer)
                .header("Accept", "application/json")
                .send()
                .await?;
            let status = resp.status();
            Ok((status, resp.text().await?))
        })
        .await?;

        match status {
            StatusCode::UNAUTHORIZED => {
                tracing::info!("user endpoint rejected the bearer token");
                Err(AuthError::AuthenticationRejected)
            }
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => serde_json::from_str(&body)
                .map(Some)
                .map_err(|err| AuthError::InvalidResponse(format!("user response: {err}"))),
            status => Err(AuthError::Http {
                status: status.as_u16(),
                body,
            }),
        }
    }
}
