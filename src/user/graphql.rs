//! `currentUser` over the GitLab GraphQL API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::{GitLabUser, UserFetcher, UserState};
use crate::auth::{AuthError, TokenManager};
use crate::config::GitLabConfig;
use crate::util::with_timeout;

const CURRENT_USER_QUERY: &str = "query CurrentUser { currentUser { id username name \
publicEmail avatarUrl webUrl bio location createdAt lastActivityOn state } }";

pub struct GraphQlUserFetcher {
    client: reqwest::Client,
    endpoint: Url,
    tokens: Arc<TokenManager>,
    timeout: Duration,
}

impl GraphQlUserFetcher {
    pub fn new(config: &GitLabConfig, tokens: Arc<TokenManager>) -> Result<Self, AuthError> {
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: config.graphql_url()?,
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
impl UserFetcher for GraphQlUserFetcher {
    async fn current_user(&self) -> Result<Option<GitLabUser>, AuthError> {
        let bearer = self.tokens.get_valid_token().await?.bearer();
        let (status, body) = with_timeout(self.timeout, async {
            let resp = self
                .client
                .post(self.endpoint.clone())
                .header("Authorization", bearer)
                .json(&serde_json::json!({ "query": CURRENT_USER_QUERY }))
                .send()
                .await?;
            let status = resp.status();
            Ok((status, resp.text().await?))
        })
        .await?;

        if status == StatusCode::UNAUTHORIZED {
            tracing::info!("GraphQL endpoint rejected the bearer token");
            return Err(AuthError::AuthenticationRejected);
        }
        if !status.is_success() {
            return Err(AuthError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|err| AuthError::InvalidResponse(format!("currentUser response: {err}")))?;
        if let Some(first) = envelope.errors.first() {
            if envelope.data.is_none() {
                return Err(AuthError::InvalidResponse(first.message.clone()));
            }
            tracing::warn!(message = %first.message, "currentUser returned partial errors");
        }
        envelope
            .data
            .and_then(|data| data.current_user)
            .map(GitLabUser::try_from)
            .transpose()
    }
}

#[derive(Deserialize)]
struct Envelope {
    data: Option<Data>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Data {
    current_user: Option<CurrentUser>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentUser {
    id: String,
    username: String,
    name: String,
    public_email: Option<String>,
    avatar_url: Option<String>,
    web_url: Option<String>,
    bio: Option<String>,
    location: Option<String>,
    created_at: Option<DateTime<Utc>>,
    last_activity_on: Option<NaiveDate>,
    #[serde(default)]
    state: UserState,
}

impl TryFrom<CurrentUser> for GitLabUser {
    type Error = AuthError;

    fn try_from(user: CurrentUser) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_global_id(&user.id)?,
            username: user.username,
            name: user.name,
            email: None,
            public_email: user.public_email,
            avatar_url: user.avatar_url,
            bio: user.bio,
            location: user.location,
            web_url: user.web_url,
            created_at: user.created_at,
            last_activity_on: user.last_activity_on,
            state: user.state,
        })
    }
}

/// `gid://gitlab/User/42` -> `42`.
fn parse_global_id(gid: &str) -> Result<u64, AuthError> {
    gid.rsplit('/')
        .next()
        .and_then(|tail| tail.parse().ok())
        .ok_or_else(|| AuthError::InvalidResponse(format!("unexpected user id {gid}")))
}
