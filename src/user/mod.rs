//! The signed-in GitLab user and the fetchers that resolve it.
//!
//! Fetchers take their bearer token from a [`TokenManager`](crate::auth::TokenManager)
//! and report a 401 as [`AuthError::AuthenticationRejected`] so the session can
//! invalidate the stored credential.

pub mod graphql;
pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::auth::AuthError;

pub use graphql::GraphQlUserFetcher;
pub use rest::RestUserFetcher;

/// Account state as reported by GitLab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UserState {
    #[default]
    Active,
    Blocked,
    Deactivated,
    /// Any state this crate does not model (`banned`, `ldap_blocked`, ...).
    #[serde(other)]
    Other,
}

/// Summary of the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLabUser {
    pub id: u64,
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub public_email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_activity_on: Option<NaiveDate>,
    #[serde(default)]
    pub state: UserState,
}

impl GitLabUser {
    pub fn is_active(&self) -> bool {
        self.state == UserState::Active
    }

    /// Name to show in a UI: the display name, or the username if blank.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.username
        } else {
            &self.name
        }
    }
}

/// Resolves the user the current credential belongs to.
///
/// `Ok(None)` means the server answered but reported no current user.
/// A rejected bearer token must surface as
/// [`AuthError::AuthenticationRejected`].
#[async_trait]
pub trait UserFetcher: Send + Sync {
    async fn current_user(&self) -> Result<Option<GitLabUser>, AuthError>;
}
