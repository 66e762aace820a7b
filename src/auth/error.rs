use thiserror::Error;

/// Errors raised by the authorization flow, token manager and session.
///
/// `Clone` so that a single refresh outcome can be handed to every caller
/// waiting on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid callback: {0}")]
    InvalidCallback(String),
    #[error("OAuth state mismatch")]
    StateMismatch,
    #[error("No pending authorization (missing code verifier)")]
    MissingVerifier,
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Failed to refresh token: {0}")]
    RefreshFailed(String),
    #[error("No authentication token available")]
    NoCredential,
    #[error("Authentication required")]
    AuthenticationRequired,
    #[error("Authentication rejected by server")]
    AuthenticationRejected,
    #[error("Sign-in cancelled")]
    Cancelled,
    #[error("Credential storage unavailable: {0}")]
    Storage(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl AuthError {
    /// Whether the user has to go through interactive sign-in again.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::RefreshFailed(_)
                | Self::NoCredential
                | Self::AuthenticationRequired
                | Self::AuthenticationRejected
        )
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return Self::InvalidResponse(error.to_string());
        }
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<url::ParseError> for AuthError {
    fn from(error: url::ParseError) -> Self {
        Self::Configuration(format!("invalid URL: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reauthentication_errors_are_classified() {
        assert!(AuthError::RefreshFailed("invalid_grant".into()).requires_reauthentication());
        assert!(AuthError::NoCredential.requires_reauthentication());
        assert!(AuthError::AuthenticationRejected.requires_reauthentication());
        assert!(!AuthError::Timeout { millis: 10 }.requires_reauthentication());
        assert!(!AuthError::Storage("locked".into()).requires_reauthentication());
    }

    #[test]
    fn http_error_display_includes_status_and_body() {
        let err = AuthError::Http {
            status: 401,
            body: "invalid_client".into(),
        };
        assert_eq!(err.to_string(), "HTTP error 401: invalid_client");
    }
}
