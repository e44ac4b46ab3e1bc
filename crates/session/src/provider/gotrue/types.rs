//! Wire types for the GoTrue REST API.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use larder_core::{Email, Identity, IdentityId};

use crate::provider::{ProviderError, SessionSnapshot};

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub(super) struct PasswordGrant<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Serialize)]
pub(super) struct RefreshGrant<'a> {
    pub refresh_token: &'a str,
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

/// Raw token response from the `/token` endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub expires_at: Option<i64>,
    pub user: UserResponse,
}

/// The `user` object embedded in token responses.
#[derive(Debug, Deserialize)]
pub(super) struct UserResponse {
    pub id: Uuid,
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Map<String, serde_json::Value>,
}

impl TokenResponse {
    /// Convert into a snapshot, computing the expiry relative to `now` when the
    /// provider only reports a lifetime.
    pub fn into_snapshot(self, now: DateTime<Utc>) -> Result<SessionSnapshot, ProviderError> {
        let email = self
            .user
            .email
            .filter(|email| !email.is_empty())
            .map(|email| Email::parse(&email))
            .transpose()
            .map_err(|e| ProviderError::MalformedSession(format!("invalid email: {e}")))?;

        let expires_at = match (self.expires_at, self.expires_in) {
            (Some(at), _) => DateTime::from_timestamp(at, 0),
            (None, Some(lifetime)) => Some(now + chrono::Duration::seconds(lifetime)),
            (None, None) => None,
        };

        Ok(SessionSnapshot {
            identity: Identity {
                id: IdentityId::new(self.user.id),
                email,
                metadata: self.user.user_metadata,
            },
            access_token: SecretString::from(self.access_token),
            refresh_token: self.refresh_token.map(SecretString::from),
            expires_at,
        })
    }
}

/// Error body returned by GoTrue. Different versions use different keys.
#[derive(Debug, Default, Deserialize)]
pub(super) struct ErrorBody {
    pub error_description: Option<String>,
    pub msg: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl ErrorBody {
    /// Pick the most descriptive message available.
    pub fn into_message(self) -> Option<String> {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    const TOKEN_JSON: &str = r#"{
        "access_token": "jwt",
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": "refresh",
        "user": {
            "id": "0b7d8a36-2f6c-4f44-9d3e-6f1b1c7f5a10",
            "email": "a@b.com",
            "user_metadata": { "username": "alice" }
        }
    }"#;

    #[test]
    fn test_token_response_into_snapshot() {
        let now = Utc::now();
        let response: TokenResponse = serde_json::from_str(TOKEN_JSON).unwrap();
        let snapshot = response.into_snapshot(now).unwrap();

        assert_eq!(snapshot.identity.email.unwrap().as_str(), "a@b.com");
        assert_eq!(snapshot.identity.metadata["username"], "alice");
        assert_eq!(snapshot.access_token.expose_secret(), "jwt");
        assert_eq!(
            snapshot.refresh_token.unwrap().expose_secret(),
            "refresh"
        );
        assert_eq!(
            snapshot.expires_at.unwrap().timestamp(),
            now.timestamp() + 3600
        );
    }

    #[test]
    fn test_absolute_expiry_wins() {
        let json = TOKEN_JSON.replace("\"expires_in\": 3600", "\"expires_at\": 1900000000");
        let response: TokenResponse = serde_json::from_str(&json).unwrap();
        let snapshot = response.into_snapshot(Utc::now()).unwrap();
        assert_eq!(snapshot.expires_at.unwrap().timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_blank_email_is_absent() {
        let json = TOKEN_JSON.replace("\"a@b.com\"", "\"\"");
        let response: TokenResponse = serde_json::from_str(&json).unwrap();
        assert!(response.into_snapshot(Utc::now()).unwrap().identity.email.is_none());
    }

    #[test]
    fn test_invalid_email_is_malformed() {
        let json = TOKEN_JSON.replace("\"a@b.com\"", "\"nope\"");
        let response: TokenResponse = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            response.into_snapshot(Utc::now()),
            Err(ProviderError::MalformedSession(_))
        ));
    }

    #[test]
    fn test_error_body_prefers_description() {
        let body: ErrorBody = serde_json::from_str(
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        )
        .unwrap();
        assert_eq!(body.into_message().unwrap(), "Invalid login credentials");

        let body: ErrorBody = serde_json::from_str(r#"{"msg":"Token expired"}"#).unwrap();
        assert_eq!(body.into_message().unwrap(), "Token expired");
    }
}
