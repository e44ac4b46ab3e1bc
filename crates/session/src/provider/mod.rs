//! Identity provider boundary.
//!
//! The engine only needs three things from the identity provider:
//!
//! - the current session, fetched once at bootstrap
//! - a live stream of session-lifecycle events
//! - a way to revoke the session remotely
//!
//! [`AuthProvider`] captures exactly that. [`GoTrueClient`] implements it over
//! a GoTrue-compatible REST API; tests drive the engine with scripted
//! in-process providers.

mod gotrue;

pub use gotrue::GoTrueClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::mpsc;

use larder_core::Identity;

/// Seconds before the reported expiry at which a session is treated as expired.
const EXPIRY_BUFFER_SECONDS: i64 = 60;

/// Errors that can occur when talking to the identity provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a non-success status.
    #[error("provider rejected request ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the error body.
        message: String,
    },

    /// The operation needs a session and none is held.
    #[error("no active session")]
    NoSession,

    /// The provider returned a session that could not be interpreted.
    #[error("malformed session: {0}")]
    MalformedSession(String),

    /// The provider endpoint could not be built from configuration.
    #[error("invalid provider URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The provider is not reachable for a reason other than HTTP.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// Session as reported by the identity provider.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// The authenticated principal.
    pub identity: Identity,
    /// Bearer token for provider-scoped calls.
    pub access_token: SecretString,
    /// Token used to obtain a fresh session.
    pub refresh_token: Option<SecretString>,
    /// When the access token stops being accepted.
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// Build a snapshot for an identity with no expiry information.
    #[must_use]
    pub fn new(identity: Identity, access_token: SecretString) -> Self {
        Self {
            identity,
            access_token,
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Check if the access token is expired at `now` (with 60s buffer).
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| {
            now.timestamp() >= expires_at.timestamp() - EXPIRY_BUFFER_SECONDS
        })
    }

    /// Check if the access token is expired now (with 60s buffer).
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// Kind of session-lifecycle event emitted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthEventKind {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl AuthEventKind {
    /// Stable name used in logs and breadcrumbs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InitialSession => "initial_session",
            Self::SignedIn => "signed_in",
            Self::SignedOut => "signed_out",
            Self::TokenRefreshed => "token_refreshed",
            Self::UserUpdated => "user_updated",
            Self::PasswordRecovery => "password_recovery",
        }
    }
}

/// A session-lifecycle notification.
///
/// `session` is `None` when the event ends the session (sign-out, expiry).
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub kind: AuthEventKind,
    pub session: Option<SessionSnapshot>,
}

impl AuthEvent {
    /// An event carrying a live session.
    #[must_use]
    pub const fn live(kind: AuthEventKind, session: SessionSnapshot) -> Self {
        Self {
            kind,
            session: Some(session),
        }
    }

    /// A sign-out event.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self {
            kind: AuthEventKind::SignedOut,
            session: None,
        }
    }
}

/// Handle to a live event subscription.
///
/// Events are delivered through [`Subscription::next`]. The cancellation
/// registered by the provider runs exactly once: on the first call to
/// [`Subscription::dispose`], or on drop if `dispose` was never called.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<AuthEvent>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap an event channel and the action that detaches it from the provider.
    pub fn new(
        events: mpsc::UnboundedReceiver<AuthEvent>,
        cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            events,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the subscription is disposed or the provider closed
    /// the stream. Events buffered at disposal time are never delivered.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        if self.is_disposed() {
            return None;
        }
        self.events.recv().await
    }

    /// Detach from the provider. Calling this again is a no-op.
    pub fn dispose(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            self.events.close();
            cancel();
        }
    }

    /// Whether [`Self::dispose`] has already run.
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        self.cancel.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// The identity provider as seen by the session engine.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Fetch the current session once.
    ///
    /// `Ok(None)` means nobody is signed in.
    async fn current_session(&self) -> Result<Option<SessionSnapshot>, ProviderError>;

    /// Register a long-lived subscription to session-lifecycle events.
    ///
    /// Must be called from within a Tokio runtime.
    fn subscribe(&self) -> Result<Subscription, ProviderError>;

    /// Revoke the current session at the provider.
    async fn sign_out(&self) -> Result<(), ProviderError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration;
    use uuid::Uuid;

    use larder_core::IdentityId;

    use super::*;

    fn snapshot(expires_at: Option<DateTime<Utc>>) -> SessionSnapshot {
        SessionSnapshot {
            expires_at,
            ..SessionSnapshot::new(
                Identity::new(IdentityId::new(Uuid::nil()), None),
                SecretString::from("token"),
            )
        }
    }

    #[test]
    fn test_expiry_uses_buffer() {
        let now = Utc::now();
        assert!(!snapshot(None).is_expired_at(now));
        assert!(!snapshot(Some(now + Duration::seconds(120))).is_expired_at(now));
        assert!(snapshot(Some(now + Duration::seconds(30))).is_expired_at(now));
        assert!(snapshot(Some(now - Duration::seconds(1))).is_expired_at(now));
    }

    #[tokio::test]
    async fn test_dispose_runs_cancel_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let counter = Arc::clone(&calls);
        let mut subscription = Subscription::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tx.send(AuthEvent::signed_out()).unwrap();
        assert_eq!(
            subscription.next().await.map(|e| e.kind),
            Some(AuthEventKind::SignedOut)
        );

        subscription.dispose();
        subscription.dispose();
        drop(subscription);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disposed_subscription_yields_nothing() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = Subscription::new(rx, || {});
        tx.send(AuthEvent::signed_out()).unwrap();

        subscription.dispose();

        assert!(subscription.next().await.is_none());
        assert!(tx.send(AuthEvent::signed_out()).is_err());
    }

    #[test]
    fn test_drop_without_dispose_cancels() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel();
        let counter = Arc::clone(&calls);
        drop(Subscription::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
