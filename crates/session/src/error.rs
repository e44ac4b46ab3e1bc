//! Unified error handling with Sentry integration.
//!
//! Provides a unified `SessionError` type for everything that can reach a
//! caller of this crate. Resolution and bootstrap failures are absorbed inside
//! the engine and never surface here.

use thiserror::Error;

use crate::config::ConfigError;
use crate::provider::ProviderError;
use crate::store::StoreError;

/// Top-level error type for the session crate.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Identity provider call failed.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Profile store call failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The session engine has been torn down.
    #[error("Session engine has been disposed")]
    Disposed,
}

impl SessionError {
    /// Send this error to Sentry and log it with the event id.
    ///
    /// `Disposed` is a caller bug rather than an operational failure and is
    /// only logged.
    pub fn report(&self) {
        if matches!(self, Self::Disposed) {
            tracing::warn!(error = %self, "Session error");
            return;
        }

        let event_id = sentry::capture_error(self);
        tracing::error!(
            error = %self,
            sentry_event_id = %event_id,
            "Session error"
        );
    }
}

/// Set the Sentry user context from a profile or identity ID.
///
/// Call this after a profile is committed to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on sign-out to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

/// Add a breadcrumb for a session lifecycle step.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of session
/// events leading up to an error.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("session", "signed_in", Some(&[("generation", "3")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
