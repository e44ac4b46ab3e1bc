//! GoTrue-compatible identity provider client.
//!
//! GoTrue is the REST auth server used by Supabase and several self-hosted
//! stacks. The client keeps the current session in memory and turns every
//! session change it performs into an [`AuthEvent`] for subscribers, the same
//! way the browser SDKs do.
//!
//! # Endpoints
//!
//! - `POST {auth_url}/auth/v1/token?grant_type=password` - sign in
//! - `POST {auth_url}/auth/v1/token?grant_type=refresh_token` - refresh
//! - `POST {auth_url}/auth/v1/logout` - revoke the refresh token
//!
//! # Example
//!
//! ```rust,ignore
//! use larder_session::provider::GoTrueClient;
//!
//! let client = GoTrueClient::new(&config.auth)?;
//! client.sign_in_with_password("a@b.com", "hunter22").await?;
//!
//! let mut events = client.subscribe()?;
//! while let Some(event) = events.next().await {
//!     tracing::info!(kind = event.kind.as_str(), "session changed");
//! }
//! ```

mod types;

use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::AuthConfig;
use crate::provider::{
    AuthEvent, AuthEventKind, AuthProvider, ProviderError, SessionSnapshot, Subscription,
};

use types::{ErrorBody, PasswordGrant, RefreshGrant, TokenResponse};

/// Capacity of the internal event fan-out. Slow subscribers past this lag and
/// skip events rather than blocking the client.
const EVENT_CAPACITY: usize = 16;

/// Upper bound on a single auth server call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for a GoTrue-compatible auth server.
///
/// Cheap to clone; clones share the session and the event fan-out.
#[derive(Clone)]
pub struct GoTrueClient {
    inner: Arc<GoTrueClientInner>,
}

struct GoTrueClientInner {
    client: reqwest::Client,
    anon_key: SecretString,
    password_url: Url,
    refresh_url: Url,
    logout_url: Url,
    session: RwLock<Option<SessionSnapshot>>,
    events: broadcast::Sender<AuthEvent>,
}

impl GoTrueClient {
    /// Create a client for the auth server described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::InvalidUrl` if the endpoint URLs cannot be
    /// derived from the configured base URL, or `ProviderError::Http` if the
    /// HTTP client cannot be built.
    pub fn new(config: &AuthConfig) -> Result<Self, ProviderError> {
        let api = api_root(&config.url)?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(GoTrueClientInner {
                client,
                anon_key: config.anon_key.clone(),
                password_url: api.join("token?grant_type=password")?,
                refresh_url: api.join("token?grant_type=refresh_token")?,
                logout_url: api.join("logout")?,
                session: RwLock::new(None),
                events,
            }),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session establishment
    // ─────────────────────────────────────────────────────────────────────────

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Api` if the credentials are rejected.
    #[instrument(skip(self, password))]
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SessionSnapshot, ProviderError> {
        let response = self
            .request_token(&self.inner.password_url, &PasswordGrant { email, password })
            .await?;
        let snapshot = response.into_snapshot(Utc::now())?;
        self.store(Some(snapshot.clone()), AuthEventKind::SignedIn);
        Ok(snapshot)
    }

    /// Restore a session from a refresh token obtained elsewhere.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Api` if the refresh token is rejected.
    #[instrument(skip_all)]
    pub async fn set_session(
        &self,
        refresh_token: &SecretString,
    ) -> Result<SessionSnapshot, ProviderError> {
        let snapshot = self.exchange_refresh_token(refresh_token).await?;
        self.store(Some(snapshot.clone()), AuthEventKind::SignedIn);
        Ok(snapshot)
    }

    /// Exchange the held refresh token for a fresh session.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::NoSession` if no refresh token is held.
    #[instrument(skip_all)]
    pub async fn refresh_session(&self) -> Result<SessionSnapshot, ProviderError> {
        let refresh_token = self
            .snapshot()
            .and_then(|s| s.refresh_token)
            .ok_or(ProviderError::NoSession)?;

        match self.exchange_refresh_token(&refresh_token).await {
            Ok(snapshot) => {
                self.store(Some(snapshot.clone()), AuthEventKind::TokenRefreshed);
                Ok(snapshot)
            }
            Err(e @ ProviderError::Api { .. }) => {
                // The server no longer honours this token; the session is over.
                warn!(error = %e, "refresh token rejected, ending session");
                self.store(None, AuthEventKind::SignedOut);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    fn snapshot(&self) -> Option<SessionSnapshot> {
        self.inner.snapshot()
    }

    /// Replace the held session and notify subscribers.
    fn store(&self, session: Option<SessionSnapshot>, kind: AuthEventKind) {
        *self
            .inner
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner) = session.clone();

        let event = AuthEvent { kind, session };
        // No receivers simply means nobody is subscribed yet.
        if self.inner.events.send(event).is_err() {
            debug!(kind = kind.as_str(), "no subscribers for auth event");
        }
    }

    async fn exchange_refresh_token(
        &self,
        refresh_token: &SecretString,
    ) -> Result<SessionSnapshot, ProviderError> {
        let response = self
            .request_token(
                &self.inner.refresh_url,
                &RefreshGrant {
                    refresh_token: refresh_token.expose_secret(),
                },
            )
            .await?;
        response.into_snapshot(Utc::now())
    }

    async fn request_token<B: serde::Serialize + Sync>(
        &self,
        url: &Url,
        body: &B,
    ) -> Result<TokenResponse, ProviderError> {
        let response = self
            .inner
            .client
            .post(url.clone())
            .header("apikey", self.inner.anon_key.expose_secret())
            .header("User-Agent", "Larder/1.0")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        Ok(response.json().await?)
    }
}

impl GoTrueClientInner {
    fn snapshot(&self) -> Option<SessionSnapshot> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Event describing the held session, sent to a subscriber that missed
    /// events so it catches up with the current state.
    fn resync_event(&self) -> AuthEvent {
        match self.snapshot() {
            Some(session) => AuthEvent::live(AuthEventKind::SignedIn, session),
            None => AuthEvent::signed_out(),
        }
    }
}

#[async_trait]
impl AuthProvider for GoTrueClient {
    /// Return the held session, refreshing it first when it is about to expire.
    async fn current_session(&self) -> Result<Option<SessionSnapshot>, ProviderError> {
        let Some(snapshot) = self.snapshot() else {
            return Ok(None);
        };

        if !snapshot.is_expired() {
            return Ok(Some(snapshot));
        }

        if snapshot.refresh_token.is_none() {
            self.store(None, AuthEventKind::SignedOut);
            return Ok(None);
        }

        match self.refresh_session().await {
            Ok(fresh) => Ok(Some(fresh)),
            Err(ProviderError::Api { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> Result<Subscription, ProviderError> {
        let mut receiver = self.inner.events.subscribe();
        let (sender, events) = mpsc::unbounded_channel();
        let client: Weak<GoTrueClientInner> = Arc::downgrade(&self.inner);

        let forwarder = tokio::spawn(async move {
            loop {
                let event = match receiver.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        let Some(client) = client.upgrade() else {
                            break;
                        };
                        warn!(skipped, "auth event subscriber lagged, resending held session");
                        client.resync_event()
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if sender.send(event).is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(events, move || forwarder.abort()))
    }

    /// Clear the local session, then revoke it at the server.
    ///
    /// Subscribers see `SignedOut` even when the remote call fails.
    #[instrument(skip_all)]
    async fn sign_out(&self) -> Result<(), ProviderError> {
        let Some(snapshot) = self.snapshot() else {
            return Ok(());
        };
        self.store(None, AuthEventKind::SignedOut);

        let response = self
            .inner
            .client
            .post(self.inner.logout_url.clone())
            .header("apikey", self.inner.anon_key.expose_secret())
            .bearer_auth(snapshot.access_token.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }
}

/// `{auth_url}/auth/v1/`, tolerating a missing trailing slash on `auth_url`.
fn api_root(auth_url: &Url) -> Result<Url, url::ParseError> {
    let mut base = auth_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("auth/v1/")
}

async fn api_error(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| {
            if text.is_empty() {
                status.to_string()
            } else {
                text
            }
        });

    ProviderError::Api {
        status: status.as_u16(),
        message,
    }
}
