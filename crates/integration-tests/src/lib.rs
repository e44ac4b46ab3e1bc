//! Integration test harness for the Larder session engine.
//!
//! Provides an in-process identity provider whose events are driven by the
//! test, and an in-memory profile store with latency and failure injection,
//! so the whole engine can run under Tokio's paused clock.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p larder-integration-tests
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let harness = Harness::new();
//! harness.store.insert(profile(7, "a@b.com", "alice", UserType::Customer));
//! harness.provider.set_snapshot(Some(snapshot(identity(Some("a@b.com"), None))));
//!
//! let sync = harness.start();
//! let state = sync.context().wait_until_settled().await.unwrap();
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

use larder_core::{Email, Identity, IdentityId, Profile, ProfileId, USERNAME_METADATA_KEY, UserType, Username};
use larder_session::{
    AuthEvent, AuthEventKind, AuthProvider, ProfileFilter, ProfileResolver, ProfileStore,
    ProviderError, SessionSnapshot, SessionSync, StoreError, Subscription, SyncOptions,
};

// =============================================================================
// Fixtures
// =============================================================================

/// An identity with a random id.
pub fn identity(email: Option<&str>, username: Option<&str>) -> Identity {
    let identity = Identity::new(
        IdentityId::new(Uuid::new_v4()),
        email.map(|e| Email::parse(e).unwrap()),
    );
    match username {
        Some(username) => identity.with_metadata(USERNAME_METADATA_KEY, username),
        None => identity,
    }
}

/// A provider session for `identity`.
pub fn snapshot(identity: Identity) -> SessionSnapshot {
    SessionSnapshot::new(identity, SecretString::from("access-token"))
}

/// A profile row.
pub fn profile(id: i32, email: &str, username: &str, user_type: UserType) -> Profile {
    Profile {
        id: ProfileId::new(id),
        email: Email::parse(email).unwrap(),
        username: Username::parse(username).unwrap(),
        first_name: String::new(),
        last_name: String::new(),
        user_type,
    }
}

// =============================================================================
// Scripted Provider
// =============================================================================

/// Identity provider driven by the test.
///
/// Events are only delivered to live subscriptions; the test decides when
/// each one happens.
#[derive(Default)]
pub struct ScriptedProvider {
    snapshot: Mutex<Option<SessionSnapshot>>,
    snapshot_error: AtomicBool,
    snapshot_held: AtomicBool,
    snapshot_release: Notify,
    subscribe_error: AtomicBool,
    sign_out_error: Mutex<Option<String>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AuthEvent>>>,
    subscribes: AtomicUsize,
    cancels: Arc<AtomicUsize>,
    sign_outs: AtomicUsize,
}

impl ScriptedProvider {
    /// Set what `current_session` returns.
    pub fn set_snapshot(&self, snapshot: Option<SessionSnapshot>) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    /// Make `current_session` fail with a transport error.
    pub fn fail_snapshot(&self) {
        self.snapshot_error.store(true, Ordering::SeqCst);
    }

    /// Make `current_session` hang until [`Self::release_snapshot`].
    pub fn hold_snapshot(&self) {
        self.snapshot_held.store(true, Ordering::SeqCst);
    }

    /// Let a held `current_session` answer.
    pub fn release_snapshot(&self) {
        self.snapshot_held.store(false, Ordering::SeqCst);
        self.snapshot_release.notify_one();
    }

    /// Make `subscribe` fail.
    pub fn fail_subscribe(&self) {
        self.subscribe_error.store(true, Ordering::SeqCst);
    }

    /// Make `sign_out` fail with `message`.
    pub fn fail_sign_out(&self, message: &str) {
        *self.sign_out_error.lock().unwrap() = Some(message.to_owned());
    }

    /// Deliver `event` to every live subscription.
    pub fn emit(&self, event: AuthEvent) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Emit a `SignedIn` event for `identity`.
    pub fn sign_in(&self, identity: Identity) {
        self.emit(AuthEvent::live(AuthEventKind::SignedIn, snapshot(identity)));
    }

    /// Emit a `SignedOut` event.
    pub fn expire(&self) {
        self.emit(AuthEvent::signed_out());
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn sign_out_count(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for ScriptedProvider {
    async fn current_session(&self) -> Result<Option<SessionSnapshot>, ProviderError> {
        if self.snapshot_held.load(Ordering::SeqCst) {
            self.snapshot_release.notified().await;
        }
        if self.snapshot_error.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("connection refused".to_owned()));
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }

    fn subscribe(&self) -> Result<Subscription, ProviderError> {
        if self.subscribe_error.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("realtime offline".to_owned()));
        }
        self.subscribes.fetch_add(1, Ordering::SeqCst);

        let (sender, events) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(sender);

        let cancels = Arc::clone(&self.cancels);
        Ok(Subscription::new(events, move || {
            cancels.fetch_add(1, Ordering::SeqCst);
        }))
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.sign_out_error.lock().unwrap().clone() {
            return Err(ProviderError::Unavailable(message));
        }
        self.set_snapshot(None);
        self.expire();
        Ok(())
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// Profile store backed by a `Vec`, with per-value latency, per-column
/// failures and a stall switch.
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<Vec<Profile>>,
    latency: Mutex<HashMap<String, Duration>>,
    default_latency: Mutex<Duration>,
    failing_columns: Mutex<Vec<&'static str>>,
    stalled: AtomicBool,
    calls: Mutex<Vec<ProfileFilter>>,
}

impl MemoryProfileStore {
    pub fn insert(&self, profile: Profile) {
        self.profiles.lock().unwrap().push(profile);
    }

    /// Delay every lookup by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.default_latency.lock().unwrap() = latency;
    }

    /// Delay lookups whose filter value is `value` by `latency`.
    pub fn set_latency_for(&self, value: &str, latency: Duration) {
        self.latency
            .lock()
            .unwrap()
            .insert(value.to_owned(), latency);
    }

    /// Fail every lookup on `column` with a transport error.
    pub fn fail_column(&self, column: &'static str) {
        self.failing_columns.lock().unwrap().push(column);
    }

    /// Make every lookup hang forever.
    pub fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Every filter looked up so far, in order.
    pub fn calls(&self) -> Vec<ProfileFilter> {
        self.calls.lock().unwrap().clone()
    }

    /// The columns looked up so far, in order.
    pub fn columns(&self) -> Vec<&'static str> {
        self.calls().iter().map(ProfileFilter::column).collect()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn find_one(&self, filter: &ProfileFilter) -> Result<Option<Profile>, StoreError> {
        self.calls.lock().unwrap().push(filter.clone());

        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let latency = self
            .latency
            .lock()
            .unwrap()
            .get(filter.value())
            .copied()
            .unwrap_or_else(|| *self.default_latency.lock().unwrap());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if self.failing_columns.lock().unwrap().contains(&filter.column()) {
            return Err(StoreError::Unavailable("connection reset".to_owned()));
        }

        let mut matches: Vec<Profile> = self
            .profiles
            .lock()
            .unwrap()
            .iter()
            .filter(|p| match filter {
                ProfileFilter::Email(email) => p.email == *email,
                ProfileFilter::Username(username) => p.username == *username,
            })
            .cloned()
            .collect();

        match matches.len() {
            0 | 1 => Ok(matches.pop()),
            count => Err(StoreError::MultipleRows {
                filter: filter.to_string(),
                count,
            }),
        }
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A scripted provider and a memory store wired to a fresh engine.
#[derive(Default)]
pub struct Harness {
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<MemoryProfileStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an engine with the default 5000 ms ceiling.
    pub fn start(&self) -> SessionSync {
        self.start_with(SyncOptions::default())
    }

    pub fn start_with(&self, options: SyncOptions) -> SessionSync {
        SessionSync::start(
            Arc::clone(&self.provider) as Arc<dyn AuthProvider>,
            ProfileResolver::new(Arc::clone(&self.store) as Arc<dyn ProfileStore>),
            options,
        )
    }
}

/// Let spawned tasks run for `ms` of (paused) time.
pub async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
