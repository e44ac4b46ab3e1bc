//! Session synchronization engine.
//!
//! [`SessionSync`] owns one application session. On start it subscribes to
//! the provider's lifecycle events, fetches the current session once, and from
//! then on keeps a single `{identity, profile, loading}` state in step with
//! the provider:
//!
//! ```text
//! INIT ──snapshot present──▶ RESOLVING ──resolved / ceiling──▶ READY
//!   │                            ▲                               │
//!   └──snapshot absent──▶ UNAUTHENTICATED ◀──sign-out / expiry───┘
//!                                └────────new identity───────────▶ RESOLVING
//! ```
//!
//! Every accepted event bumps a generation counter. A profile resolution
//! captures the generation it started under and may only commit while that
//! generation is still current, so a slow lookup for an old identity can never
//! overwrite a newer state. Consumers get a [`SessionContext`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use larder_core::{Identity, Profile};

use crate::error::{SessionError, add_breadcrumb, clear_sentry_user, set_sentry_user};
use crate::guard::LoadingGuard;
use crate::provider::{AuthEventKind, AuthProvider, ProviderError, Subscription};
use crate::resolver::ProfileResolver;
use crate::state::{SessionPhase, SessionState};

/// Default ceiling on how long `loading` may stay raised.
pub const DEFAULT_LOADING_TIMEOUT: Duration = Duration::from_millis(5000);

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Longest time consumers may observe `loading = true`.
    pub loading_timeout: Duration,
    /// Where consumers should navigate after [`SessionContext::sign_out`].
    pub signed_out_redirect: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            loading_timeout: DEFAULT_LOADING_TIMEOUT,
            signed_out_redirect: "/".to_string(),
        }
    }
}

/// Result of [`SessionContext::sign_out`].
///
/// The local session is always cleared. `remote_error` carries the provider
/// failure, if any, so the caller can tell the user the server-side session
/// may still be valid.
#[derive(Debug)]
pub struct SignOutOutcome {
    pub redirect_to: String,
    pub remote_error: Option<ProviderError>,
}

struct Inner {
    generation: u64,
    state: SessionState,
    guard: LoadingGuard,
    disposed: bool,
    /// Dropped on teardown so that change streams end.
    publisher: Option<watch::Sender<SessionState>>,
}

struct Shared {
    provider: Arc<dyn AuthProvider>,
    resolver: ProfileResolver,
    options: SyncOptions,
    inner: Mutex<Inner>,
    changes: watch::Receiver<SessionState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(inner: &mut Inner, state: SessionState) {
        inner.state = state;
        if let Some(publisher) = &inner.publisher {
            publisher.send_replace(inner.state.clone());
        }
    }

    /// Feed one lifecycle event (or the bootstrap snapshot) into the engine.
    fn accept(self: &Arc<Self>, kind: AuthEventKind, identity: Option<Identity>) {
        let mut inner = self.lock();
        if inner.disposed {
            debug!(kind = kind.as_str(), "ignoring auth event after teardown");
            return;
        }

        inner.generation += 1;
        let generation = inner.generation;

        let Some(identity) = identity else {
            inner.guard.cancel();
            Self::publish(&mut inner, SessionState::unauthenticated());
            drop(inner);

            info!(generation, kind = kind.as_str(), "session ended");
            clear_sentry_user();
            add_breadcrumb("session", kind.as_str(), None);
            return;
        };

        let same_identity = inner
            .state
            .identity
            .as_ref()
            .is_some_and(|current| current.id == identity.id);
        let profile = if same_identity {
            inner.state.profile.clone()
        } else {
            None
        };

        self.arm_guard(&mut inner);

        Self::publish(
            &mut inner,
            SessionState {
                identity: Some(identity.clone()),
                profile,
                loading: true,
            },
        );
        drop(inner);

        info!(
            generation,
            kind = kind.as_str(),
            identity_id = %identity.id,
            "resolving profile"
        );
        add_breadcrumb("session", kind.as_str(), None);

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let profile = shared.resolver.resolve(&identity).await;
            shared.commit_resolution(generation, identity, profile);
        });
    }

    /// Start a new loading cycle on the guard.
    fn arm_guard(self: &Arc<Self>, inner: &mut Inner) {
        let weak: Weak<Self> = Arc::downgrade(self);
        inner.guard.arm(move |ticket| {
            if let Some(shared) = weak.upgrade() {
                shared.expire_loading(ticket);
            }
        });
    }

    /// Commit a resolved profile if `generation` is still current.
    fn commit_resolution(&self, generation: u64, identity: Identity, profile: Option<Profile>) {
        let mut inner = self.lock();
        if inner.disposed {
            debug!(generation, "dropping resolution after teardown");
            return;
        }
        if inner.generation != generation {
            debug!(
                generation,
                current = inner.generation,
                "discarding superseded resolution"
            );
            return;
        }

        inner.guard.cancel();
        match &profile {
            Some(profile) => set_sentry_user(&profile.id, Some(profile.email.as_str())),
            None => set_sentry_user(&identity.id, identity.email.as_ref().map(|e| e.as_str())),
        }
        let profile_id = profile.as_ref().map(|p| p.id.to_string());
        Self::publish(
            &mut inner,
            SessionState {
                identity: Some(identity),
                profile,
                loading: false,
            },
        );
        drop(inner);

        match profile_id {
            Some(profile_id) => info!(generation, %profile_id, "profile committed"),
            None => info!(generation, "signed in without a matching profile"),
        }
    }

    /// Expiry callback of the loading guard.
    fn expire_loading(&self, ticket: u64) {
        let mut inner = self.lock();
        if inner.disposed || !inner.guard.disarm_fired(ticket) || !inner.state.loading {
            return;
        }

        let mut state = inner.state.clone();
        state.loading = false;
        Self::publish(&mut inner, state);
        let generation = inner.generation;
        let ceiling = inner.guard.ceiling();
        drop(inner);

        info!(generation, ?ceiling, "loading ceiling reached, settling without profile");
    }

    fn dispose(&self) -> bool {
        let mut inner = self.lock();
        if inner.disposed {
            return false;
        }
        inner.disposed = true;
        inner.guard.cancel();
        inner.publisher = None;
        true
    }

    fn is_disposed(&self) -> bool {
        self.lock().disposed
    }
}

/// Owner of a running session engine.
///
/// Dropping it tears the engine down, the same as [`SessionSync::dispose`].
pub struct SessionSync {
    shared: Arc<Shared>,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl SessionSync {
    /// Start the engine: subscribe to provider events, then fetch and handle
    /// the current session in the background.
    ///
    /// The loading ceiling already covers the fetch. If the provider has not
    /// answered by then, the state settles as signed out and the late answer
    /// is still accepted when it arrives.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        provider: Arc<dyn AuthProvider>,
        resolver: ProfileResolver,
        options: SyncOptions,
    ) -> Self {
        let (publisher, changes) = watch::channel(SessionState::initial());
        let shared = Arc::new(Shared {
            provider,
            resolver,
            inner: Mutex::new(Inner {
                generation: 0,
                state: SessionState::initial(),
                guard: LoadingGuard::new(options.loading_timeout),
                disposed: false,
                publisher: Some(publisher),
            }),
            options,
            changes,
        });

        // The bootstrap fetch is a loading cycle of its own.
        {
            let mut inner = shared.lock();
            shared.arm_guard(&mut inner);
        }

        // Subscribe before fetching the snapshot so no event is missed.
        let subscription = match shared.provider.subscribe() {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                error!(error = %e, "failed to subscribe to auth events");
                None
            }
        };

        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run(
            Arc::clone(&shared),
            subscription,
            Arc::clone(&shutdown),
        ));

        Self {
            shared,
            shutdown,
            task: Some(task),
        }
    }

    /// A handle for consumers.
    #[must_use]
    pub fn context(&self) -> SessionContext {
        SessionContext {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Tear the engine down: stop the event loop, unsubscribe, cancel the
    /// loading guard, and end every change stream. No state changes after
    /// this returns. Calling it again is a no-op.
    pub fn dispose(&self) {
        if self.shared.dispose() {
            info!("session engine disposed");
            self.shutdown.notify_one();
        }
    }

    /// Dispose and wait for the event loop to finish unsubscribing.
    pub async fn shutdown(mut self) {
        self.dispose();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "session event loop ended abnormally");
        }
    }
}

impl Drop for SessionSync {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for SessionSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSync")
            .field("disposed", &self.shared.is_disposed())
            .finish_non_exhaustive()
    }
}

async fn run(shared: Arc<Shared>, subscription: Option<Subscription>, shutdown: Arc<Notify>) {
    let snapshot = tokio::select! {
        biased;
        () = shutdown.notified() => None,
        result = shared.provider.current_session() => match result {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "failed to fetch current session, treating as signed out");
                Some(None)
            }
        },
    };

    let Some(snapshot) = snapshot else {
        return;
    };
    shared.accept(
        AuthEventKind::InitialSession,
        snapshot.map(|snapshot| snapshot.identity),
    );

    let Some(mut subscription) = subscription else {
        return;
    };

    loop {
        tokio::select! {
            biased;
            () = shutdown.notified() => break,
            event = subscription.next() => {
                let Some(event) = event else {
                    warn!("auth event stream closed by provider");
                    break;
                };
                debug!(kind = event.kind.as_str(), "auth event received");
                shared.accept(event.kind, event.session.map(|session| session.identity));
            }
        }
    }

    subscription.dispose();
}

/// Consumer handle to the session state. Cheap to clone.
#[derive(Clone)]
pub struct SessionContext {
    shared: Arc<Shared>,
}

impl SessionContext {
    /// The current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.lock().state.clone()
    }

    /// A stream of state changes. It ends when the engine is disposed.
    ///
    /// The current state counts as seen, so `changed()` waits for the next
    /// transition.
    #[must_use]
    pub fn changes(&self) -> watch::Receiver<SessionState> {
        let mut changes = self.shared.changes.clone();
        changes.borrow_and_update();
        changes
    }

    /// Number of lifecycle transitions accepted so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.shared.lock().state.phase()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    /// Wait until `loading` is false and return that state.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` if the engine is torn down first.
    pub async fn wait_until_settled(&self) -> Result<SessionState, SessionError> {
        let mut changes = self.changes();
        changes
            .wait_for(|state| !state.loading)
            .await
            .map(|state| state.clone())
            .map_err(|_| SessionError::Disposed)
    }

    /// Look the profile up again for the current identity.
    ///
    /// Runs inline and does not raise `loading`. A no-op when nobody is
    /// signed in. The result is dropped if another event lands first.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` after teardown.
    #[instrument(skip_all)]
    pub async fn refresh_profile(&self) -> Result<(), SessionError> {
        let (generation, identity) = {
            let mut inner = self.shared.lock();
            if inner.disposed {
                return Err(SessionError::Disposed);
            }
            let Some(identity) = inner.state.identity.clone() else {
                debug!("refresh requested without an identity");
                return Ok(());
            };
            inner.generation += 1;
            (inner.generation, identity)
        };

        debug!(generation, identity_id = %identity.id, "refreshing profile");
        let profile = self.shared.resolver.resolve(&identity).await;
        self.shared.commit_resolution(generation, identity, profile);
        Ok(())
    }

    /// Sign out at the provider, then clear the local session regardless of
    /// the provider's answer.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Disposed` after teardown. Provider failures are
    /// reported in [`SignOutOutcome::remote_error`] instead.
    #[instrument(skip_all)]
    pub async fn sign_out(&self) -> Result<SignOutOutcome, SessionError> {
        if self.shared.is_disposed() {
            return Err(SessionError::Disposed);
        }

        let remote_error = match self.shared.provider.sign_out().await {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "remote sign-out failed, clearing local session anyway");
                Some(e)
            }
        };

        let generation = {
            let mut inner = self.shared.lock();
            if inner.disposed {
                return Err(SessionError::Disposed);
            }
            inner.generation += 1;
            inner.guard.cancel();
            Shared::publish(&mut inner, SessionState::unauthenticated());
            inner.generation
        };

        info!(generation, "signed out");
        clear_sentry_user();
        add_breadcrumb("session", "sign_out", None);

        Ok(SignOutOutcome {
            redirect_to: self.shared.options.signed_out_redirect.clone(),
            remote_error,
        })
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
