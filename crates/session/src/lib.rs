//! Larder session engine.
//!
//! Keeps the authenticated identity issued by the identity provider and the
//! application profile that belongs to it in step, and exposes the pair as a
//! single observable `{identity, profile, loading}` state.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use larder_session::{GoTrueClient, PgProfileStore, ProfileResolver, SessionSync};
//!
//! let provider = Arc::new(GoTrueClient::new(&config.auth)?);
//! let store = PgProfileStore::new(pool, config.profile_table.clone());
//! let sync = SessionSync::start(
//!     provider,
//!     ProfileResolver::new(Arc::new(store)),
//!     config.sync_options(),
//! );
//!
//! let state = sync.context().wait_until_settled().await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod error;
pub mod guard;
pub mod provider;
pub mod resolver;
pub mod state;
pub mod store;
pub mod sync;

pub use config::{AuthConfig, ConfigError, SessionConfig};
pub use error::SessionError;
pub use provider::{
    AuthEvent, AuthEventKind, AuthProvider, GoTrueClient, ProviderError, SessionSnapshot,
    Subscription,
};
pub use resolver::{LookupAttempt, LookupOutcome, ProfileResolver, Resolution};
pub use state::{SessionPhase, SessionState};
pub use store::{PgProfileStore, ProfileFilter, ProfileStore, ProfileTable, StoreError};
pub use sync::{SessionContext, SessionSync, SignOutOutcome, SyncOptions};
