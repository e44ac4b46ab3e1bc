//! The published session state.

use serde::Serialize;

use larder_core::{Identity, Profile};

/// What consumers see: who is signed in, their profile, and whether that
/// pairing is still being worked out.
///
/// `identity == None` always implies `profile == None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl SessionState {
    /// State before the first snapshot has been handled.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            identity: None,
            profile: None,
            loading: true,
        }
    }

    /// Settled state with nobody signed in.
    #[must_use]
    pub const fn unauthenticated() -> Self {
        Self {
            identity: None,
            profile: None,
            loading: false,
        }
    }

    /// Where the state sits in the session lifecycle.
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        match (&self.identity, self.loading) {
            (None, true) => SessionPhase::Init,
            (None, false) => SessionPhase::Unauthenticated,
            (Some(_), true) => SessionPhase::Resolving,
            (Some(_), false) => SessionPhase::Ready,
        }
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Lifecycle phase derived from [`SessionState`].
///
/// `Ready` covers both "profile found" and "signed in without a profile";
/// check [`SessionState::profile`] to tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Init,
    Resolving,
    Ready,
    Unauthenticated,
}
