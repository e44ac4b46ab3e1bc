//! Identity to profile resolution.
//!
//! A profile is found by walking an ordered list of lookup strategies. Each
//! strategy turns the identity into at most one [`ProfileFilter`]; the first
//! filter that matches exactly one row wins. With the default strategies the
//! chain is:
//!
//! 1. the identity's email
//! 2. the username recorded in the identity's metadata at registration
//!
//! Failures never escape: a store error or duplicate rows count as "not
//! found" for that step and the walk continues.

use std::sync::Arc;

use tracing::{debug, error, warn};

use larder_core::{Identity, Profile};

use crate::store::{ProfileFilter, ProfileStore, StoreError};

/// Derives the filter for one lookup step, or `None` to skip the step.
pub type LookupStrategy = fn(&Identity) -> Option<ProfileFilter>;

/// Look the profile up by the identity's email.
#[must_use]
pub fn by_email(identity: &Identity) -> Option<ProfileFilter> {
    identity.email.clone().map(ProfileFilter::Email)
}

/// Look the profile up by the username stored in identity metadata.
#[must_use]
pub fn by_username(identity: &Identity) -> Option<ProfileFilter> {
    identity.username().map(ProfileFilter::Username)
}

/// The default lookup chain: email, then username.
pub const DEFAULT_STRATEGIES: [LookupStrategy; 2] = [by_email, by_username];

/// Outcome of a single lookup step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found,
    NotFound,
    /// The store failed; the message is kept for diagnostics.
    Failed(String),
    /// More than one row matched.
    Ambiguous { count: usize },
}

/// One executed lookup step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupAttempt {
    pub filter: ProfileFilter,
    pub outcome: LookupOutcome,
}

/// Full record of a resolution: the profile, if any, and every step taken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub profile: Option<Profile>,
    pub attempts: Vec<LookupAttempt>,
}

/// Maps identities to profiles through a [`ProfileStore`].
///
/// Holds no cache; every call goes to the store.
#[derive(Clone)]
pub struct ProfileResolver {
    store: Arc<dyn ProfileStore>,
    strategies: Arc<[LookupStrategy]>,
}

impl ProfileResolver {
    /// Create a resolver using [`DEFAULT_STRATEGIES`].
    #[must_use]
    pub fn new(store: Arc<dyn ProfileStore>) -> Self {
        Self::with_strategies(store, DEFAULT_STRATEGIES.to_vec())
    }

    /// Create a resolver with a custom lookup chain, tried in order.
    #[must_use]
    pub fn with_strategies(store: Arc<dyn ProfileStore>, strategies: Vec<LookupStrategy>) -> Self {
        Self {
            store,
            strategies: strategies.into(),
        }
    }

    /// Resolve `identity` to its profile.
    pub async fn resolve(&self, identity: &Identity) -> Option<Profile> {
        self.resolve_detailed(identity).await.profile
    }

    /// Resolve `identity`, recording the outcome of every step attempted.
    pub async fn resolve_detailed(&self, identity: &Identity) -> Resolution {
        let mut resolution = Resolution::default();

        for (step, strategy) in self.strategies.iter().enumerate() {
            let Some(filter) = strategy(identity) else {
                continue;
            };

            let outcome = match self.store.find_one(&filter).await {
                Ok(Some(profile)) => {
                    debug!(
                        identity_id = %identity.id,
                        profile_id = %profile.id,
                        step,
                        %filter,
                        "profile resolved"
                    );
                    resolution.profile = Some(profile);
                    LookupOutcome::Found
                }
                Ok(None) => {
                    debug!(identity_id = %identity.id, step, %filter, "no profile matches");
                    LookupOutcome::NotFound
                }
                Err(StoreError::MultipleRows { count, .. }) => {
                    error!(
                        identity_id = %identity.id,
                        step,
                        %filter,
                        count,
                        "duplicate profiles for a unique lookup, ignoring step"
                    );
                    LookupOutcome::Ambiguous { count }
                }
                Err(e) => {
                    warn!(identity_id = %identity.id, step, %filter, error = %e, "profile lookup failed");
                    LookupOutcome::Failed(e.to_string())
                }
            };

            resolution.attempts.push(LookupAttempt { filter, outcome });
            if resolution.profile.is_some() {
                break;
            }
        }

        resolution
    }
}

impl std::fmt::Debug for ProfileResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileResolver")
            .field("strategies", &self.strategies.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use uuid::Uuid;

    use larder_core::{Email, IdentityId, ProfileId, USERNAME_METADATA_KEY, UserType, Username};

    use super::*;

    /// Store answering from a fixed table of results keyed by filter text.
    #[derive(Default)]
    struct FixedStore {
        answers: HashMap<String, Result<Option<Profile>, &'static str>>,
        calls: Mutex<Vec<String>>,
    }

    impl FixedStore {
        fn answer(mut self, filter: &str, answer: Result<Option<Profile>, &'static str>) -> Self {
            self.answers.insert(filter.to_owned(), answer);
            self
        }
    }

    #[async_trait]
    impl ProfileStore for FixedStore {
        async fn find_one(&self, filter: &ProfileFilter) -> Result<Option<Profile>, StoreError> {
            let key = filter.to_string();
            self.calls.lock().unwrap().push(key.clone());
            match self.answers.get(&key) {
                None | Some(Ok(None)) => Ok(None),
                Some(Ok(Some(profile))) => Ok(Some(profile.clone())),
                Some(Err("duplicate")) => Err(StoreError::MultipleRows {
                    filter: key,
                    count: 2,
                }),
                Some(Err(message)) => Err(StoreError::Unavailable((*message).to_owned())),
            }
        }
    }

    fn profile(id: i32) -> Profile {
        Profile {
            id: ProfileId::new(id),
            email: Email::parse("a@b.com").unwrap(),
            username: Username::parse("alice").unwrap(),
            first_name: "Alice".to_owned(),
            last_name: "Liddell".to_owned(),
            user_type: UserType::Customer,
        }
    }

    fn identity(email: Option<&str>, username: Option<&str>) -> Identity {
        let identity = Identity::new(
            IdentityId::new(Uuid::nil()),
            email.map(|e| Email::parse(e).unwrap()),
        );
        match username {
            Some(username) => identity.with_metadata(USERNAME_METADATA_KEY, username),
            None => identity,
        }
    }

    async fn run(store: FixedStore, identity: &Identity) -> (Resolution, Vec<String>) {
        let store = Arc::new(store);
        let resolver = ProfileResolver::new(store.clone());
        let resolution = resolver.resolve_detailed(identity).await;
        let calls = store.calls.lock().unwrap().clone();
        (resolution, calls)
    }

    #[tokio::test]
    async fn test_email_match_skips_username() {
        let store = FixedStore::default().answer("email = a@b.com", Ok(Some(profile(7))));
        let (resolution, calls) = run(store, &identity(Some("a@b.com"), Some("alice"))).await;

        assert_eq!(resolution.profile.unwrap().id, ProfileId::new(7));
        assert_eq!(calls, ["email = a@b.com"]);
    }

    #[tokio::test]
    async fn test_username_fallback() {
        let store = FixedStore::default().answer("username = alice", Ok(Some(profile(9))));
        let (resolution, calls) = run(store, &identity(Some("a@b.com"), Some("alice"))).await;

        assert_eq!(resolution.profile.unwrap().id, ProfileId::new(9));
        assert_eq!(calls, ["email = a@b.com", "username = alice"]);
        assert_eq!(resolution.attempts[0].outcome, LookupOutcome::NotFound);
        assert_eq!(resolution.attempts[1].outcome, LookupOutcome::Found);
    }

    #[tokio::test]
    async fn test_no_username_means_single_lookup() {
        let (resolution, calls) = run(FixedStore::default(), &identity(Some("a@b.com"), None)).await;
        assert!(resolution.profile.is_none());
        assert_eq!(calls, ["email = a@b.com"]);
    }

    #[tokio::test]
    async fn test_missing_email_goes_straight_to_username() {
        let store = FixedStore::default().answer("username = alice", Ok(Some(profile(9))));
        let (resolution, calls) = run(store, &identity(None, Some("alice"))).await;
        assert!(resolution.profile.is_some());
        assert_eq!(calls, ["username = alice"]);
    }

    #[tokio::test]
    async fn test_store_failure_falls_through() {
        let store = FixedStore::default()
            .answer("email = a@b.com", Err("connection reset"))
            .answer("username = alice", Ok(Some(profile(9))));
        let (resolution, _) = run(store, &identity(Some("a@b.com"), Some("alice"))).await;

        assert!(matches!(
            resolution.attempts[0].outcome,
            LookupOutcome::Failed(ref message) if message.contains("connection reset")
        ));
        assert_eq!(resolution.profile.unwrap().id, ProfileId::new(9));
    }

    #[tokio::test]
    async fn test_duplicates_are_ambiguous() {
        let store = FixedStore::default()
            .answer("email = a@b.com", Err("duplicate"))
            .answer("username = alice", Err("duplicate"));
        let (resolution, _) = run(store, &identity(Some("a@b.com"), Some("alice"))).await;

        assert!(resolution.profile.is_none());
        assert!(
            resolution
                .attempts
                .iter()
                .all(|a| a.outcome == LookupOutcome::Ambiguous { count: 2 })
        );
    }

    #[tokio::test]
    async fn test_custom_strategies() {
        let store = Arc::new(
            FixedStore::default().answer("username = alice", Ok(Some(profile(9)))),
        );
        let resolver = ProfileResolver::with_strategies(store.clone(), vec![by_username]);

        let found = resolver
            .resolve(&identity(Some("a@b.com"), Some("alice")))
            .await;

        assert!(found.is_some());
        assert_eq!(*store.calls.lock().unwrap(), ["username = alice"]);
    }
}
