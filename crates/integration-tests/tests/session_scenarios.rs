//! End-to-end session scenarios.
//!
//! Each test drives a real engine through the scripted provider and the
//! memory store under Tokio's paused clock, so timings are exact.

#![allow(clippy::unwrap_used)]

use larder_core::{ProfileId, UserType};
use larder_integration_tests::{Harness, advance, identity, profile, snapshot};
use larder_session::{SessionPhase, SessionState};

// =============================================================================
// Bootstrap
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_email_match_resolves_profile() {
    let harness = Harness::new();
    harness
        .store
        .insert(profile(7, "a@b.com", "alice", UserType::Customer));
    harness
        .provider
        .set_snapshot(Some(snapshot(identity(Some("a@b.com"), None))));

    let sync = harness.start();
    let state = sync.context().wait_until_settled().await.unwrap();

    let profile = state.profile.unwrap();
    assert_eq!(profile.id, ProfileId::new(7));
    assert_eq!(profile.user_type, UserType::Customer);
    assert!(!state.loading);
    assert_eq!(harness.store.columns(), ["email"]);
}

#[tokio::test(start_paused = true)]
async fn test_username_fallback_resolves_profile() {
    let harness = Harness::new();
    harness
        .store
        .insert(profile(9, "other@b.com", "alice", UserType::Shop));
    harness
        .provider
        .set_snapshot(Some(snapshot(identity(Some("a@b.com"), Some("alice")))));

    let sync = harness.start();
    let state = sync.context().wait_until_settled().await.unwrap();

    assert_eq!(state.profile.unwrap().id, ProfileId::new(9));
    assert_eq!(harness.store.columns(), ["email", "username"]);
}

#[tokio::test(start_paused = true)]
async fn test_no_match_keeps_identity_without_profile() {
    let harness = Harness::new();
    let who = identity(Some("a@b.com"), Some("alice"));
    let who_id = who.id;
    harness.provider.set_snapshot(Some(snapshot(who)));

    let sync = harness.start();
    let context = sync.context();
    let state = context.wait_until_settled().await.unwrap();

    assert_eq!(state.identity.unwrap().id, who_id);
    assert!(state.profile.is_none());
    assert_eq!(context.phase(), SessionPhase::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_no_session_settles_unauthenticated() {
    let harness = Harness::new();

    let sync = harness.start();
    let context = sync.context();
    let state = context.wait_until_settled().await.unwrap();

    assert_eq!(state, SessionState::unauthenticated());
    assert_eq!(context.phase(), SessionPhase::Unauthenticated);
    assert!(harness.store.calls().is_empty());
}

// =============================================================================
// Races
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sign_out_during_resolution_wins() {
    let harness = Harness::new();
    harness
        .store
        .insert(profile(7, "a@b.com", "alice", UserType::Customer));
    harness.store.set_latency(std::time::Duration::from_millis(1000));
    harness
        .provider
        .set_snapshot(Some(snapshot(identity(Some("a@b.com"), None))));

    let sync = harness.start();
    let context = sync.context();
    advance(100).await;
    let before = context.generation();
    assert_eq!(context.phase(), SessionPhase::Resolving);

    let outcome = context.sign_out().await.unwrap();
    assert!(outcome.remote_error.is_none());
    assert!(context.generation() > before);

    // The lookup started before sign-out finishes now and must be dropped.
    advance(2000).await;
    assert_eq!(context.state(), SessionState::unauthenticated());
}

#[tokio::test(start_paused = true)]
async fn test_slow_lookup_settles_at_ceiling_then_commits() {
    let harness = Harness::new();
    harness
        .store
        .insert(profile(7, "a@b.com", "alice", UserType::Customer));
    harness.store.set_latency(std::time::Duration::from_millis(6000));
    harness
        .provider
        .set_snapshot(Some(snapshot(identity(Some("a@b.com"), None))));

    let sync = harness.start();
    let context = sync.context();

    advance(4999).await;
    assert!(context.state().loading);

    advance(2).await;
    let state = context.state();
    assert!(!state.loading);
    assert!(state.identity.is_some());
    assert!(state.profile.is_none());

    advance(1000).await;
    let state = context.state();
    assert_eq!(state.profile.unwrap().id, ProfileId::new(7));
    assert!(!state.loading);
}
