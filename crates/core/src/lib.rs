//! Larder Core - Shared types library.
//!
//! This crate provides the domain types shared by the Larder session engine,
//! its adapters and its tooling:
//! - `session` - Identity/profile synchronization engine
//! - `cli` - Command-line tools for migrations and session inspection
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. The optional `postgres` feature adds `sqlx` encoding
//! so the same types can be read straight out of the profile table.
//!
//! # Modules
//!
//! - [`types`] - Validated emails and usernames, typed IDs, identities and profiles

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
