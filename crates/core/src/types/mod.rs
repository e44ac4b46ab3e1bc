//! Core types for Larder.
//!
//! This module provides type-safe wrappers for the identity and profile domain.

pub mod email;
pub mod id;
pub mod identity;
pub mod profile;
pub mod user_type;
pub mod username;

pub use email::{Email, EmailError};
pub use id::*;
pub use identity::{Identity, USERNAME_METADATA_KEY};
pub use profile::Profile;
pub use user_type::UserType;
pub use username::{Username, UsernameError};
