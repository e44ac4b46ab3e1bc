//! Profile lookup boundary.
//!
//! The session engine never writes profiles. It only asks the store for the
//! single row matching one column, through [`ProfileStore::find_one`].
//! [`PgProfileStore`] is the `PostgreSQL` implementation.
//!
//! # Migrations
//!
//! The profile table definition lives in `crates/session/migrations/` and is
//! applied with:
//! ```bash
//! cargo run -p larder-cli -- migrate
//! ```

mod postgres;

pub use postgres::{PgProfileStore, ProfileTable, ProfileTableError, create_pool};

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use larder_core::{Email, Profile, Username};

/// Single-column equality filter for a profile lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileFilter {
    Email(Email),
    Username(Username),
}

impl ProfileFilter {
    /// Column name the filter applies to.
    #[must_use]
    pub const fn column(&self) -> &'static str {
        match self {
            Self::Email(_) => "email",
            Self::Username(_) => "username",
        }
    }

    /// The value compared against [`Self::column`].
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Email(email) => email.as_str(),
            Self::Username(username) => username.as_str(),
        }
    }
}

impl fmt::Display for ProfileFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.column(), self.value())
    }
}

/// Errors that can occur during profile lookups.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// More than one profile matched a filter that should be unique.
    #[error("{count} profiles match {filter}")]
    MultipleRows {
        /// The filter that matched, rendered for logs.
        filter: String,
        /// Number of rows seen (lookups stop counting at two).
        count: usize,
    },

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// The store could not be reached for a reason other than the database.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to application profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Find the single profile matching `filter`.
    ///
    /// `Ok(None)` when no row matches. Implementations must return
    /// [`StoreError::MultipleRows`] rather than pick one of several matches.
    async fn find_one(&self, filter: &ProfileFilter) -> Result<Option<Profile>, StoreError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_display() {
        let filter = ProfileFilter::Email(Email::parse("a@b.com").unwrap());
        assert_eq!(filter.to_string(), "email = a@b.com");

        let filter = ProfileFilter::Username(Username::parse("alice").unwrap());
        assert_eq!(filter.column(), "username");
        assert_eq!(filter.value(), "alice");
    }

    #[test]
    fn test_duplicate_rows_display() {
        let duplicate = StoreError::MultipleRows {
            filter: "email = a@b.com".to_owned(),
            count: 2,
        };
        assert_eq!(duplicate.to_string(), "2 profiles match email = a@b.com");
    }
}
