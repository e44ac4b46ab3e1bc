//! `PostgreSQL` profile store.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::instrument;

use larder_core::Profile;

use super::{ProfileFilter, ProfileStore, StoreError};

/// Longest identifier `PostgreSQL` accepts without truncation.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Errors from parsing a table reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileTableError {
    #[error("table name cannot be empty")]
    Empty,

    #[error("invalid identifier {0:?}: use lowercase letters, digits and underscores")]
    InvalidIdentifier(String),

    #[error("too many parts in {0:?}: expected `table` or `schema.table`")]
    TooManyParts(String),
}

/// A validated `schema.table` reference.
///
/// Only plain lowercase identifiers are accepted, so the rendered name can be
/// spliced into SQL without quoting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileTable {
    schema: String,
    table: String,
}

impl ProfileTable {
    /// Parse `table` (schema `public`) or `schema.table`.
    ///
    /// # Errors
    ///
    /// Returns `ProfileTableError` if any part is not a plain identifier.
    pub fn parse(s: &str) -> Result<Self, ProfileTableError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ProfileTableError::Empty);
        }

        let parts: Vec<&str> = s.split('.').collect();
        let (schema, table) = match parts.as_slice() {
            [table] => ("public", *table),
            [schema, table] => (*schema, *table),
            _ => return Err(ProfileTableError::TooManyParts(s.to_owned())),
        };

        for part in [schema, table] {
            if !is_plain_identifier(part) {
                return Err(ProfileTableError::InvalidIdentifier(part.to_owned()));
            }
        }

        Ok(Self {
            schema: schema.to_owned(),
            table: table.to_owned(),
        })
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self {
            schema: "public".to_owned(),
            table: "profile".to_owned(),
        }
    }
}

impl fmt::Display for ProfileTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

impl FromStr for ProfileTable {
    type Err = ProfileTableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    s.len() <= MAX_IDENTIFIER_LENGTH
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Profile lookups against a `PostgreSQL` table.
///
/// Queries are built at runtime because the table name is configurable.
/// Each lookup fetches at most two rows so that duplicates are detected
/// without scanning every match.
#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
    table: ProfileTable,
    by_email: String,
    by_username: String,
}

impl PgProfileStore {
    /// Create a store reading from `table`.
    #[must_use]
    pub fn new(pool: PgPool, table: ProfileTable) -> Self {
        let select = |column: &str| {
            format!(
                "SELECT id, email, username, first_name, last_name, user_type \
                 FROM {table} WHERE {column} = $1 LIMIT 2"
            )
        };

        Self {
            by_email: select("email"),
            by_username: select("username"),
            pool,
            table,
        }
    }

    /// The table this store reads from.
    #[must_use]
    pub const fn table(&self) -> &ProfileTable {
        &self.table
    }

    fn sql_for(&self, filter: &ProfileFilter) -> &str {
        match filter {
            ProfileFilter::Email(_) => &self.by_email,
            ProfileFilter::Username(_) => &self.by_username,
        }
    }
}

impl fmt::Debug for PgProfileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgProfileStore")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    #[instrument(skip(self), fields(table = %self.table))]
    async fn find_one(&self, filter: &ProfileFilter) -> Result<Option<Profile>, StoreError> {
        let mut rows = sqlx::query_as::<_, Profile>(self.sql_for(filter))
            .bind(filter.value())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                    StoreError::DataCorruption(format!("invalid profile row: {e}"))
                }
                other => StoreError::Database(other),
            })?;

        match rows.len() {
            0 | 1 => Ok(rows.pop()),
            count => Err(StoreError::MultipleRows {
                filter: filter.to_string(),
                count,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table() {
        assert_eq!(ProfileTable::parse("profile").unwrap(), ProfileTable::default());
        assert_eq!(
            ProfileTable::parse("larder.profile").unwrap().to_string(),
            "larder.profile"
        );
        assert_eq!(
            ProfileTable::parse(" _app.profile_v2 ").unwrap().to_string(),
            "_app.profile_v2"
        );
    }

    #[test]
    fn test_parse_table_rejects_unsafe_names() {
        assert_eq!(ProfileTable::parse(""), Err(ProfileTableError::Empty));
        assert!(matches!(
            ProfileTable::parse("a.b.c"),
            Err(ProfileTableError::TooManyParts(_))
        ));
        for bad in ["Profile", "profile;drop", "1profile", "public.", "pro file"] {
            assert!(
                matches!(
                    ProfileTable::parse(bad),
                    Err(ProfileTableError::InvalidIdentifier(_))
                ),
                "{bad} should be rejected"
            );
        }
        assert!(ProfileTable::parse(&"a".repeat(64)).is_err());
    }
}
