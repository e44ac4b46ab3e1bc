//! Username type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`Username`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum UsernameError {
    /// The input is empty or only whitespace.
    #[error("username cannot be empty")]
    Empty,
    /// The input is too long.
    #[error("username must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
}

/// A profile username.
///
/// Registration stores the chosen username both on the profile row and in the
/// identity's metadata, which makes it the fallback key when the email on the
/// two records has diverged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    /// Maximum length of a username.
    pub const MAX_LENGTH: usize = 64;

    /// Parse a `Username`, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`UsernameError::Empty`] for blank input and
    /// [`UsernameError::TooLong`] past [`Self::MAX_LENGTH`] characters.
    pub fn parse(s: &str) -> Result<Self, UsernameError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(UsernameError::Empty);
        }
        if trimmed.chars().count() > Self::MAX_LENGTH {
            return Err(UsernameError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the username as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Username {
    type Error = UsernameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Username> for String {
    fn from(username: Username) -> Self {
        username.0
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Username {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Username {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(&s)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Username {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims() {
        assert_eq!(Username::parse("  alice ").map(String::from), Ok("alice".to_owned()));
    }

    #[test]
    fn test_parse_blank() {
        assert_eq!(Username::parse("   "), Err(UsernameError::Empty));
    }

    #[test]
    fn test_parse_too_long() {
        let long = "x".repeat(Username::MAX_LENGTH + 1);
        assert_eq!(
            Username::parse(&long),
            Err(UsernameError::TooLong {
                max: Username::MAX_LENGTH
            })
        );
    }
}
