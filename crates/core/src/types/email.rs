//! Email address type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing an [`Email`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EmailError {
    /// The input string is empty.
    #[error("email cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("email must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input does not contain an @ symbol.
    #[error("email must contain an @ symbol")]
    MissingAtSymbol,
    /// The input contains more than one @ symbol.
    #[error("email must contain exactly one @ symbol")]
    MultipleAtSymbols,
    /// The local part (before @) is empty.
    #[error("email local part cannot be empty")]
    EmptyLocalPart,
    /// The domain part (after @) is empty.
    #[error("email domain cannot be empty")]
    EmptyDomain,
}

/// An email address as reported by the identity provider or stored on a profile.
///
/// Profile lookups compare emails verbatim, so no case folding happens here;
/// the provider is expected to hand out normalized addresses.
///
/// ## Constraints
///
/// - Length: 1-254 characters (RFC 5321 limit)
/// - Exactly one @ symbol with non-empty local part and domain
///
/// ## Examples
///
/// ```
/// use larder_core::Email;
///
/// assert!(Email::parse("a@b.com").is_ok());
/// assert!(Email::parse("chef+orders@larder.app").is_ok());
///
/// assert!(Email::parse("").is_err());
/// assert!(Email::parse("no-at-symbol").is_err());
/// assert!(Email::parse("two@@larder.app").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Maximum length of an email address (RFC 5321).
    pub const MAX_LENGTH: usize = 254;

    /// Parse an `Email` from a string.
    ///
    /// # Errors
    ///
    /// Returns an [`EmailError`] describing the first constraint the input violates.
    pub fn parse(s: &str) -> Result<Self, EmailError> {
        if s.is_empty() {
            return Err(EmailError::Empty);
        }

        if s.len() > Self::MAX_LENGTH {
            return Err(EmailError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        let (local, domain) = s.split_once('@').ok_or(EmailError::MissingAtSymbol)?;

        if domain.contains('@') {
            return Err(EmailError::MultipleAtSymbols);
        }
        if local.is_empty() {
            return Err(EmailError::EmptyLocalPart);
        }
        if domain.is_empty() {
            return Err(EmailError::EmptyDomain);
        }

        Ok(Self(s.to_owned()))
    }

    /// Returns the email address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `Email` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Returns the domain part of the email (after the @).
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.split_once('@').map_or("", |(_, domain)| domain)
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Email {
    type Err = EmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Email {
    type Error = EmailError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

impl AsRef<str> for Email {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// SQLx support (with postgres feature)
#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Email {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Email {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self::parse(&s)?)
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Email {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_emails() {
        assert!(Email::parse("a@b.com").is_ok());
        assert!(Email::parse("chef.name@larder.app").is_ok());
        assert!(Email::parse("chef+orders@larder.app").is_ok());
        assert!(Email::parse("owner@kitchen.example.co.uk").is_ok());
    }

    #[test]
    fn test_parse_rejections() {
        assert_eq!(Email::parse(""), Err(EmailError::Empty));
        assert_eq!(
            Email::parse("no-at-symbol"),
            Err(EmailError::MissingAtSymbol)
        );
        assert_eq!(
            Email::parse("two@@larder.app"),
            Err(EmailError::MultipleAtSymbols)
        );
        assert_eq!(Email::parse("@larder.app"), Err(EmailError::EmptyLocalPart));
        assert_eq!(Email::parse("chef@"), Err(EmailError::EmptyDomain));
    }

    #[test]
    fn test_parse_too_long() {
        let long = format!("{}@larder.app", "a".repeat(250));
        assert!(matches!(
            Email::parse(&long),
            Err(EmailError::TooLong { max: 254 })
        ));
    }

    #[test]
    fn test_domain() {
        let email = Email::parse("chef@larder.app").unwrap();
        assert_eq!(email.domain(), "larder.app");
    }

    #[test]
    fn test_case_is_preserved() {
        let email = Email::parse("Chef@Larder.app").unwrap();
        assert_eq!(email.as_str(), "Chef@Larder.app");
        assert_ne!(email, Email::parse("chef@larder.app").unwrap());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Email = serde_json::from_str("\"a@b.com\"").unwrap();
        assert_eq!(ok.to_string(), "a@b.com");

        let err = serde_json::from_str::<Email>("\"not-an-email\"");
        assert!(err.is_err());
    }
}
