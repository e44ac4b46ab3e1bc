//! Profile role.

use serde::{Deserialize, Serialize};

/// Whether a profile belongs to a shop (publishes menu items, receives orders)
/// or to a customer (keeps carts, favorites and orders).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "user_type", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Shop,
    Customer,
}

impl UserType {
    /// The wire/database spelling of this role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shop => "shop",
            Self::Customer => "customer",
        }
    }
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shop" => Ok(Self::Shop),
            "customer" => Ok(Self::Customer),
            _ => Err(format!("invalid user type: {s}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_from_str() {
        for user_type in [UserType::Shop, UserType::Customer] {
            assert_eq!(user_type.to_string().parse::<UserType>(), Ok(user_type));
        }
        assert!("admin".parse::<UserType>().is_err());
    }

    #[test]
    fn test_serde_snake_case() {
        assert_eq!(serde_json::to_string(&UserType::Shop).unwrap(), "\"shop\"");
        let parsed: UserType = serde_json::from_str("\"customer\"").unwrap();
        assert_eq!(parsed, UserType::Customer);
    }
}
