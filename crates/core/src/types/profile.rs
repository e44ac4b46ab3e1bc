//! Application profile record.

use serde::{Deserialize, Serialize};

use crate::{Email, ProfileId, UserType, Username};

/// The application-owned description of a user: display attributes and role.
///
/// Profiles are created by the registration flow and only ever read by the
/// session engine. They are keyed by `id`, separately from the provider's
/// identity subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Profile {
    pub id: ProfileId,
    pub email: Email,
    pub username: Username,
    pub first_name: String,
    pub last_name: String,
    pub user_type: UserType,
}

impl Profile {
    /// Get the profile's display name, falling back to the username.
    #[must_use]
    pub fn display_name(&self) -> String {
        match (self.first_name.trim(), self.last_name.trim()) {
            ("", "") => self.username.to_string(),
            (first, "") => first.to_owned(),
            ("", last) => last.to_owned(),
            (first, last) => format!("{first} {last}"),
        }
    }

    /// Whether this profile operates a shop.
    #[must_use]
    pub fn is_shop(&self) -> bool {
        self.user_type == UserType::Shop
    }
}
