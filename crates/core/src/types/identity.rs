//! Authenticated principal as issued by the identity provider.

use serde::{Deserialize, Serialize};

use crate::{Email, IdentityId, Username};

/// Metadata key under which registration records the chosen username.
pub const USERNAME_METADATA_KEY: &str = "username";

/// An authenticated principal for the current session.
///
/// Owned by the identity provider and replaced wholesale on every session
/// event; nothing in Larder mutates one in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    /// Phone-only or anonymous principals have no email.
    pub email: Option<Email>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Identity {
    /// Create an identity with empty metadata.
    #[must_use]
    pub fn new(id: IdentityId, email: Option<Email>) -> Self {
        Self {
            id,
            email,
            metadata: serde_json::Map::new(),
        }
    }

    /// Attach a metadata entry, replacing any previous value for `key`.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    /// The username recorded in metadata, if it is a non-blank string.
    #[must_use]
    pub fn username(&self) -> Option<Username> {
        self.metadata
            .get(USERNAME_METADATA_KEY)
            .and_then(serde_json::Value::as_str)
            .and_then(|raw| Username::parse(raw).ok())
    }
}
