//! User accounts and their access keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

/// Access key metadata.
///
/// The owning map is keyed by the access-key string itself, which is also
/// the token resolved by `user_by_access_key`. Every optional field is
/// serialized as an explicit `null` when unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKey {
    pub name: String,
    pub expires: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub last_access: Option<DateTime<Utc>>,
    pub created_time: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub friendly_name: Option<String>,
    pub id: Option<String>,
}

impl AccessKey {
    /// A key with only its name set; all metadata is null.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expires: None,
            description: None,
            last_access: None,
            created_time: None,
            created_by: None,
            friendly_name: None,
            id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub linked_providers: Vec<String>,
    pub access_keys: BTreeMap<String, AccessKey>,
}

impl User {
    pub fn has_access_key(&self, token: &str) -> bool {
        self.access_keys.contains_key(token)
    }
}

/// Request to create a user.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    #[validate(length(min = 1, message = "email must not be empty"))]
    pub email: String,
    #[serde(default)]
    pub name: String,
    /// Falls back to the configured default providers when `None`.
    #[serde(default)]
    pub linked_providers: Option<Vec<String>>,
    #[serde(default)]
    pub access_keys: BTreeMap<String, AccessKey>,
}

impl NewUser {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_access_key(mut self, token: impl Into<String>, key: AccessKey) -> Self {
        self.access_keys.insert(token.into(), key);
        self
    }
}

/// Changes applied by `update_user`.
///
/// `access_keys` replaces the stored mapping entirely. `linked_providers`
/// entries are appended when not already present. The email never changes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub linked_providers: Vec<String>,
    #[serde(default)]
    pub access_keys: BTreeMap<String, AccessKey>,
}

impl From<User> for UserUpdate {
    fn from(user: User) -> Self {
        Self {
            name: Some(user.name),
            linked_providers: user.linked_providers,
            access_keys: user.access_keys,
        }
    }
}
