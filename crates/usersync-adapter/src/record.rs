//! User record types
//!
//! Records exchanged between the engine and identity adapters. The engine only
//! reads the identity fields (`username`, `email`); everything else is carried
//! opaquely in `attributes` so that conflict payloads can be persisted and
//! replayed later.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Key used to look a user up in an identity system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserKey {
    /// Login name.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Identifier native to the system the key was taken from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_id: Option<String>,
}

impl UserKey {
    /// Create a key from username and email.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            native_id: None,
        }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.username, self.email)
    }
}

/// Lightweight listing item returned by `list_users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDescriptor {
    /// Login name.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Identifier native to the listing system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_id: Option<String>,
}

impl UserDescriptor {
    /// Create a descriptor from username and email.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            native_id: None,
        }
    }

    /// Attach the native identifier.
    pub fn with_native_id(mut self, native_id: impl Into<String>) -> Self {
        self.native_id = Some(native_id.into());
        self
    }

    /// Lookup key for this descriptor.
    pub fn key(&self) -> UserKey {
        UserKey {
            username: self.username.clone(),
            email: self.email.clone(),
            native_id: self.native_id.clone(),
        }
    }
}

/// Full identity record as produced by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Login name.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Identifier native to the system that produced the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_id: Option<String>,
    /// Adapter-defined attributes (display name, password hash, groups, ...).
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl UserRecord {
    /// Create a record with no extra attributes.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            native_id: None,
            attributes: Map::new(),
        }
    }

    /// Attach the native identifier.
    pub fn with_native_id(mut self, native_id: impl Into<String>) -> Self {
        self.native_id = Some(native_id.into());
        self
    }

    /// Set an attribute using builder pattern.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Get an attribute value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Lookup key for this record. The native id is dropped because it is only
    /// meaningful inside the system that produced the record.
    pub fn key(&self) -> UserKey {
        UserKey::new(self.username.clone(), self.email.clone())
    }

    /// Lookup key including the native id, for re-reading from the same system.
    pub fn native_key(&self) -> UserKey {
        UserKey {
            username: self.username.clone(),
            email: self.email.clone(),
            native_id: self.native_id.clone(),
        }
    }

    /// A record is well formed when it carries a non-blank username.
    pub fn is_well_formed(&self) -> bool {
        !self.username.trim().is_empty()
    }

    /// Descriptor view of this record.
    pub fn descriptor(&self) -> UserDescriptor {
        UserDescriptor {
            username: self.username.clone(),
            email: self.email.clone(),
            native_id: self.native_id.clone(),
        }
    }
}

impl fmt::Display for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.username, self.email)
    }
}
