//! The todo record: the single domain entity mirrored through the event pipeline.
//!
//! Records are identified by a [`RecordId`] assigned by whoever originates the
//! record (the create use case), never by storage. The title must be non-empty
//! whenever a record is created or retitled; [`Title::parse`] is the one place
//! that rule is enforced.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a todo record.
///
/// Serialized as a plain JSON string so the wire shape stays `{"id": "..."}`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a `RecordId` from an existing string (e.g. a path parameter).
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh, globally unique identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Input rejected before anything is published.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Title was empty or whitespace only.
    #[error("Title is required")]
    EmptyTitle,
}

/// A validated, non-empty title.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Title(String);

impl Title {
    /// Validates a raw title.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyTitle`] if `raw` is empty or only whitespace.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        Ok(Self(raw))
    }

    /// Consumes the title, returning the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

/// A todo record as stored and as carried by `create` events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Originator-assigned identifier
    pub id: RecordId,
    /// Non-empty title
    pub title: String,
}

impl Record {
    /// Creates a record from an id and an already validated title.
    #[must_use]
    pub fn new(id: RecordId, title: Title) -> Self {
        Self {
            id,
            title: title.into_inner(),
        }
    }
}
