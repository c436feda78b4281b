//! The event envelope exchanged on the todo topic.
//!
//! Every message body on the topic is a flat JSON object:
//!
//! ```text
//! { "action": "create", "data": { "id": "1", "title": "Buy milk" } }
//! { "action": "update", "data": { "id": "1", "title": "Buy oat milk" } }
//! { "action": "delete", "data": { "id": "1" } }
//! ```
//!
//! The shape of `data` is determined solely by `action`. [`Envelope`] models
//! that as a tagged union, so a producer can never build a `delete` carrying a
//! title or a `create` without one.
//!
//! # Decoding
//!
//! The consumer side must tolerate bodies it does not understand. [`decode`]
//! therefore works in two stages:
//!
//! 1. Parse `{ action, data }` loosely. Failure here is [`DecodeError::Malformed`].
//! 2. Match `action` against the known kinds. An unknown action is not an
//!    error, it is [`Decoded::Unrecognized`], so newer producers can add kinds
//!    without breaking older consumers. A known action whose `data` does not
//!    fit is [`DecodeError::InvalidData`].

use crate::record::{Record, RecordId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Payload of an `update` event: the target id and its new title.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUpdate {
    /// Record to retitle
    pub id: RecordId,
    /// New title
    pub title: String,
}

/// Payload of a `delete` event: the target id only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    /// Record to delete
    pub id: RecordId,
}

/// A todo state-change event as it travels over the broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "lowercase")]
pub enum Envelope {
    /// A new record, carried in full.
    Create(Record),
    /// A new title for an existing record.
    Update(RecordUpdate),
    /// Removal of a record.
    Delete(RecordRef),
}

/// The three recognized action kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// `create`
    Create,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

impl ActionKind {
    /// Wire name of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Parses a wire name; `None` for anything unrecognized.
    #[must_use]
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Envelope {
    /// Builds a `create` envelope carrying the full record.
    #[must_use]
    pub const fn create(record: Record) -> Self {
        Self::Create(record)
    }

    /// Builds an `update` envelope.
    #[must_use]
    pub fn update(id: RecordId, title: impl Into<String>) -> Self {
        Self::Update(RecordUpdate {
            id,
            title: title.into(),
        })
    }

    /// Builds a `delete` envelope.
    #[must_use]
    pub const fn delete(id: RecordId) -> Self {
        Self::Delete(RecordRef { id })
    }

    /// The action this envelope carries.
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Create(_) => ActionKind::Create,
            Self::Update(_) => ActionKind::Update,
            Self::Delete(_) => ActionKind::Delete,
        }
    }

    /// The record this envelope targets.
    ///
    /// Used as the message key, so every event for one record lands on the
    /// same partition.
    #[must_use]
    pub const fn record_id(&self) -> &RecordId {
        match self {
            Self::Create(record) => &record.id,
            Self::Update(update) => &update.id,
            Self::Delete(target) => &target.id,
        }
    }

    /// Serializes the envelope to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Result of decoding a message body that was at least well-formed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A recognized action with a valid payload.
    Envelope(Envelope),
    /// A well-formed body whose action this consumer does not know.
    Unrecognized(String),
}

/// Why a message body could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Body is not a JSON object with a string `action`.
    #[error("Malformed message body: {0}")]
    Malformed(String),

    /// Action is recognized but `data` does not match its shape.
    #[error("Invalid data for '{action}' action: {reason}")]
    InvalidData {
        /// The recognized action
        action: ActionKind,
        /// Deserializer message
        reason: String,
    },
}

#[derive(Deserialize)]
struct RawEnvelope {
    action: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Decodes a raw message body.
///
/// # Errors
///
/// - [`DecodeError::Malformed`] if the body is not `{ "action": string, ... }`
/// - [`DecodeError::InvalidData`] if the action is known but `data` does not fit
pub fn decode(body: &[u8]) -> Result<Decoded, DecodeError> {
    let raw: RawEnvelope =
        serde_json::from_slice(body).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let Some(kind) = ActionKind::parse(&raw.action) else {
        return Ok(Decoded::Unrecognized(raw.action));
    };

    let invalid = |e: serde_json::Error| DecodeError::InvalidData {
        action: kind,
        reason: e.to_string(),
    };

    let envelope = match kind {
        ActionKind::Create => Envelope::Create(serde_json::from_value(raw.data).map_err(invalid)?),
        ActionKind::Update => Envelope::Update(serde_json::from_value(raw.data).map_err(invalid)?),
        ActionKind::Delete => Envelope::Delete(serde_json::from_value(raw.data).map_err(invalid)?),
    };

    Ok(Decoded::Envelope(envelope))
}
