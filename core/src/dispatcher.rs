//! Maps decoded envelopes onto record store operations.
//!
//! The dispatcher is the consuming half's decision table. Given one message
//! body it either applies exactly one store operation or drops the message,
//! and it never returns an error: every failure is terminal for that message
//! only, so the receive loop can move on.
//!
//! | Body                          | Store call                      | Outcome   |
//! |-------------------------------|---------------------------------|-----------|
//! | empty / not JSON / bad shape  | none                            | `Dropped` |
//! | unknown `action`              | none                            | `Dropped` |
//! | `create`                      | `add_record(record)`            | `Applied` or `Failed` |
//! | `update`                      | `update_record(id, title)`      | `Applied` or `Failed` |
//! | `delete`                      | `delete_record(id)`             | `Applied` or `Failed` |
//!
//! Store failures (duplicate create, update of a missing id, backend errors)
//! are logged and the message is not retried or re-queued.

use crate::envelope::{self, ActionKind, DecodeError, Decoded, Envelope};
use crate::store::{RecordStore, StoreError};
use std::sync::Arc;

/// Why a message was dropped without touching the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The message had no body.
    EmptyPayload,
    /// The body could not be decoded.
    Malformed(DecodeError),
    /// The body was well-formed but named an action this service does not know.
    UnknownAction(String),
}

/// What happened to a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The matching store operation succeeded.
    Applied(ActionKind),
    /// No store operation was attempted.
    Dropped(DropReason),
    /// The store operation was attempted and failed.
    Failed {
        /// Action that was being applied
        action: ActionKind,
        /// Store error that was swallowed
        error: StoreError,
    },
}

impl DispatchOutcome {
    const fn label(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::Dropped(_) => "dropped",
            Self::Failed { .. } => "failed",
        }
    }

    const fn action_label(&self) -> &'static str {
        match self {
            Self::Applied(action) | Self::Failed { action, .. } => action.as_str(),
            Self::Dropped(_) => "none",
        }
    }
}

/// Applies envelopes to a record store, one at a time.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn RecordStore>,
}

impl Dispatcher {
    /// Create a dispatcher writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Decode one message body and apply it.
    ///
    /// Never fails; see the module docs for the outcome of each case.
    pub async fn dispatch(&self, body: &[u8]) -> DispatchOutcome {
        let outcome = self.dispatch_inner(body).await;
        metrics::counter!(
            "todo_events.consumer.messages",
            "outcome" => outcome.label(),
            "action" => outcome.action_label()
        )
        .increment(1);
        outcome
    }

    async fn dispatch_inner(&self, body: &[u8]) -> DispatchOutcome {
        if body.is_empty() {
            tracing::warn!("Dropping message with empty payload");
            return DispatchOutcome::Dropped(DropReason::EmptyPayload);
        }

        let envelope = match envelope::decode(body) {
            Ok(Decoded::Envelope(envelope)) => envelope,
            Ok(Decoded::Unrecognized(action)) => {
                tracing::debug!(action = %action, "Ignoring message with unrecognized action");
                return DispatchOutcome::Dropped(DropReason::UnknownAction(action));
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    body = %String::from_utf8_lossy(body),
                    "Dropping undecodable message"
                );
                return DispatchOutcome::Dropped(DropReason::Malformed(e));
            },
        };

        let action = envelope.kind();
        let record_id = envelope.record_id().clone();
        tracing::debug!(action = %action, record_id = %record_id, "Received message");

        match self.apply(envelope).await {
            Ok(()) => {
                tracing::info!(action = %action, record_id = %record_id, "Applied message");
                DispatchOutcome::Applied(action)
            },
            Err(error) => {
                tracing::error!(
                    action = %action,
                    record_id = %record_id,
                    error = %error,
                    "Failed to apply message"
                );
                DispatchOutcome::Failed { action, error }
            },
        }
    }

    /// Apply an already decoded envelope to the store.
    ///
    /// # Errors
    ///
    /// Returns whatever the store reports for the matching operation.
    pub async fn apply(&self, envelope: Envelope) -> Result<(), StoreError> {
        match envelope {
            Envelope::Create(record) => self.store.add_record(record).await.map(drop),
            Envelope::Update(update) => self
                .store
                .update_record(&update.id, &update.title)
                .await
                .map(drop),
            Envelope::Delete(target) => self.store.delete_record(&target.id).await,
        }
    }
}
