//! # Todo Events Core
//!
//! The event-sourced write path of the todo service.
//!
//! A mutation never writes to storage directly. It is turned into an event,
//! published to a topic, and applied to the record store only when the same
//! service consumes that event back:
//!
//! ```text
//!  HTTP write ──► TodoMutations ──► EventPublisher ──► topic "todo-events"
//!                                                            │
//!                   RecordStore ◄── Dispatcher ◄── EventConsumer
//!                        ▲
//!  HTTP read ──► TodoQueries
//! ```
//!
//! ## Modules
//!
//! - [`record`]: the todo record, its id and title validation
//! - [`envelope`]: the wire event and its tolerant decoder
//! - [`event_bus`]: the broker seam (`EventBus` trait)
//! - [`store`]: the storage seam (`RecordStore` trait)
//! - [`publisher`]: envelope → broker message
//! - [`dispatcher`]: broker message → store operation
//! - [`consumer`]: the receive loop and its lifecycle
//! - [`mutations`]: create/update/delete/fetch use cases
//! - [`retry`]: optional backoff for publishing
//! - `memory` (feature `memory`): in-process `EventBus` and `RecordStore`
//!
//! ## Guarantees
//!
//! - Publishing is at-least-once; a failed publish fails the mutation.
//! - Consumption is at-least-once: a delivery is acknowledged only after it
//!   has been dispatched.
//! - Events for one record share a partition key and are applied in order.
//! - One bad message never stops the consumer.
//! - Reads are eventually consistent with writes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consumer;
pub mod dispatcher;
pub mod envelope;
pub mod event_bus;
#[cfg(feature = "memory")]
pub mod memory;
pub mod mutations;
pub mod publisher;
pub mod record;
pub mod retry;
pub mod store;

pub use consumer::{ConsumerError, ConsumerState, EventConsumer};
pub use dispatcher::{DispatchOutcome, Dispatcher, DropReason};
pub use envelope::{ActionKind, DecodeError, Decoded, Envelope};
pub use event_bus::{AckHandle, Delivery, EventBus, EventBusError, EventStream, OutboundMessage};
#[cfg(feature = "memory")]
pub use memory::{InMemoryEventBus, InMemoryRecordStore};
pub use mutations::{DEFAULT_TOPIC, MutationError, TodoMutations, TodoQueries};
pub use publisher::EventPublisher;
pub use record::{Record, RecordId, Title, ValidationError};
pub use retry::RetryPolicy;
pub use store::{RecordStore, StoreError};
