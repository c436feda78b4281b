//! In-process [`EventBus`](crate::EventBus) and [`RecordStore`](crate::RecordStore).
//!
//! Used by tests and by the service when it runs without a broker
//! (`EVENT_BUS=memory`). Nothing here survives a restart.

mod event_bus;
mod store;

pub use event_bus::InMemoryEventBus;
pub use store::InMemoryRecordStore;
