//! Application state for Axum handlers.

use todo_events_core::{ConsumerState, TodoMutations, TodoQueries};
use tokio::sync::watch;

/// State shared by every handler.
///
/// Mutations publish events; queries read the store. Handlers never see the
/// store's write side or the consumer itself, only its lifecycle state.
#[derive(Clone)]
pub struct AppState {
    /// Write-side use cases.
    pub mutations: TodoMutations,
    /// Read-side use cases.
    pub queries: TodoQueries,
    consumer_state: watch::Receiver<ConsumerState>,
}

impl AppState {
    /// Create the state. `consumer_state` usually comes from
    /// `EventConsumer::watch_state`.
    #[must_use]
    pub const fn new(
        mutations: TodoMutations,
        queries: TodoQueries,
        consumer_state: watch::Receiver<ConsumerState>,
    ) -> Self {
        Self {
            mutations,
            queries,
            consumer_state,
        }
    }

    /// Current consumer lifecycle state.
    #[must_use]
    pub fn consumer_state(&self) -> ConsumerState {
        *self.consumer_state.borrow()
    }
}
