//! Axum HTTP surface for the todo service.
//!
//! A thin shell over `todo-events-core`: handlers turn requests into
//! use-case calls and use-case results into responses. There is no business
//! logic here.
//!
//! # Routes
//!
//! | Method | Path            | Success                     | Failure |
//! |--------|-----------------|-----------------------------|---------|
//! | POST   | `/todos`        | 201 + record                | 500     |
//! | GET    | `/todos`        | 200 + records               | 500     |
//! | PUT    | `/todos/:id`    | 200 + proposed record       | 500     |
//! | DELETE | `/todos/:id`    | 204                         | (always 204) |
//! | GET    | `/health`       | 200                         |         |
//! | GET    | `/health/ready` | 200 while the consumer runs | 503     |
//!
//! # Example
//!
//! ```ignore
//! use todo_events_web::{AppState, router};
//!
//! let state = AppState::new(mutations, queries, consumer.watch_state());
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router(state)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod state;

use axum::{
    Router,
    routing::{get, put},
};
use tower_http::trace::TraceLayer;

pub use error::AppError;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;

/// Build the full router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/todos",
            get(handlers::list_todos).post(handlers::create_todo),
        )
        .route(
            "/todos/:id",
            put(handlers::update_todo).delete(handlers::delete_todo),
        )
        .route("/health", get(handlers::health_check))
        .route("/health/ready", get(handlers::readiness_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
