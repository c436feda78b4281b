//! Health check endpoints.
//!
//! Used by load balancers and orchestrators to probe the service.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use todo_events_core::ConsumerState;

/// Liveness response body.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Health {
    /// Always `"ok"`
    pub status: &'static str,
    /// Human-readable detail
    pub message: &'static str,
}

/// Liveness probe. Does not check the broker or the store.
///
/// ```text
/// GET /health
/// ```
///
/// ```json
/// { "status": "ok", "message": "API is healthy" }
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<Health>) {
    (
        StatusCode::OK,
        Json(Health {
            status: "ok",
            message: "API is healthy",
        }),
    )
}

/// Readiness response body.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Readiness {
    /// `"ready"` or `"not_ready"`
    pub status: &'static str,
    /// Consumer lifecycle state, e.g. `"running"`
    pub consumer: String,
}

/// Readiness probe: ready only while the consumer's receive loop runs.
///
/// Writes are accepted either way, but without a running consumer they never
/// reach the store.
///
/// # Status Codes
///
/// - 200 OK: consumer running
/// - 503 Service Unavailable: any other consumer state
///
/// ```text
/// GET /health/ready
/// ```
#[allow(clippy::unused_async)]
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let consumer = state.consumer_state();
    let (status, label) = if consumer == ConsumerState::Running {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        status,
        Json(Readiness {
            status: label,
            consumer: consumer.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, Json(body)) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            Health {
                status: "ok",
                message: "API is healthy"
            }
        );
    }
}
