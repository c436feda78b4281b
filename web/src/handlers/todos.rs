//! Todo endpoints.
//!
//! Handlers only translate HTTP to use-case calls and back. Writes are
//! accepted as soon as their event is published; `GET /todos` reflects them
//! once the consumer has applied it.

use crate::WebResult;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::Deserialize;
use todo_events_core::{Record, RecordId};

/// Body of `POST /todos` and `PUT /todos/:id`.
///
/// A missing or `null` `title` reads as empty and is rejected by validation.
#[derive(Debug, Deserialize)]
pub struct TodoInput {
    /// New title
    #[serde(default)]
    pub title: Option<String>,
}

/// `POST /todos`: publish a `create` event, respond 201 with the new record.
///
/// # Errors
///
/// 500 when the title is empty or the event cannot be published.
pub async fn create_todo(
    State(state): State<AppState>,
    body: Result<Json<TodoInput>, JsonRejection>,
) -> WebResult<(StatusCode, Json<Record>)> {
    let Json(input) = body?;
    let record = state.mutations.create(input.title.unwrap_or_default()).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /todos`: every record currently in the store.
///
/// # Errors
///
/// 500 when the store read fails.
pub async fn list_todos(State(state): State<AppState>) -> WebResult<Json<Vec<Record>>> {
    Ok(Json(state.queries.fetch_all().await?))
}

/// `PUT /todos/:id`: publish an `update` event, respond 200 with the proposed record.
///
/// # Errors
///
/// 500 when the title is empty or the event cannot be published.
pub async fn update_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<TodoInput>, JsonRejection>,
) -> WebResult<Json<Record>> {
    let Json(input) = body?;
    let record = state
        .mutations
        .update(RecordId::new(id), input.title.unwrap_or_default())
        .await?;
    Ok(Json(record))
}

/// `DELETE /todos/:id`: publish a `delete` event and respond 204.
///
/// Always 204; a failed publish is only logged.
pub async fn delete_todo(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    let id = RecordId::new(id);
    if let Err(e) = state.mutations.delete(id.clone()).await {
        tracing::warn!(record_id = %id, error = %e, "Delete was not published");
    }
    StatusCode::NO_CONTENT
}
