use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use goesflux_core::dispatcher::{Dispatcher, TaskDescriptor};
use goesflux_core::invocation::{Invocation, InvocationResponse};
use serde_json::Value;
use tracing::warn;

pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/invoke", post(invoke))
        .route("/events", post(handle_event))
        .route("/tasks", get(list_tasks))
        .with_state(dispatcher)
}

async fn invoke(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(invocation): Json<Invocation>,
) -> (StatusCode, Json<InvocationResponse>) {
    respond(dispatcher.execute(&invocation).await.into_response())
}

async fn handle_event(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(event): Json<Value>,
) -> (StatusCode, Json<InvocationResponse>) {
    match Invocation::from_scheduled_event(&event) {
        Ok(invocation) => respond(dispatcher.execute(&invocation).await.into_response()),
        Err(err) => {
            warn!(error = %err, "rejected scheduled event");
            respond(InvocationResponse::from_error(&err))
        }
    }
}

async fn list_tasks(State(dispatcher): State<Arc<Dispatcher>>) -> Json<Vec<TaskDescriptor>> {
    Json(dispatcher.task_descriptors())
}

fn respond(response: InvocationResponse) -> (StatusCode, Json<InvocationResponse>) {
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response))
}
