use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use incident_core::Orchestrator;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

pub fn webhook_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/alert", post(handle_alert))
        .route("/webhook/alertmanager", post(handle_alert))
        .route("/health", get(health))
        .with_state(orchestrator)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn handle_alert(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(payload): Json<serde_json::Value>,
) -> (StatusCode, Json<serde_json::Value>) {
    // The pipeline makes blocking HTTP calls.
    let outcome =
        tokio::task::spawn_blocking(move || orchestrator.handle_alert_group(&payload)).await;

    match outcome {
        Ok(Ok(incident_id)) => (
            StatusCode::OK,
            Json(json!({"ok": true, "incident_id": incident_id})),
        ),
        Ok(Err(err)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": err.to_string()})),
        ),
        Err(err) => {
            error!(error = %err, "alert pipeline task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"ok": false, "error": "internal error"})),
            )
        }
    }
}
