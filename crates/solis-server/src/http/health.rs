use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health — liveness plus a few gauges.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = state.started_at.elapsed().as_secs();
    Json(json!({
        "status": "ok",
        "uptime_sec": uptime,
        "active_leads": state.intake.depth(),
        "dedupe_entries": state.dedupe.len(),
        "knowledge_chunks": state.knowledge.count().unwrap_or(0),
    }))
}
