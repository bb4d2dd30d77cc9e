use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "environment": state.config.app_env,
        "backend": state.config.backend.url,
        "timestamp": chrono::Utc::now(),
    }))
}
