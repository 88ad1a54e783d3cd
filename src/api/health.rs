use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and config summary.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "status": "edital-chat is running",
        "config": {
            "model": config.upstream.model,
            "tools": state.tool_definitions.len(),
            "persistence_path": config.persistence.path,
            "features": {
                "log_level": config.features.log_level,
                "system_prompt_overridden": config.features.system_prompt.is_some(),
            }
        }
    }))
}
