//! Model management endpoints.
//!
//! Thin wrappers over the service CLI: list, pull, remove. Each checks
//! the service is up first and answers 503 otherwise.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use braid_runtime::ModelInfo;

use crate::error::HttpError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct ModelList {
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
pub struct ModelBody {
    #[serde(default)]
    pub model: String,
}

async fn require_service(state: &AppState) -> Result<(), HttpError> {
    if state.service_probe.is_running().await {
        Ok(())
    } else {
        Err(HttpError::ServiceUnavailable(
            "inference service is not running".into(),
        ))
    }
}

/// `GET /api/models`
pub async fn list(State(state): State<AppState>) -> Result<Json<ModelList>, HttpError> {
    require_service(&state).await?;
    let models = state.models.list().await?;
    Ok(Json(ModelList { models }))
}

/// `POST /api/models` — pull a model by name. Blocks until done.
pub async fn pull(
    State(state): State<AppState>,
    Json(body): Json<ModelBody>,
) -> Result<Json<Value>, HttpError> {
    if body.model.trim().is_empty() {
        return Err(HttpError::BadRequest("missing model name".into()));
    }
    state.models.pull(body.model.trim()).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Model pulled successfully",
    })))
}

/// `DELETE /api/models` — remove a model by name.
pub async fn remove(
    State(state): State<AppState>,
    Json(body): Json<ModelBody>,
) -> Result<Json<Value>, HttpError> {
    if body.model.trim().is_empty() {
        return Err(HttpError::BadRequest("missing model name".into()));
    }
    state.models.remove(body.model.trim()).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Model removed successfully",
    })))
}
