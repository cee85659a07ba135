//! Pipeline status endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use pipeline_core::Stage;
use worker::{PipelineSnapshot, StageSnapshot};

use crate::response::ApiError;
use crate::state::AppState;

/// GET /status - Both stages plus the derived pipeline status.
pub async fn pipeline_handler(State(state): State<AppState>) -> Json<PipelineSnapshot> {
    Json(state.monitor.pipeline_status().await)
}

/// GET /status/:stage - One stage (`phase1` or `phase2`).
pub async fn stage_handler(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> Result<Json<StageSnapshot>, ApiError> {
    let stage: Stage = stage
        .parse()
        .map_err(|_| ApiError::not_found(format!("unknown stage: {stage}")))?;

    Ok(Json(state.monitor.stage_status(stage).await))
}
