//! Equipment routes.

use axum::{extract::State, http::StatusCode, Json};
use domain::models::{CreateEquipmentRequest, Equipment};
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;

/// POST /api/v1/equipment
pub async fn create_equipment(
    State(state): State<AppState>,
    Json(request): Json<CreateEquipmentRequest>,
) -> Result<(StatusCode, Json<Equipment>), ApiError> {
    request.validate()?;
    let equipment = state.workflow.add_equipment(&request).await?;
    Ok((StatusCode::CREATED, Json(equipment)))
}

/// GET /api/v1/equipment
pub async fn list_equipment(State(state): State<AppState>) -> Json<Vec<Equipment>> {
    Json(state.workflow.list_equipment())
}

/// Equipment that can be reserved right now.
///
/// GET /api/v1/equipment/available
pub async fn list_available_equipment(State(state): State<AppState>) -> Json<Vec<Equipment>> {
    Json(state.workflow.list_available_equipment())
}
