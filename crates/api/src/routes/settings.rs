//! Runtime settings routes.

use axum::{extract::State, Json};
use domain::models::ExpirationTimeoutBody;

use crate::app::AppState;
use crate::error::ApiError;

/// GET /api/v1/settings/expiration-timeout
pub async fn get_expiration_timeout(State(state): State<AppState>) -> Json<ExpirationTimeoutBody> {
    Json(ExpirationTimeoutBody {
        seconds: state.workflow.expiration_timeout(),
    })
}

/// Change the timeout applied to reservations created from now on.
///
/// PUT /api/v1/settings/expiration-timeout
pub async fn set_expiration_timeout(
    State(state): State<AppState>,
    Json(body): Json<ExpirationTimeoutBody>,
) -> Result<Json<ExpirationTimeoutBody>, ApiError> {
    state.workflow.set_expiration_timeout(body.seconds)?;
    Ok(Json(ExpirationTimeoutBody {
        seconds: state.workflow.expiration_timeout(),
    }))
}
