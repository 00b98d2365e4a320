//! Reservation lifecycle routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use domain::models::{
    ApproveReservationRequest, CreateReservationRequest, CreateReservationResponse,
    ExpireReservationResponse, ListReservationsQuery, ListReservationsResponse, OverdueResponse,
    RejectReservationRequest, Reservation, ReservationId, StatusKind,
};
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;

/// Reserve a piece of equipment.
///
/// POST /api/v1/reservations
///
/// The reservation starts Unapproved and expires unless a manager acts first.
pub async fn create_reservation(
    State(state): State<AppState>,
    Json(request): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<CreateReservationResponse>), ApiError> {
    request.validate()?;

    let reservation = state
        .workflow
        .reserve_equipment(request.equipment_id, &request.rentee_id, request.rented_for)
        .await?;

    let expires_at = state
        .workflow
        .scheduler()
        .expires_at(reservation.id)
        .unwrap_or_else(|| reservation.expires_at(state.workflow.expiration_timeout()));

    Ok((
        StatusCode::CREATED,
        Json(CreateReservationResponse {
            id: reservation.id,
            status: reservation.kind(),
            expires_at,
        }),
    ))
}

/// List reservations, optionally filtered by status and rentee.
///
/// GET /api/v1/reservations?status=unapproved&rentee=john
pub async fn list_reservations(
    State(state): State<AppState>,
    Query(query): Query<ListReservationsQuery>,
) -> Result<Json<ListReservationsResponse>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<StatusKind>)
        .transpose()
        .map_err(ApiError::validation)?;

    let data: Vec<Reservation> = match query.rentee.as_deref() {
        Some(rentee) => state
            .workflow
            .reservations_for_rentee(rentee)
            .into_iter()
            .filter(|r| status.map_or(true, |kind| r.kind() == kind))
            .collect(),
        None => state.workflow.list(status),
    };

    Ok(Json(ListReservationsResponse {
        total: data.len(),
        data,
    }))
}

/// GET /api/v1/reservations/:id
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<ReservationId>,
) -> Result<Json<Reservation>, ApiError> {
    Ok(Json(state.workflow.get(id)?))
}

/// Approve an unapproved reservation.
///
/// POST /api/v1/reservations/:id/approve
///
/// Returns 409 if the reservation expired first.
pub async fn approve_reservation(
    State(state): State<AppState>,
    Path(id): Path<ReservationId>,
    Json(request): Json<ApproveReservationRequest>,
) -> Result<Json<Reservation>, ApiError> {
    request.validate()?;
    let reservation = state
        .workflow
        .approve_reservation(id, &request.manager_id)
        .await?;
    Ok(Json(reservation))
}

/// POST /api/v1/reservations/:id/reject
pub async fn reject_reservation(
    State(state): State<AppState>,
    Path(id): Path<ReservationId>,
    Json(request): Json<RejectReservationRequest>,
) -> Result<Json<Reservation>, ApiError> {
    request.validate()?;
    let reservation = state
        .workflow
        .reject_reservation(id, &request.manager_id, &request.reason)
        .await?;
    Ok(Json(reservation))
}

/// POST /api/v1/reservations/:id/return
pub async fn return_reservation(
    State(state): State<AppState>,
    Path(id): Path<ReservationId>,
) -> Result<Json<Reservation>, ApiError> {
    Ok(Json(state.workflow.return_reservation(id).await?))
}

/// Expire a reservation without waiting for its timer.
///
/// POST /api/v1/reservations/:id/expire
///
/// Reservations that already left Unapproved are reported with `expired: false`.
pub async fn expire_reservation(
    State(state): State<AppState>,
    Path(id): Path<ReservationId>,
) -> Result<Json<ExpireReservationResponse>, ApiError> {
    let expired = state.workflow.expire_reservation(id).await?;
    let status = state.workflow.get(id)?.kind();
    if expired {
        info!(reservation_id = id, "Reservation expired manually");
    }
    Ok(Json(ExpireReservationResponse {
        id,
        expired,
        status,
    }))
}

/// Number of overdue rentals held by a rentee.
///
/// GET /api/v1/rentees/:rentee/overdue
pub async fn rentee_overdue(
    State(state): State<AppState>,
    Path(rentee): Path<String>,
) -> Json<OverdueResponse> {
    let overdue = state.workflow.overdue_count(&rentee);
    Json(OverdueResponse { rentee, overdue })
}
