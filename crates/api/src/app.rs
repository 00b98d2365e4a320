use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware};
use crate::routes::{equipment, health, reservations, settings};
use crate::services::ReservationWorkflow;

#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<ReservationWorkflow>,
    pub config: Arc<Config>,
    /// Present when reservations are persisted in PostgreSQL.
    pub pool: Option<PgPool>,
}

pub fn create_app(config: Config, workflow: Arc<ReservationWorkflow>, pool: Option<PgPool>) -> Router {
    let config = Arc::new(config);
    let request_timeout = Duration::from_secs(config.server.request_timeout_secs);

    let state = AppState {
        workflow,
        config,
        pool,
    };

    let reservation_routes = Router::new()
        .route(
            "/api/v1/reservations",
            post(reservations::create_reservation).get(reservations::list_reservations),
        )
        .route("/api/v1/reservations/:id", get(reservations::get_reservation))
        .route(
            "/api/v1/reservations/:id/approve",
            post(reservations::approve_reservation),
        )
        .route(
            "/api/v1/reservations/:id/reject",
            post(reservations::reject_reservation),
        )
        .route(
            "/api/v1/reservations/:id/return",
            post(reservations::return_reservation),
        )
        .route(
            "/api/v1/reservations/:id/expire",
            post(reservations::expire_reservation),
        )
        .route(
            "/api/v1/rentees/:rentee/overdue",
            get(reservations::rentee_overdue),
        );

    let equipment_routes = Router::new()
        .route(
            "/api/v1/equipment",
            get(equipment::list_equipment).post(equipment::create_equipment),
        )
        .route(
            "/api/v1/equipment/available",
            get(equipment::list_available_equipment),
        );

    let settings_routes = Router::new().route(
        "/api/v1/settings/expiration-timeout",
        get(settings::get_expiration_timeout).put(settings::set_expiration_timeout),
    );

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(reservation_routes)
        .merge(equipment_routes)
        .merge(settings_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
