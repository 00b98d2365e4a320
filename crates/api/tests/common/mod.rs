//! Common test utilities for integration tests.
//!
//! The application under test keeps its reservations in memory, so these
//! tests need no database.

// Not every helper is used by every test binary.
#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use domain::services::{Clock, MonotonicClock, NotificationBus, RecordingSubscriber};
use persistence::{InMemoryBackend, ReservationStore};
use rental_api::{
    app::create_app,
    config::{Config, DatabaseConfig, LoggingConfig, ReservationsConfig, ServerConfig},
    services::ReservationWorkflow,
};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

/// Create a test configuration with an in-memory store.
pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            request_timeout_secs: 30,
        },
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout_secs: 10,
            idle_timeout_secs: 600,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        reservations: ReservationsConfig {
            expiration_timeout_secs: 3600,
            shutdown_grace_secs: 1,
            metrics_interval_secs: 30,
        },
    }
}

/// A running application together with handles into its internals.
pub struct TestApp {
    pub router: Router,
    pub workflow: Arc<ReservationWorkflow>,
    pub events: Arc<RecordingSubscriber>,
}

impl TestApp {
    /// Build an application from `config`. Must run inside a tokio runtime.
    pub fn new(config: Config) -> Self {
        let store = Arc::new(ReservationStore::new(Arc::new(InMemoryBackend::new())));
        let bus = Arc::new(NotificationBus::new());
        let events = Arc::new(RecordingSubscriber::new());
        bus.subscribe_shared(None, events.clone());

        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let workflow = Arc::new(
            ReservationWorkflow::new(
                store,
                bus,
                clock,
                config.reservations.expiration_timeout_secs,
            )
            .expect("valid test configuration"),
        );

        Self {
            router: create_app(config, Arc::clone(&workflow), None),
            workflow,
            events,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (axum::http::StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        (status, parse_response_body(response).await)
    }

    /// Register equipment and return its id.
    pub async fn add_equipment(&self, model: &str) -> i64 {
        let (status, body) = self
            .send(json_request(
                Method::POST,
                "/api/v1/equipment",
                serde_json::json!({ "model": model, "category": "camera" }),
            ))
            .await;
        assert_eq!(status, axum::http::StatusCode::CREATED, "{body}");
        body["id"].as_i64().unwrap()
    }

    /// Reserve `equipment_id` for `rentee` and return the reservation id.
    pub async fn reserve(&self, equipment_id: i64, rentee: &str) -> i64 {
        let (status, body) = self
            .send(json_request(
                Method::POST,
                "/api/v1/reservations",
                serde_json::json!({
                    "equipment_id": equipment_id,
                    "rentee_id": rentee,
                    "rented_for": in_days(7),
                }),
            ))
            .await;
        assert_eq!(status, axum::http::StatusCode::CREATED, "{body}");
        body["id"].as_i64().unwrap()
    }
}

pub fn test_app() -> TestApp {
    TestApp::new(test_config())
}

pub fn in_days(days: i64) -> DateTime<Utc> {
    Utc::now() + Duration::days(days)
}

/// Build a JSON request.
pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

/// Build a bodiless request.
pub fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    empty_request(Method::GET, uri)
}

/// Helper to parse JSON response body. Empty bodies become `Value::Null`.
pub async fn parse_response_body(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
}
