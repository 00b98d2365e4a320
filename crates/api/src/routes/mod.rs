//! HTTP route handlers.

pub mod equipment;
pub mod health;
pub mod reservations;
pub mod settings;
