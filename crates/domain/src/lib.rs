//! Domain layer for the rental system backend.
//!
//! This crate contains:
//! - Domain models (Equipment, Reservation, lifecycle states, events)
//! - The reservation error taxonomy
//! - Domain services (notification bus, clock, storage backend port)

pub mod errors;
pub mod models;
pub mod services;

pub use errors::{ReservationError, StorageError};
