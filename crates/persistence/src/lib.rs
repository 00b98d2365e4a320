//! Persistence layer for the rental system backend.
//!
//! This crate contains:
//! - The authoritative in-memory reservation store
//! - Storage backends (PostgreSQL and in-memory)
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - Repository implementations

pub mod backend;
pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
pub mod store;

pub use backend::{BackendOperation, InMemoryBackend, PgBackend};
pub use store::ReservationStore;
