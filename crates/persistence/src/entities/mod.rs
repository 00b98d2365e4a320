//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod equipment;
pub mod reservation;

pub use equipment::EquipmentEntity;
pub use reservation::{ReservationEntity, ReservationStatusDb};
