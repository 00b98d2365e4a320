//! Repository implementations for database operations.

pub mod equipment;
pub mod reservation;

pub use equipment::EquipmentRepository;
pub use reservation::ReservationRepository;
