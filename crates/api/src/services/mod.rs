//! Application services.

pub mod locks;
pub mod reservation;

pub use locks::{ReservationGuard, ReservationLocks};
pub use reservation::ReservationWorkflow;
