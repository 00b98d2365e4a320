//! Domain models for the rental system.

pub mod equipment;
pub mod event;
pub mod reservation;

pub use equipment::{CreateEquipmentRequest, Equipment, EquipmentId};
pub use event::{EventKind, ReservationEvent};
pub use reservation::{
    ApproveReservationRequest, CreateReservationRequest, CreateReservationResponse,
    ExpirationTimeoutBody, ExpireReservationResponse, ListReservationsQuery,
    ListReservationsResponse, OverdueResponse, RejectReservationRequest, Reservation,
    ReservationId, ReservationStatus, StatusKind, Transition,
};
