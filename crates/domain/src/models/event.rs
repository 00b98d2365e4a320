//! Reservation lifecycle events published on the notification bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::equipment::EquipmentId;
use super::reservation::{Reservation, ReservationId, StatusKind};

/// Event names consumers subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ReservationCreated,
    ReservationApproved,
    ReservationRejected,
    ReservationReturned,
    ReservationExpired,
}

impl EventKind {
    /// The event emitted when a reservation enters `status`.
    pub fn for_status(status: StatusKind) -> Self {
        match status {
            StatusKind::Unapproved => EventKind::ReservationCreated,
            StatusKind::Approved => EventKind::ReservationApproved,
            StatusKind::Rejected => EventKind::ReservationRejected,
            StatusKind::Returned => EventKind::ReservationReturned,
            StatusKind::Expired => EventKind::ReservationExpired,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::ReservationCreated => write!(f, "ReservationCreated"),
            EventKind::ReservationApproved => write!(f, "ReservationApproved"),
            EventKind::ReservationRejected => write!(f, "ReservationRejected"),
            EventKind::ReservationReturned => write!(f, "ReservationReturned"),
            EventKind::ReservationExpired => write!(f, "ReservationExpired"),
        }
    }
}

/// A committed reservation state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationEvent {
    pub kind: EventKind,
    pub reservation_id: ReservationId,
    pub equipment_id: EquipmentId,
    pub status: StatusKind,
    pub timestamp: DateTime<Utc>,
}

impl ReservationEvent {
    /// Builds the event describing the reservation's current state.
    pub fn from_reservation(reservation: &Reservation, timestamp: DateTime<Utc>) -> Self {
        let status = reservation.kind();
        Self {
            kind: EventKind::for_status(status),
            reservation_id: reservation.id,
            equipment_id: reservation.equipment_id,
            status,
            timestamp,
        }
    }
}
