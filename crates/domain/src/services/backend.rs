//! Storage backend port used by the reservation store.
//!
//! Backends are transactional at the single-row level. The core performs no
//! retries; failures are surfaced to the caller as `StorageError`.

use crate::errors::StorageError;
use crate::models::{Equipment, EquipmentId, Reservation, ReservationId, ReservationStatus};

/// Persistence operations the reservation store depends on.
#[async_trait::async_trait]
pub trait ReservationBackend: Send + Sync {
    /// Persist newly registered equipment.
    async fn persist_equipment(&self, equipment: &Equipment) -> Result<(), StorageError>;

    /// Persist a newly created reservation.
    async fn persist_reservation(&self, reservation: &Reservation) -> Result<(), StorageError>;

    /// Overwrite the stored status (and status fields) of a reservation.
    async fn update_reservation_status(
        &self,
        id: ReservationId,
        status: &ReservationStatus,
    ) -> Result<(), StorageError>;

    /// Set the availability flag of a piece of equipment.
    async fn set_equipment_availability(
        &self,
        id: EquipmentId,
        available: bool,
    ) -> Result<(), StorageError>;

    /// Load all equipment, used to hydrate the store at start-up.
    async fn load_equipment(&self) -> Result<Vec<Equipment>, StorageError>;

    /// Load all reservations, including terminal ones.
    async fn load_reservations(&self) -> Result<Vec<Reservation>, StorageError>;
}
