//! Storage backends implementing the `ReservationBackend` port.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use domain::models::{Equipment, EquipmentId, Reservation, ReservationId, ReservationStatus};
use domain::services::ReservationBackend;
use domain::StorageError;
use sqlx::PgPool;
use tracing::warn;

use crate::metrics::record_backend_failure;
use crate::repositories::{EquipmentRepository, ReservationRepository};

/// Backend operations, used for failure labels and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOperation {
    PersistEquipment,
    PersistReservation,
    UpdateReservationStatus,
    SetEquipmentAvailability,
    LoadEquipment,
    LoadReservations,
}

impl BackendOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendOperation::PersistEquipment => "persist_equipment",
            BackendOperation::PersistReservation => "persist_reservation",
            BackendOperation::UpdateReservationStatus => "update_reservation_status",
            BackendOperation::SetEquipmentAvailability => "set_equipment_availability",
            BackendOperation::LoadEquipment => "load_equipment",
            BackendOperation::LoadReservations => "load_reservations",
        }
    }
}

/// Classify a sqlx error: unreachable database versus failed statement.
fn map_sqlx_error(operation: BackendOperation, err: sqlx::Error) -> StorageError {
    let storage_err = match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => StorageError::Connection(err.to_string()),
        _ => StorageError::Database(err.to_string()),
    };
    let class = match storage_err {
        StorageError::Connection(_) => "connection",
        StorageError::Database(_) => "database",
    };
    record_backend_failure(operation.as_str(), class);
    warn!(
        operation = operation.as_str(),
        error = %storage_err,
        "Storage backend call failed"
    );
    storage_err
}

/// PostgreSQL backend.
#[derive(Clone)]
pub struct PgBackend {
    equipment: EquipmentRepository,
    reservations: ReservationRepository,
}

impl PgBackend {
    /// Creates a backend over the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            equipment: EquipmentRepository::new(pool.clone()),
            reservations: ReservationRepository::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl ReservationBackend for PgBackend {
    async fn persist_equipment(&self, equipment: &Equipment) -> Result<(), StorageError> {
        self.equipment
            .insert(equipment)
            .await
            .map_err(|e| map_sqlx_error(BackendOperation::PersistEquipment, e))
    }

    async fn persist_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        self.reservations
            .insert(reservation)
            .await
            .map_err(|e| map_sqlx_error(BackendOperation::PersistReservation, e))
    }

    async fn update_reservation_status(
        &self,
        id: ReservationId,
        status: &ReservationStatus,
    ) -> Result<(), StorageError> {
        let updated = self
            .reservations
            .update_status(id, status)
            .await
            .map_err(|e| map_sqlx_error(BackendOperation::UpdateReservationStatus, e))?;
        if updated == 0 {
            return Err(StorageError::Database(format!(
                "Reservation {} does not exist",
                id
            )));
        }
        Ok(())
    }

    async fn set_equipment_availability(
        &self,
        id: EquipmentId,
        available: bool,
    ) -> Result<(), StorageError> {
        let updated = self
            .equipment
            .set_availability(id, available)
            .await
            .map_err(|e| map_sqlx_error(BackendOperation::SetEquipmentAvailability, e))?;
        if updated == 0 {
            return Err(StorageError::Database(format!(
                "Equipment {} does not exist",
                id
            )));
        }
        Ok(())
    }

    async fn load_equipment(&self) -> Result<Vec<Equipment>, StorageError> {
        let rows = self
            .equipment
            .list_all()
            .await
            .map_err(|e| map_sqlx_error(BackendOperation::LoadEquipment, e))?;
        Ok(rows.into_iter().map(Equipment::from).collect())
    }

    async fn load_reservations(&self) -> Result<Vec<Reservation>, StorageError> {
        let rows = self
            .reservations
            .list_all()
            .await
            .map_err(|e| map_sqlx_error(BackendOperation::LoadReservations, e))?;
        rows.into_iter().map(Reservation::try_from).collect()
    }
}

#[derive(Default)]
struct InMemoryState {
    equipment: BTreeMap<EquipmentId, Equipment>,
    reservations: BTreeMap<ReservationId, Reservation>,
    failures: HashMap<BackendOperation, StorageError>,
}

/// Backend keeping rows in process memory.
///
/// Used when no database is configured and in tests. `fail_next` injects a
/// one-shot failure for a given operation.
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<InMemoryState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with rows, as if loaded from an earlier run.
    pub fn with_rows(equipment: Vec<Equipment>, reservations: Vec<Reservation>) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.lock();
            state.equipment = equipment.into_iter().map(|e| (e.id, e)).collect();
            state.reservations = reservations.into_iter().map(|r| (r.id, r)).collect();
        }
        backend
    }

    /// Make the next call of `operation` fail with `err`.
    pub fn fail_next(&self, operation: BackendOperation, err: StorageError) {
        self.lock().failures.insert(operation, err);
    }

    /// Stored copy of a reservation row.
    pub fn stored_reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.lock().reservations.get(&id).cloned()
    }

    /// Stored copy of an equipment row.
    pub fn stored_equipment(&self, id: EquipmentId) -> Option<Equipment> {
        self.lock().equipment.get(&id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(state: &mut InMemoryState, operation: BackendOperation) -> Result<(), StorageError> {
        match state.failures.remove(&operation) {
            Some(err) => {
                record_backend_failure(
                    operation.as_str(),
                    match err {
                        StorageError::Connection(_) => "connection",
                        StorageError::Database(_) => "database",
                    },
                );
                Err(err)
            }
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ReservationBackend for InMemoryBackend {
    async fn persist_equipment(&self, equipment: &Equipment) -> Result<(), StorageError> {
        let mut state = self.lock();
        Self::check(&mut state, BackendOperation::PersistEquipment)?;
        state.equipment.insert(equipment.id, equipment.clone());
        Ok(())
    }

    async fn persist_reservation(&self, reservation: &Reservation) -> Result<(), StorageError> {
        let mut state = self.lock();
        Self::check(&mut state, BackendOperation::PersistReservation)?;
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn update_reservation_status(
        &self,
        id: ReservationId,
        status: &ReservationStatus,
    ) -> Result<(), StorageError> {
        let mut state = self.lock();
        Self::check(&mut state, BackendOperation::UpdateReservationStatus)?;
        let row = state
            .reservations
            .get_mut(&id)
            .ok_or_else(|| StorageError::Database(format!("Reservation {} does not exist", id)))?;
        row.status = status.clone();
        Ok(())
    }

    async fn set_equipment_availability(
        &self,
        id: EquipmentId,
        available: bool,
    ) -> Result<(), StorageError> {
        let mut state = self.lock();
        Self::check(&mut state, BackendOperation::SetEquipmentAvailability)?;
        let row = state
            .equipment
            .get_mut(&id)
            .ok_or_else(|| StorageError::Database(format!("Equipment {} does not exist", id)))?;
        row.available = available;
        Ok(())
    }

    async fn load_equipment(&self) -> Result<Vec<Equipment>, StorageError> {
        let mut state = self.lock();
        Self::check(&mut state, BackendOperation::LoadEquipment)?;
        Ok(state.equipment.values().cloned().collect())
    }

    async fn load_reservations(&self) -> Result<Vec<Reservation>, StorageError> {
        let mut state = self.lock();
        Self::check(&mut state, BackendOperation::LoadReservations)?;
        Ok(state.reservations.values().cloned().collect())
    }
}
