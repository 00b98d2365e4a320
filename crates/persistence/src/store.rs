//! Authoritative reservation and equipment state.
//!
//! Every row lives in a slot with two locks: an async write lock that
//! serialises read-modify-write cycles (held across backend calls) and a short
//! synchronous lock guarding the committed value. Readers only take the latter,
//! so snapshot queries never wait for a backend round-trip and only ever see
//! committed values.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use domain::models::{
    Equipment, EquipmentId, Reservation, ReservationId, ReservationStatus, StatusKind, Transition,
};
use domain::services::ReservationBackend;
use domain::ReservationError;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info};

struct Slot<T> {
    write: Mutex<()>,
    current: RwLock<T>,
}

impl<T: Clone> Slot<T> {
    fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            write: Mutex::new(()),
            current: RwLock::new(value),
        })
    }

    async fn lock_write(&self) -> MutexGuard<'_, ()> {
        self.write.lock().await
    }

    fn snapshot(&self) -> T {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn commit(&self, value: T) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

/// Single source of truth for reservations and equipment availability.
pub struct ReservationStore {
    backend: Arc<dyn ReservationBackend>,
    reservations: RwLock<HashMap<ReservationId, Arc<Slot<Reservation>>>>,
    equipment: RwLock<HashMap<EquipmentId, Arc<Slot<Equipment>>>>,
    next_reservation_id: AtomicI32,
    next_equipment_id: AtomicI32,
}

impl ReservationStore {
    /// Create an empty store writing through to `backend`.
    pub fn new(backend: Arc<dyn ReservationBackend>) -> Self {
        Self {
            backend,
            reservations: RwLock::new(HashMap::new()),
            equipment: RwLock::new(HashMap::new()),
            next_reservation_id: AtomicI32::new(1),
            next_equipment_id: AtomicI32::new(1),
        }
    }

    /// Create a store hydrated from the rows already held by `backend`.
    ///
    /// Id allocation continues after the highest loaded id.
    pub async fn load(backend: Arc<dyn ReservationBackend>) -> Result<Self, ReservationError> {
        let equipment = backend.load_equipment().await?;
        let reservations = backend.load_reservations().await?;

        let next_equipment_id = equipment.iter().map(|e| e.id).max().unwrap_or(0) + 1;
        let next_reservation_id = reservations.iter().map(|r| r.id).max().unwrap_or(0) + 1;

        info!(
            equipment = equipment.len(),
            reservations = reservations.len(),
            "Loaded reservation store from backend"
        );

        let store = Self::new(backend);
        store
            .next_equipment_id
            .store(next_equipment_id, Ordering::SeqCst);
        store
            .next_reservation_id
            .store(next_reservation_id, Ordering::SeqCst);
        {
            let mut map = store.equipment.write().unwrap_or_else(PoisonError::into_inner);
            for item in equipment {
                map.insert(item.id, Slot::new(item));
            }
        }
        {
            let mut map = store
                .reservations
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for reservation in reservations {
                map.insert(reservation.id, Slot::new(reservation));
            }
        }
        Ok(store)
    }

    /// The backend this store writes through to.
    pub fn backend(&self) -> &Arc<dyn ReservationBackend> {
        &self.backend
    }

    /// Register a new piece of equipment.
    ///
    /// New equipment is always available: only an active reservation may
    /// hold it.
    pub async fn add_equipment(
        &self,
        model: &str,
        category: &str,
    ) -> Result<Equipment, ReservationError> {
        let equipment = Equipment {
            id: self.next_equipment_id.fetch_add(1, Ordering::SeqCst),
            model: model.to_string(),
            category: category.to_string(),
            available: true,
        };
        self.backend.persist_equipment(&equipment).await?;
        self.equipment
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(equipment.id, Slot::new(equipment.clone()));
        debug!(equipment_id = equipment.id, "Equipment added");
        Ok(equipment)
    }

    pub fn get_equipment(&self, id: EquipmentId) -> Result<Equipment, ReservationError> {
        self.equipment_slot(id).map(|slot| slot.snapshot())
    }

    /// All equipment ordered by id.
    pub fn all_equipment(&self) -> Vec<Equipment> {
        let slots: Vec<_> = self
            .equipment
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut items: Vec<Equipment> = slots.iter().map(|s| s.snapshot()).collect();
        items.sort_by_key(|e| e.id);
        items
    }

    /// Equipment not held by any active reservation.
    pub fn available_equipment(&self) -> Vec<Equipment> {
        self.all_equipment()
            .into_iter()
            .filter(|e| e.available)
            .collect()
    }

    /// Reserve the next reservation id without creating anything.
    ///
    /// An id whose creation later fails is never handed out again, so the
    /// sequence may have gaps.
    pub fn allocate_id(&self) -> ReservationId {
        self.next_reservation_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Create an Unapproved reservation and mark its equipment unavailable.
    ///
    /// Fails with `EquipmentUnavailable` if the equipment is already held. Both
    /// writes happen under the equipment's write lock, so two concurrent
    /// requests for the same equipment cannot both succeed.
    pub async fn create(
        &self,
        rentee: &str,
        equipment_id: EquipmentId,
        rented_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Reservation, ReservationError> {
        let id = self.allocate_id();
        self.create_with_id(id, rentee, equipment_id, rented_for, now)
            .await
    }

    /// Like [`create`](Self::create), under an id obtained from
    /// [`allocate_id`](Self::allocate_id).
    ///
    /// Lets a caller serialise work on the reservation before it becomes
    /// visible to `get`. Fails with `PreconditionViolation` if the id is taken.
    pub async fn create_with_id(
        &self,
        id: ReservationId,
        rentee: &str,
        equipment_id: EquipmentId,
        rented_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Reservation, ReservationError> {
        let equipment_slot = self.equipment_slot(equipment_id)?;
        let _guard = equipment_slot.lock_write().await;
        let mut equipment = equipment_slot.snapshot();
        if !equipment.available {
            return Err(ReservationError::EquipmentUnavailable(equipment_id));
        }
        if self
            .reservations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
        {
            return Err(ReservationError::PreconditionViolation(format!(
                "reservation id {} is already in use",
                id
            )));
        }

        let reservation = Reservation {
            id,
            rentee: rentee.to_string(),
            equipment_id,
            reservation_date: now,
            rented_for,
            status: ReservationStatus::Unapproved,
        };

        self.backend
            .set_equipment_availability(equipment_id, false)
            .await?;
        if let Err(err) = self.backend.persist_reservation(&reservation).await {
            self.restore_availability(equipment_id, true).await;
            return Err(err.into());
        }

        equipment.available = false;
        equipment_slot.commit(equipment);
        self.reservations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(reservation.id, Slot::new(reservation.clone()));

        debug!(
            reservation_id = reservation.id,
            equipment_id, "Reservation created"
        );
        Ok(reservation)
    }

    /// Apply a lifecycle transition atomically.
    ///
    /// Fails with `NotFound` for an unknown id and `InvalidTransition` when the
    /// lifecycle graph has no edge from the current state. Leaving the active
    /// set (Rejected, Returned, Expired) also frees the equipment. On any
    /// failure the reservation and the equipment flag are left as they were.
    pub async fn transition(
        &self,
        id: ReservationId,
        transition: Transition,
    ) -> Result<Reservation, ReservationError> {
        let slot = self.reservation_slot(id)?;
        let _guard = slot.lock_write().await;
        let current = slot.snapshot();
        let from = current.kind();
        let to = transition.target();

        let next_status = transition
            .apply(&current.status)
            .ok_or(ReservationError::InvalidTransition { id, from, to })?;

        self.backend
            .update_reservation_status(id, &next_status)
            .await?;

        let mut updated = current.clone();
        updated.status = next_status;

        if from.holds_equipment() && !to.holds_equipment() {
            let equipment_slot = self.equipment_slot(current.equipment_id)?;
            let _equipment_guard = equipment_slot.lock_write().await;
            if let Err(err) = self
                .backend
                .set_equipment_availability(current.equipment_id, true)
                .await
            {
                self.restore_status(id, &current.status).await;
                return Err(err.into());
            }
            let mut equipment = equipment_slot.snapshot();
            equipment.available = true;
            slot.commit(updated.clone());
            equipment_slot.commit(equipment);
        } else {
            slot.commit(updated.clone());
        }

        debug!(reservation_id = id, from = %from, to = %to, "Reservation transitioned");
        Ok(updated)
    }

    /// Committed state of a reservation.
    pub fn get(&self, id: ReservationId) -> Result<Reservation, ReservationError> {
        self.reservation_slot(id).map(|slot| slot.snapshot())
    }

    /// Snapshot of every reservation in state `kind`, ordered by id.
    pub fn get_by_status(&self, kind: StatusKind) -> Vec<Reservation> {
        self.filtered(|r| r.kind() == kind)
    }

    /// Snapshot of every reservation, ordered by id.
    pub fn all(&self) -> Vec<Reservation> {
        self.filtered(|_| true)
    }

    /// Snapshot of one rentee's reservations, ordered by id.
    pub fn by_rentee(&self, rentee: &str) -> Vec<Reservation> {
        self.filtered(|r| r.rentee == rentee)
    }

    fn filtered(&self, predicate: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let slots: Vec<_> = self
            .reservations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut items: Vec<Reservation> = slots
            .iter()
            .map(|s| s.snapshot())
            .filter(|r| predicate(r))
            .collect();
        items.sort_by_key(|r| r.id);
        items
    }

    fn reservation_slot(
        &self,
        id: ReservationId,
    ) -> Result<Arc<Slot<Reservation>>, ReservationError> {
        self.reservations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(ReservationError::NotFound(id))
    }

    fn equipment_slot(&self, id: EquipmentId) -> Result<Arc<Slot<Equipment>>, ReservationError> {
        self.equipment
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(ReservationError::EquipmentNotFound(id))
    }

    async fn restore_availability(&self, equipment_id: EquipmentId, available: bool) {
        if let Err(err) = self
            .backend
            .set_equipment_availability(equipment_id, available)
            .await
        {
            error!(
                equipment_id,
                error = %err,
                "Failed to restore equipment availability after a failed write"
            );
        }
    }

    async fn restore_status(&self, id: ReservationId, status: &ReservationStatus) {
        if let Err(err) = self.backend.update_reservation_status(id, status).await {
            error!(
                reservation_id = id,
                error = %err,
                "Failed to restore reservation status after a failed write"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendOperation, InMemoryBackend};
    use chrono::Duration;
    use domain::StorageError;

    async fn store_with_equipment() -> (Arc<InMemoryBackend>, ReservationStore, Equipment) {
        let backend = Arc::new(InMemoryBackend::new());
        let store = ReservationStore::new(backend.clone());
        let equipment = store
            .add_equipment("Canon EOS R5", "Camera")
            .await
            .unwrap();
        (backend, store, equipment)
    }

    fn approve() -> Transition {
        Transition::Approve {
            manager_id: "mgr1".to_string(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_marks_equipment_unavailable() {
        let (backend, store, equipment) = store_with_equipment().await;
        let now = Utc::now();

        let reservation = store
            .create("john", equipment.id, now + Duration::days(2), now)
            .await
            .unwrap();

        assert_eq!(reservation.kind(), StatusKind::Unapproved);
        assert_eq!(reservation.reservation_date, now);
        assert!(!store.get_equipment(equipment.id).unwrap().available);
        assert!(store.available_equipment().is_empty());
        assert_eq!(backend.stored_reservation(reservation.id), Some(reservation));
    }

    #[tokio::test]
    async fn test_create_fails_when_equipment_unavailable() {
        let (_, store, equipment) = store_with_equipment().await;
        let now = Utc::now();
        store
            .create("john", equipment.id, now + Duration::days(1), now)
            .await
            .unwrap();

        let err = store
            .create("jane", equipment.id, now + Duration::days(1), now)
            .await
            .unwrap_err();
        assert_eq!(err, ReservationError::EquipmentUnavailable(equipment.id));
        assert_eq!(store.all().len(), 1);
    }

    #[tokio::test]
    async fn test_create_unknown_equipment() {
        let (_, store, _) = store_with_equipment().await;
        let now = Utc::now();
        let err = store.create("john", 99, now, now).await.unwrap_err();
        assert_eq!(err, ReservationError::EquipmentNotFound(99));
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_increasing() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = ReservationStore::new(backend);
        let now = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let equipment = store
                .add_equipment(&format!("Model {}", i), "Tripod")
                .await
                .unwrap();
            let reservation = store
                .create("john", equipment.id, now + Duration::days(1), now)
                .await
                .unwrap();
            ids.push(reservation.id);
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_create_with_allocated_id() {
        let (_, store, equipment) = store_with_equipment().await;
        let now = Utc::now();
        let id = store.allocate_id();
        assert_eq!(store.get(id).unwrap_err(), ReservationError::NotFound(id));

        let reservation = store
            .create_with_id(id, "john", equipment.id, now + Duration::days(1), now)
            .await
            .unwrap();
        assert_eq!(reservation.id, id);
        assert_eq!(store.get(id).unwrap(), reservation);

        let other = store.add_equipment("Sony A7", "Camera").await.unwrap();
        let err = store
            .create_with_id(id, "jane", other.id, now + Duration::days(1), now)
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::PreconditionViolation(_)));
        assert!(store.get_equipment(other.id).unwrap().available);

        let next = store
            .create("jane", other.id, now + Duration::days(1), now)
            .await
            .unwrap();
        assert!(next.id > id);
    }

    #[tokio::test]
    async fn test_transition_invalid_and_not_found() {
        let (_, store, equipment) = store_with_equipment().await;
        let now = Utc::now();
        let reservation = store
            .create("john", equipment.id, now + Duration::days(1), now)
            .await
            .unwrap();

        let err = store
            .transition(reservation.id, Transition::Return { at: now })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReservationError::InvalidTransition {
                id: reservation.id,
                from: StatusKind::Unapproved,
                to: StatusKind::Returned,
            }
        );
        assert_eq!(store.get(reservation.id).unwrap().kind(), StatusKind::Unapproved);

        let err = store.transition(999, approve()).await.unwrap_err();
        assert_eq!(err, ReservationError::NotFound(999));
    }

    #[tokio::test]
    async fn test_terminal_states_reject_further_transitions() {
        let (_, store, equipment) = store_with_equipment().await;
        let now = Utc::now();
        let reservation = store
            .create("john", equipment.id, now + Duration::days(1), now)
            .await
            .unwrap();
        store
            .transition(reservation.id, Transition::Expire { at: now })
            .await
            .unwrap();

        for transition in [approve(), Transition::Expire { at: now }, Transition::Return { at: now }] {
            let err = store.transition(reservation.id, transition).await.unwrap_err();
            assert!(matches!(err, ReservationError::InvalidTransition { .. }));
        }
        assert_eq!(store.get(reservation.id).unwrap().kind(), StatusKind::Expired);
    }

    #[tokio::test]
    async fn test_leaving_active_set_frees_equipment() {
        let (backend, store, equipment) = store_with_equipment().await;
        let now = Utc::now();
        let reservation = store
            .create("john", equipment.id, now + Duration::days(1), now)
            .await
            .unwrap();

        store.transition(reservation.id, approve()).await.unwrap();
        assert!(!store.get_equipment(equipment.id).unwrap().available);

        let returned = store
            .transition(reservation.id, Transition::Return { at: now })
            .await
            .unwrap();
        assert_eq!(returned.kind(), StatusKind::Returned);
        assert!(store.get_equipment(equipment.id).unwrap().available);
        assert_eq!(backend.stored_equipment(equipment.id).map(|e| e.available), Some(true));
    }

    #[tokio::test]
    async fn test_failed_status_write_leaves_state_unchanged() {
        let (backend, store, equipment) = store_with_equipment().await;
        let now = Utc::now();
        let reservation = store
            .create("john", equipment.id, now + Duration::days(1), now)
            .await
            .unwrap();

        backend.fail_next(
            BackendOperation::UpdateReservationStatus,
            StorageError::Connection("connection reset".to_string()),
        );
        let err = store.transition(reservation.id, approve()).await.unwrap_err();

        assert_eq!(err, ReservationError::Connection("connection reset".to_string()));
        assert_eq!(store.get(reservation.id).unwrap(), reservation);
    }

    #[tokio::test]
    async fn test_failed_availability_write_is_compensated() {
        let (backend, store, equipment) = store_with_equipment().await;
        let now = Utc::now();
        let reservation = store
            .create("john", equipment.id, now + Duration::days(1), now)
            .await
            .unwrap();

        backend.fail_next(
            BackendOperation::SetEquipmentAvailability,
            StorageError::Database("disk full".to_string()),
        );
        let err = store
            .transition(
                reservation.id,
                Transition::Reject {
                    manager_id: "mgr1".to_string(),
                    reason: "damaged".to_string(),
                    at: now,
                },
            )
            .await
            .unwrap_err();

        assert_eq!(err, ReservationError::Storage("disk full".to_string()));
        assert_eq!(store.get(reservation.id).unwrap().kind(), StatusKind::Unapproved);
        assert!(!store.get_equipment(equipment.id).unwrap().available);
        assert_eq!(
            backend.stored_reservation(reservation.id).map(|r| r.kind()),
            Some(StatusKind::Unapproved)
        );
    }

    #[tokio::test]
    async fn test_failed_persist_restores_availability() {
        let (backend, store, equipment) = store_with_equipment().await;
        let now = Utc::now();
        backend.fail_next(
            BackendOperation::PersistReservation,
            StorageError::Database("constraint violation".to_string()),
        );

        let err = store
            .create("john", equipment.id, now + Duration::days(1), now)
            .await
            .unwrap_err();

        assert!(matches!(err, ReservationError::Storage(_)));
        assert!(store.get_equipment(equipment.id).unwrap().available);
        assert_eq!(backend.stored_equipment(equipment.id).map(|e| e.available), Some(true));
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn test_queries() {
        let backend = Arc::new(InMemoryBackend::new());
        let store = ReservationStore::new(backend);
        let now = Utc::now();
        let a = store.add_equipment("A", "Audio").await.unwrap();
        let b = store.add_equipment("B", "Audio").await.unwrap();
        let first = store.create("john", a.id, now + Duration::days(1), now).await.unwrap();
        let second = store.create("jane", b.id, now + Duration::days(1), now).await.unwrap();
        store.transition(second.id, approve()).await.unwrap();

        assert_eq!(store.get_by_status(StatusKind::Unapproved), vec![first.clone()]);
        assert_eq!(store.get_by_status(StatusKind::Approved).len(), 1);
        assert!(store.get_by_status(StatusKind::Expired).is_empty());
        assert_eq!(store.by_rentee("john"), vec![first]);
        assert_eq!(store.all().len(), 2);
        assert_eq!(store.get(42).unwrap_err(), ReservationError::NotFound(42));
    }

    #[tokio::test]
    async fn test_load_continues_id_sequence() {
        let now = Utc::now();
        let equipment = Equipment {
            id: 7,
            model: "Sony A7".to_string(),
            category: "Camera".to_string(),
            available: false,
        };
        let reservation = Reservation {
            id: 41,
            rentee: "john".to_string(),
            equipment_id: 7,
            reservation_date: now,
            rented_for: now + Duration::days(1),
            status: ReservationStatus::Unapproved,
        };
        let backend = Arc::new(InMemoryBackend::with_rows(vec![equipment], vec![reservation]));
        let store = ReservationStore::load(backend).await.unwrap();

        assert_eq!(store.get(41).unwrap().kind(), StatusKind::Unapproved);
        let next = store.add_equipment("Rode NT1", "Audio").await.unwrap();
        assert_eq!(next.id, 8);
        let created = store
            .create("jane", next.id, now + Duration::days(1), now)
            .await
            .unwrap();
        assert_eq!(created.id, 42);
    }

    #[tokio::test]
    async fn test_load_surfaces_backend_failure() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.fail_next(
            BackendOperation::LoadEquipment,
            StorageError::Connection("refused".to_string()),
        );
        let err = ReservationStore::load(backend).await.err().unwrap();
        assert_eq!(err, ReservationError::Connection("refused".to_string()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_for_same_equipment() {
        let (_, store, equipment) = store_with_equipment().await;
        let store = Arc::new(store);
        let now = Utc::now();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .create(&format!("rentee-{}", i), equipment.id, now + Duration::days(1), now)
                    .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(err) => assert_eq!(err, ReservationError::EquipmentUnavailable(equipment.id)),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(store.all().len(), 1);
    }
}
