//! Request-facing reservation workflow.
//!
//! Every state change takes the reservation's lock first, so manual
//! transitions and expiration timers on the same id are linearized.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use domain::models::{
    CreateEquipmentRequest, Equipment, EquipmentId, Reservation, ReservationEvent, ReservationId,
    StatusKind, Transition,
};
use domain::services::{Clock, NotificationBus};
use domain::ReservationError;
use persistence::ReservationStore;
use shared::validation::{validate_expiration_timeout, validate_rented_for, validate_user_id};
use tracing::{debug, info, warn};

use super::locks::ReservationLocks;
use crate::jobs::{ExpirationScheduler, TimerService};
use crate::middleware::metrics::record_transition;

pub struct ReservationWorkflow {
    store: Arc<ReservationStore>,
    scheduler: ExpirationScheduler,
    bus: Arc<NotificationBus>,
    locks: ReservationLocks,
    clock: Arc<dyn Clock>,
    expiration_timeout_secs: AtomicU64,
}

impl ReservationWorkflow {
    /// Wire a workflow and its expiration scheduler around a store.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        store: Arc<ReservationStore>,
        bus: Arc<NotificationBus>,
        clock: Arc<dyn Clock>,
        expiration_timeout_secs: u64,
    ) -> Result<Self, ReservationError> {
        validate_expiration_timeout(expiration_timeout_secs)?;
        let locks = ReservationLocks::new();
        let scheduler = ExpirationScheduler::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            locks.clone(),
            Arc::clone(&clock),
            TimerService::new(),
        );
        Ok(Self {
            store,
            scheduler,
            bus,
            locks,
            clock,
            expiration_timeout_secs: AtomicU64::new(expiration_timeout_secs),
        })
    }

    pub fn store(&self) -> &Arc<ReservationStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &ExpirationScheduler {
        &self.scheduler
    }

    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn expiration_timeout(&self) -> u64 {
        self.expiration_timeout_secs.load(Ordering::SeqCst)
    }

    /// Change the timeout used for reservations created from now on.
    ///
    /// Timers already pending keep their original deadline.
    pub fn set_expiration_timeout(&self, seconds: u64) -> Result<(), ReservationError> {
        validate_expiration_timeout(seconds)?;
        let previous = self.expiration_timeout_secs.swap(seconds, Ordering::SeqCst);
        info!(previous, current = seconds, "Expiration timeout changed");
        Ok(())
    }

    /// Reserve a piece of equipment and arm its expiration timer.
    pub async fn reserve_equipment(
        &self,
        equipment_id: EquipmentId,
        rentee_id: &str,
        rented_for: DateTime<Utc>,
    ) -> Result<Reservation, ReservationError> {
        validate_user_id(rentee_id)?;
        let now = self.clock.now();
        validate_rented_for(rented_for, now)?;

        // Lock before the id becomes visible so approve, reject and expire
        // wait until the timer is armed and Created is published.
        let id = self.store.allocate_id();
        let _guard = self.locks.lock(id).await;
        let reservation = self
            .store
            .create_with_id(id, rentee_id, equipment_id, rented_for, now)
            .await?;
        record_transition(StatusKind::Unapproved);
        self.scheduler
            .schedule(&reservation, self.expiration_timeout())?;

        info!(
            reservation_id = reservation.id,
            equipment_id,
            rentee = rentee_id,
            "Reservation created"
        );
        self.bus
            .publish(ReservationEvent::from_reservation(&reservation, now));
        Ok(reservation)
    }

    /// Approve an Unapproved reservation.
    ///
    /// Fails with `AlreadyExpired` if its timer won the race.
    pub async fn approve_reservation(
        &self,
        id: ReservationId,
        manager_id: &str,
    ) -> Result<Reservation, ReservationError> {
        validate_user_id(manager_id)?;
        let _guard = self.locks.lock(id).await;
        self.ensure_unapproved(id, StatusKind::Approved)?;

        let at = self.clock.now();
        let approved = self
            .store
            .transition(
                id,
                Transition::Approve {
                    manager_id: manager_id.to_string(),
                    at,
                },
            )
            .await?;
        self.disarm(id);

        info!(reservation_id = id, manager = manager_id, "Reservation approved");
        self.committed(&approved, at);
        Ok(approved)
    }

    /// Reject an Unapproved reservation and free its equipment.
    pub async fn reject_reservation(
        &self,
        id: ReservationId,
        manager_id: &str,
        reason: &str,
    ) -> Result<Reservation, ReservationError> {
        validate_user_id(manager_id)?;
        let _guard = self.locks.lock(id).await;
        self.ensure_unapproved(id, StatusKind::Rejected)?;

        let at = self.clock.now();
        let rejected = self
            .store
            .transition(
                id,
                Transition::Reject {
                    manager_id: manager_id.to_string(),
                    reason: reason.to_string(),
                    at,
                },
            )
            .await?;
        self.disarm(id);

        info!(reservation_id = id, manager = manager_id, reason, "Reservation rejected");
        self.committed(&rejected, at);
        Ok(rejected)
    }

    /// Mark an Approved reservation as returned and free its equipment.
    pub async fn return_reservation(&self, id: ReservationId) -> Result<Reservation, ReservationError> {
        let _guard = self.locks.lock(id).await;
        let at = self.clock.now();
        let returned = self.store.transition(id, Transition::Return { at }).await?;

        info!(reservation_id = id, "Reservation returned");
        self.committed(&returned, at);
        Ok(returned)
    }

    /// Expire a reservation now. `Ok(false)` if it is no longer Unapproved.
    pub async fn expire_reservation(&self, id: ReservationId) -> Result<bool, ReservationError> {
        self.scheduler.expire(id).await
    }

    pub fn is_scheduled(&self, id: ReservationId) -> bool {
        self.scheduler.is_scheduled(id)
    }

    pub fn get(&self, id: ReservationId) -> Result<Reservation, ReservationError> {
        self.store.get(id)
    }

    /// Reservations in state `kind`, or all of them.
    pub fn list(&self, kind: Option<StatusKind>) -> Vec<Reservation> {
        match kind {
            Some(kind) => self.store.get_by_status(kind),
            None => self.store.all(),
        }
    }

    pub fn reservations_for_rentee(&self, rentee: &str) -> Vec<Reservation> {
        self.store.by_rentee(rentee)
    }

    /// Approved reservations of `rentee` past their end date.
    pub fn overdue_count(&self, rentee: &str) -> usize {
        let now = self.clock.now();
        self.store
            .by_rentee(rentee)
            .iter()
            .filter(|r| r.is_overdue(now))
            .count()
    }

    pub async fn add_equipment(
        &self,
        request: &CreateEquipmentRequest,
    ) -> Result<Equipment, ReservationError> {
        if !request.available {
            return Err(ReservationError::Validation(
                "New equipment must be available".into(),
            ));
        }
        let equipment = self
            .store
            .add_equipment(&request.model, &request.category)
            .await?;
        info!(equipment_id = equipment.id, equipment = %equipment, "Equipment added");
        Ok(equipment)
    }

    pub fn list_equipment(&self) -> Vec<Equipment> {
        self.store.all_equipment()
    }

    pub fn list_available_equipment(&self) -> Vec<Equipment> {
        self.store.available_equipment()
    }

    /// Arm timers for every Unapproved reservation, e.g. after loading the
    /// store at start-up. Deadlines already in the past fire right away.
    pub async fn resume_pending(&self) -> Result<usize, ReservationError> {
        let timeout = self.expiration_timeout();
        let mut resumed = 0;
        for reservation in self.store.get_by_status(StatusKind::Unapproved) {
            let _guard = self.locks.lock(reservation.id).await;
            let current = self.store.get(reservation.id)?;
            if current.kind() == StatusKind::Unapproved {
                self.scheduler.schedule(&current, timeout)?;
                resumed += 1;
            }
        }
        info!(resumed, "Resumed pending expirations");
        Ok(resumed)
    }

    /// Stop all expiration timers. No timer fires after this returns.
    pub async fn shutdown(&self) -> usize {
        self.scheduler.cancel_all().await
    }

    fn ensure_unapproved(&self, id: ReservationId, to: StatusKind) -> Result<(), ReservationError> {
        let current = self.store.get(id)?;
        match current.kind() {
            StatusKind::Unapproved => Ok(()),
            StatusKind::Expired => Err(ReservationError::AlreadyExpired(id)),
            from => Err(ReservationError::InvalidTransition { id, from, to }),
        }
    }

    fn disarm(&self, id: ReservationId) {
        if let Err(err) = self.scheduler.cancel(id) {
            // Pending timers are only dropped by `shutdown`.
            warn!(reservation_id = id, error = %err, "No expiration timer to cancel");
        }
    }

    fn committed(&self, reservation: &Reservation, at: DateTime<Utc>) {
        record_transition(reservation.kind());
        self.bus
            .publish(ReservationEvent::from_reservation(reservation, at));
    }
}
