//! Automatic expiration of unapproved reservations.
//!
//! Each Unapproved reservation owns exactly one pending timer. A timer that
//! fires contends for the reservation lock like any other writer, then claims
//! its pending entry before touching the store. From that point `cancel`
//! reports `NotScheduled`. If the reservation left Unapproved in the meantime
//! the firing does nothing.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use domain::models::{Reservation, ReservationEvent, ReservationId, StatusKind, Transition};
use domain::services::{Clock, NotificationBus};
use domain::ReservationError;
use persistence::ReservationStore;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::timer::{TimerHandle, TimerService};
use crate::middleware::metrics::{record_expiration, record_pending_timers, record_transition};
use crate::services::ReservationLocks;

/// Delay before a timer whose expiration hit a storage failure tries again.
const STORAGE_RETRY_DELAY: Duration = Duration::from_secs(5);

struct PendingTimer {
    generation: u64,
    expires_at: DateTime<Utc>,
    _handle: TimerHandle,
}

struct Inner {
    store: Arc<ReservationStore>,
    bus: Arc<NotificationBus>,
    locks: ReservationLocks,
    clock: Arc<dyn Clock>,
    timers: TimerService,
    pending: Mutex<HashMap<ReservationId, PendingTimer>>,
    // Held shared by a firing timer while it mutates the store, exclusively by
    // `cancel_all`.
    firing_gate: RwLock<()>,
    next_generation: AtomicU64,
}

/// Maps each unapproved reservation to its pending expiration timer.
#[derive(Clone)]
pub struct ExpirationScheduler {
    inner: Arc<Inner>,
}

impl ExpirationScheduler {
    pub fn new(
        store: Arc<ReservationStore>,
        bus: Arc<NotificationBus>,
        locks: ReservationLocks,
        clock: Arc<dyn Clock>,
        timers: TimerService,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                bus,
                locks,
                clock,
                timers,
                pending: Mutex::new(HashMap::new()),
                firing_gate: RwLock::new(()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Arm the expiration timer of an Unapproved reservation.
    ///
    /// The timer fires at `reservation_date + timeout_secs`. An existing timer
    /// for the same id is replaced.
    pub fn schedule(
        &self,
        reservation: &Reservation,
        timeout_secs: u64,
    ) -> Result<DateTime<Utc>, ReservationError> {
        if reservation.kind() != StatusKind::Unapproved {
            return Err(ReservationError::PreconditionViolation(format!(
                "Reservation {} is {}, only unapproved reservations expire",
                reservation.id,
                reservation.kind()
            )));
        }

        let expires_at = reservation.expires_at(timeout_secs);
        let replaced = self.inner.arm(reservation.id, expires_at);
        if replaced {
            debug!(reservation_id = reservation.id, %expires_at, "Expiration timer replaced");
        } else {
            debug!(reservation_id = reservation.id, %expires_at, "Expiration timer scheduled");
        }
        Ok(expires_at)
    }

    /// Cancel the pending timer of `id`.
    ///
    /// Fails with `NotScheduled` if no timer is registered, which includes a
    /// timer that has already fired or is firing right now.
    pub fn cancel(&self, id: ReservationId) -> Result<(), ReservationError> {
        let removed = {
            let mut pending = self.inner.pending();
            let removed = pending.remove(&id);
            record_pending_timers(pending.len());
            removed
        };
        match removed {
            Some(_) => {
                debug!(reservation_id = id, "Expiration timer cancelled");
                Ok(())
            }
            None => Err(ReservationError::NotScheduled(id)),
        }
    }

    pub fn is_scheduled(&self, id: ReservationId) -> bool {
        self.inner.pending().contains_key(&id)
    }

    /// Deadline of the pending timer of `id`, if any.
    pub fn expires_at(&self, id: ReservationId) -> Option<DateTime<Utc>> {
        self.inner.pending().get(&id).map(|p| p.expires_at)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    /// Cancel every pending timer.
    ///
    /// Waits for timers that are already mutating the store; once this returns
    /// no timer armed before the call will touch the store.
    pub async fn cancel_all(&self) -> usize {
        let _gate = self.inner.firing_gate.write().await;
        let drained: Vec<_> = {
            let mut pending = self.inner.pending();
            let drained = pending.drain().collect();
            record_pending_timers(0);
            drained
        };
        info!(cancelled = drained.len(), "Cancelled all expiration timers");
        drained.len()
    }

    /// Expire `id` now, as if its timer had fired.
    ///
    /// Returns `Ok(false)` when the reservation already left Unapproved. Unlike
    /// a firing timer, storage failures are returned to the caller.
    pub async fn expire(&self, id: ReservationId) -> Result<bool, ReservationError> {
        let _guard = self.inner.locks.lock(id).await;
        let _gate = self.inner.firing_gate.read().await;

        let current = self.inner.store.get(id)?;
        if current.kind() != StatusKind::Unapproved {
            debug!(reservation_id = id, status = %current.kind(), "Manual expire ignored");
            return Ok(false);
        }

        let at = self.inner.clock.now();
        let expired = self
            .inner
            .store
            .transition(id, Transition::Expire { at })
            .await?;
        self.inner.disarm(id);
        self.inner.committed(&expired, at);
        Ok(true)
    }
}

impl Inner {
    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<ReservationId, PendingTimer>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_timer(
        self: &Arc<Self>,
        id: ReservationId,
        expires_at: DateTime<Utc>,
    ) -> PendingTimer {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let delay = (expires_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let weak = Arc::downgrade(self);
        let handle = self
            .timers
            .schedule_at(Instant::now() + delay, fire(weak, id, generation));
        PendingTimer {
            generation,
            expires_at,
            _handle: handle,
        }
    }

    /// Arm a timer for `id` at `expires_at`. Returns whether one was replaced.
    fn arm(self: &Arc<Self>, id: ReservationId, expires_at: DateTime<Utc>) -> bool {
        let timer = self.start_timer(id, expires_at);
        let mut pending = self.pending();
        let replaced = pending.insert(id, timer).is_some();
        record_pending_timers(pending.len());
        replaced
    }

    /// Arm a retry for `id` unless a timer was scheduled meanwhile.
    fn rearm(self: &Arc<Self>, id: ReservationId, expires_at: DateTime<Utc>) -> bool {
        let timer = self.start_timer(id, expires_at);
        let mut pending = self.pending();
        let armed = match pending.entry(id) {
            // Dropping the unused timer cancels it.
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(timer);
                true
            }
        };
        record_pending_timers(pending.len());
        armed
    }

    /// Remove the entry of `id` whatever its generation.
    fn disarm(&self, id: ReservationId) {
        let mut pending = self.pending();
        pending.remove(&id);
        record_pending_timers(pending.len());
    }

    /// Take the entry of `id` if it still belongs to `generation`.
    ///
    /// A firing timer calls this before its store write, so a concurrent
    /// `cancel` either wins and stops the fire or sees `NotScheduled`.
    fn claim(&self, id: ReservationId, generation: u64) -> bool {
        let mut pending = self.pending();
        let owned = pending
            .get(&id)
            .is_some_and(|entry| entry.generation == generation);
        if owned {
            pending.remove(&id);
            record_pending_timers(pending.len());
        }
        owned
    }

    fn committed(&self, reservation: &Reservation, at: DateTime<Utc>) {
        record_transition(StatusKind::Expired);
        info!(
            reservation_id = reservation.id,
            equipment_id = reservation.equipment_id,
            "Reservation expired"
        );
        self.bus
            .publish(ReservationEvent::from_reservation(reservation, at));
    }
}

async fn fire(inner: Weak<Inner>, id: ReservationId, generation: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let _guard = inner.locks.lock(id).await;
    let _gate = inner.firing_gate.read().await;

    // Cancelled, replaced or drained while waiting for the lock.
    if !inner.claim(id, generation) {
        debug!(reservation_id = id, "Stale expiration timer ignored");
        return;
    }

    let at = inner.clock.now();
    match inner.store.transition(id, Transition::Expire { at }).await {
        Ok(expired) => {
            record_expiration();
            inner.committed(&expired, at);
        }
        Err(ReservationError::InvalidTransition { from, .. }) => {
            debug!(reservation_id = id, status = %from, "Expiration lost the race, nothing to do");
        }
        Err(ReservationError::NotFound(_)) => {
            warn!(reservation_id = id, "Expiration timer fired for an unknown reservation");
        }
        Err(err) => {
            error!(
                reservation_id = id,
                error = %err,
                retry_in_secs = STORAGE_RETRY_DELAY.as_secs(),
                "Failed to expire reservation"
            );
            let retry_at = at
                + chrono::Duration::from_std(STORAGE_RETRY_DELAY)
                    .unwrap_or_else(|_| chrono::Duration::seconds(5));
            if !inner.rearm(id, retry_at) {
                debug!(reservation_id = id, "Expiration rescheduled meanwhile, retry dropped");
            }
        }
    }
}
