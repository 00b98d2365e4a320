//! Per-reservation write serialization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use domain::models::ReservationId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<ReservationId, Arc<AsyncMutex<()>>>;

/// Registry of async mutexes keyed by reservation id.
///
/// Shared by the workflow and the expiration timers so that every state
/// change of one reservation is linearized, while different reservations
/// never contend. Entries are dropped once no one holds or waits for them.
#[derive(Clone, Default)]
pub struct ReservationLocks {
    inner: Arc<Mutex<LockMap>>,
}

impl ReservationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to reservation `id`.
    pub async fn lock(&self, id: ReservationId) -> ReservationGuard {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(id).or_default())
        };
        let guard = Arc::clone(&mutex).lock_owned().await;
        ReservationGuard {
            id,
            mutex,
            registry: Arc::clone(&self.inner),
            _guard: guard,
        }
    }

    /// Number of ids with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one reservation, released on drop.
pub struct ReservationGuard {
    id: ReservationId,
    mutex: Arc<AsyncMutex<()>>,
    registry: Arc<Mutex<LockMap>>,
    _guard: OwnedMutexGuard<()>,
}

impl ReservationGuard {
    pub fn id(&self) -> ReservationId {
        self.id
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        let mut map = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        // References: the map, this guard, and the owned lock guard. Waiters
        // clone under the map lock, so a count of three means nobody else.
        if Arc::strong_count(&self.mutex) == 3 {
            map.remove(&self.id);
        }
    }
}
