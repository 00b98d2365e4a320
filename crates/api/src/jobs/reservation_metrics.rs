//! Background job refreshing reservation gauges.

use std::sync::Arc;
use std::time::Duration;

use domain::models::StatusKind;
use domain::services::Clock;
use persistence::ReservationStore;
use tracing::debug;

use super::expiration::ExpirationScheduler;
use super::scheduler::Job;
use crate::middleware::metrics::{record_pending_timers, record_reservation_gauges};

/// Publishes per-status counts, overdue rentals and pending timers.
pub struct ReservationMetricsJob {
    store: Arc<ReservationStore>,
    scheduler: ExpirationScheduler,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ReservationMetricsJob {
    pub fn new(
        store: Arc<ReservationStore>,
        scheduler: ExpirationScheduler,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            scheduler,
            clock,
            interval,
        }
    }

    fn snapshot(&self) -> (Vec<(StatusKind, usize)>, usize) {
        let all = self.store.all();
        let by_status = StatusKind::ALL
            .iter()
            .map(|kind| (*kind, all.iter().filter(|r| r.kind() == *kind).count()))
            .collect();
        let now = self.clock.now();
        let overdue = all.iter().filter(|r| r.is_overdue(now)).count();
        (by_status, overdue)
    }
}

#[async_trait::async_trait]
impl Job for ReservationMetricsJob {
    fn name(&self) -> &'static str {
        "reservation_metrics"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self) -> Result<(), String> {
        let (by_status, overdue) = self.snapshot();
        record_reservation_gauges(&by_status, overdue);
        record_pending_timers(self.scheduler.pending_count());
        debug!(overdue, "Reservation gauges refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::timer::TimerService;
    use crate::services::ReservationLocks;
    use chrono::Duration as ChronoDuration;
    use domain::models::Transition;
    use domain::services::{NotificationBus, SystemClock};
    use persistence::InMemoryBackend;

    #[tokio::test]
    async fn test_snapshot_counts() {
        let store = Arc::new(ReservationStore::new(Arc::new(InMemoryBackend::new())));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let now = clock.now();

        let a = store.add_equipment("Gopro 12", "Camera").await.unwrap();
        let b = store.add_equipment("Gopro 11", "Camera").await.unwrap();
        store
            .create("john", a.id, now + ChronoDuration::days(2), now)
            .await
            .unwrap();
        // Ends in the past once approved, so it counts as overdue.
        let late = store
            .create("jane", b.id, now - ChronoDuration::days(1), now - ChronoDuration::days(3))
            .await
            .unwrap();
        store
            .transition(
                late.id,
                Transition::Approve {
                    manager_id: "mgr1".into(),
                    at: now,
                },
            )
            .await
            .unwrap();

        let scheduler = ExpirationScheduler::new(
            Arc::clone(&store),
            Arc::new(NotificationBus::new()),
            ReservationLocks::new(),
            Arc::clone(&clock),
            TimerService::new(),
        );
        let job = ReservationMetricsJob::new(store, scheduler, clock, Duration::from_secs(30));

        let (by_status, overdue) = job.snapshot();
        assert!(by_status.contains(&(StatusKind::Unapproved, 1)));
        assert!(by_status.contains(&(StatusKind::Approved, 1)));
        assert!(by_status.contains(&(StatusKind::Expired, 0)));
        assert_eq!(overdue, 1);
        assert_eq!(job.name(), "reservation_metrics");
        assert!(job.execute().await.is_ok());
    }
}
