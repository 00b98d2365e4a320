//! Timers, reservation expiration and periodic background jobs.

pub mod expiration;
mod reservation_metrics;
mod scheduler;
pub mod timer;

pub use expiration::ExpirationScheduler;
pub use reservation_metrics::ReservationMetricsJob;
pub use scheduler::{Job, JobScheduler};
pub use timer::{TimerHandle, TimerService};
