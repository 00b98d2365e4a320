//! Domain services for the rental system.
//!
//! Services contain business logic that operates on domain models.

pub mod backend;
pub mod clock;
pub mod notification;

pub use backend::ReservationBackend;
pub use clock::{Clock, MonotonicClock, SystemClock};
pub use notification::{
    EventSubscriber, LoggingSubscriber, NotificationBus, RecordingSubscriber, SubscriptionId,
};
