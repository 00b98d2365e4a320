//! Notification bus for reservation lifecycle events.
//!
//! Observers (availability views, UI refresh triggers, audit sinks) subscribe by
//! event kind. Events are published only after the state change has committed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::models::{EventKind, ReservationEvent};

/// Capacity of the broadcast mirror before slow receivers start lagging.
const BROADCAST_CAPACITY: usize = 256;

/// Receives reservation events synchronously on the publishing task.
///
/// Implementations must not block; hand work off to a channel if needed.
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &ReservationEvent);
}

impl<F> EventSubscriber for F
where
    F: Fn(&ReservationEvent) + Send + Sync,
{
    fn on_event(&self, event: &ReservationEvent) {
        self(event)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    filter: Option<EventKind>,
    subscriber: Arc<dyn EventSubscriber>,
}

/// Typed event bus mapping event kinds to subscriber callbacks.
///
/// Constructed once at server start and passed to the components that publish.
pub struct NotificationBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<ReservationEvent>,
}

impl NotificationBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Subscribe to a single event kind.
    pub fn subscribe<S>(&self, kind: EventKind, subscriber: S) -> SubscriptionId
    where
        S: EventSubscriber + 'static,
    {
        self.add(Some(kind), Arc::new(subscriber))
    }

    /// Subscribe to every event kind.
    pub fn subscribe_all<S>(&self, subscriber: S) -> SubscriptionId
    where
        S: EventSubscriber + 'static,
    {
        self.add(None, Arc::new(subscriber))
    }

    /// Subscribe a shared subscriber, optionally filtered by kind.
    pub fn subscribe_shared(
        &self,
        kind: Option<EventKind>,
        subscriber: Arc<dyn EventSubscriber>,
    ) -> SubscriptionId {
        self.add(kind, subscriber)
    }

    /// Remove a subscription. Returns false if it was already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Async receiver mirroring every published event.
    pub fn receiver(&self) -> broadcast::Receiver<ReservationEvent> {
        self.sender.subscribe()
    }

    /// Deliver an event to matching subscribers in subscription order.
    ///
    /// Returns the number of synchronous subscribers notified.
    pub fn publish(&self, event: ReservationEvent) -> usize {
        // Snapshot so subscribers may (un)subscribe from inside a callback.
        let targets: Vec<Arc<dyn EventSubscriber>> = self
            .subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.filter.map_or(true, |kind| kind == event.kind))
            .map(|s| Arc::clone(&s.subscriber))
            .collect();

        for subscriber in &targets {
            subscriber.on_event(&event);
        }

        tracing::debug!(
            event = %event.kind,
            reservation_id = event.reservation_id,
            subscribers = targets.len(),
            "Published reservation event"
        );

        // No async receivers is not an error.
        let _ = self.sender.send(event);
        targets.len()
    }

    fn add(&self, filter: Option<EventKind>, subscriber: Arc<dyn EventSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                filter,
                subscriber,
            });
        id
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber that logs every event.
#[derive(Debug, Clone, Default)]
pub struct LoggingSubscriber;

impl EventSubscriber for LoggingSubscriber {
    fn on_event(&self, event: &ReservationEvent) {
        tracing::info!(
            event = %event.kind,
            reservation_id = event.reservation_id,
            equipment_id = event.equipment_id,
            status = %event.status,
            "Reservation state changed"
        );
    }
}

/// Subscriber that keeps every event it sees.
///
/// Intended for development and tests.
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    events: Mutex<Vec<ReservationEvent>>,
}

impl RecordingSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events received so far.
    pub fn events(&self) -> Vec<ReservationEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Kinds of the events received so far, in order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl EventSubscriber for RecordingSubscriber {
    fn on_event(&self, event: &ReservationEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
