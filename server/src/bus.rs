//! In-process publish/subscribe registry for lifecycle events.
//!
//! The bus maps each [`EventType`] to the handlers registered for it.
//! Publishing never blocks on subscribers: the handler list is snapshotted
//! under a read lock, the lock is released, and every handler runs on its own
//! tokio task. A panicking or slow handler therefore affects neither the
//! publisher nor its siblings.
//!
//! Forwarders registered with [`EventBus::subscribe_ordered`] (channel
//! subscriptions, the WebSocket broadcaster) are the exception: they only do
//! a non-blocking send, so they run inline during `publish` and observe
//! events exactly in publish order.
//!
//! Delivery tasks are spawned on a [`TaskTracker`], so [`EventBus::shutdown`]
//! can wait for in-flight deliveries before the process exits.
//!
//! # Example
//!
//! ```rust
//! use pomodoro_server::bus::EventBus;
//! use pomodoro_server::types::{Event, EventType, Task, TaskEventKind};
//! use chrono::Utc;
//!
//! # tokio_test::block_on(async {
//! let bus = EventBus::new();
//! let mut sub = bus.subscribe_channel(&[EventType::TaskCreated]);
//!
//! let task = Task {
//!     id: "t1".to_string(),
//!     title: "review".to_string(),
//!     created_at: Utc::now(),
//!     completed: false,
//! };
//! bus.publish(Event::task(TaskEventKind::Created, task));
//!
//! let event = sub.recv().await.unwrap();
//! assert_eq!(event.event_type(), EventType::TaskCreated);
//! # });
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::{self, Future};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

use crate::types::{Event, EventType};

/// Buffer size of channel subscriptions.
pub const CHANNEL_CAPACITY: usize = 10;

/// Callback invoked once per delivered event.
pub type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Opaque subscription handle. Never reused within one bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Non-blocking callback run inline by [`EventBus::publish`].
pub type Forwarder = Arc<dyn Fn(Event) + Send + Sync>;

#[derive(Clone)]
enum Delivery {
    Spawned(Handler),
    Inline(Forwarder),
}

type Registry = HashMap<EventType, Vec<(SubscriptionId, Delivery)>>;

struct Inner {
    handlers: RwLock<Registry>,
    next_id: AtomicU64,
    tracker: TaskTracker,
}

/// Publish/subscribe hub. Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscription_count())
            .field("in_flight", &self.inner.tracker.len())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Delivers `event` to every handler registered for its type.
    ///
    /// Returns immediately. With no subscribers this is a no-op. Called
    /// outside a tokio runtime, the event is dropped with a warning.
    pub fn publish(&self, event: Event) {
        let event_type = event.event_type();
        let deliveries: Vec<Delivery> = {
            let registry = self.read();
            match registry.get(&event_type) {
                Some(entries) => entries.iter().map(|(_, d)| d.clone()).collect(),
                None => Vec::new(),
            }
        };

        if deliveries.is_empty() {
            trace!(event_type = %event_type, "No subscribers for event");
            return;
        }

        let mut handlers = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            match delivery {
                Delivery::Inline(forward) => {
                    let event = event.clone();
                    if panic::catch_unwind(AssertUnwindSafe(|| forward(event))).is_err() {
                        warn!(event_type = %event_type, "Ordered subscriber panicked");
                    }
                }
                Delivery::Spawned(handler) => handlers.push(handler),
            }
        }

        if handlers.is_empty() {
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!(event_type = %event_type, "Publish outside a runtime, event dropped");
            return;
        };

        trace!(
            event_type = %event_type,
            handlers = handlers.len(),
            "Publishing event"
        );
        for handler in handlers {
            let event = event.clone();
            self.inner
                .tracker
                .spawn_on(async move { handler(event).await }, &runtime);
        }
    }

    /// Registers a synchronous handler for one event type.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.register(event_type, Delivery::Spawned(sync_handler(handler)))
    }

    /// Registers an async handler for one event type.
    pub fn subscribe_async<F, Fut>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(event_type, Delivery::Spawned(async_handler(handler)))
    }

    /// Registers the same synchronous handler for several event types.
    pub fn subscribe_multi<F>(&self, event_types: &[EventType], handler: F) -> Vec<SubscriptionId>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let delivery = Delivery::Spawned(sync_handler(handler));
        dedup(event_types)
            .into_iter()
            .map(|t| self.register(t, delivery.clone()))
            .collect()
    }

    /// Registers a forwarder that runs inline during [`publish`](Self::publish),
    /// so it sees events in exactly the order they were published.
    ///
    /// `forward` must not block or await; a non-blocking channel send is the
    /// intended use. A panic inside it is caught and logged.
    pub fn subscribe_ordered<F>(
        &self,
        event_types: &[EventType],
        forward: F,
    ) -> Vec<SubscriptionId>
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let delivery = Delivery::Inline(Arc::new(forward));
        dedup(event_types)
            .into_iter()
            .map(|t| self.register(t, delivery.clone()))
            .collect()
    }

    /// Subscribes a bounded channel to `event_types`; empty means every type.
    ///
    /// A full buffer drops the event for this subscriber only.
    #[must_use]
    pub fn subscribe_channel(&self, event_types: &[EventType]) -> ChannelSubscription {
        let types = if event_types.is_empty() {
            EventType::ALL.to_vec()
        } else {
            dedup(event_types)
        };

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let ids = self.subscribe_ordered(&types, move |event: Event| match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    event_type = %event.event_type(),
                    "Channel subscriber buffer full, event dropped"
                );
            }
            Err(TrySendError::Closed(_)) => {
                trace!("Channel subscriber closed");
            }
        });

        ChannelSubscription {
            bus: self.clone(),
            ids,
            receiver: rx,
        }
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut removed = false;
        registry.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            removed |= entries.len() != before;
            !entries.is_empty()
        });

        if removed {
            debug!(subscription = %id, "Unsubscribed");
        }
        removed
    }

    /// Number of handlers registered for `event_type`.
    #[must_use]
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.read().get(&event_type).map_or(0, Vec::len)
    }

    /// Total registrations across every event type.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.read().values().map(Vec::len).sum()
    }

    /// Waits for every in-flight delivery to finish.
    pub async fn shutdown(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        debug!("Event bus drained");
    }

    fn register(&self, event_type: EventType, delivery: Delivery) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event_type)
            .or_default()
            .push((id, delivery));
        debug!(subscription = %id, event_type = %event_type, "Subscribed");
        id
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        // Handlers never run under this lock, so a poisoned guard still holds
        // a consistent registry.
        self.inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn sync_handler<F>(handler: F) -> Handler
where
    F: Fn(Event) + Send + Sync + 'static,
{
    Arc::new(move |event: Event| {
        handler(event);
        future::ready(()).boxed()
    })
}

fn async_handler<F, Fut>(handler: F) -> Handler
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event: Event| handler(event).boxed())
}

fn dedup(event_types: &[EventType]) -> Vec<EventType> {
    let mut unique = Vec::with_capacity(event_types.len());
    for t in event_types {
        if !unique.contains(t) {
            unique.push(*t);
        }
    }
    unique
}

/// Receiving end of [`EventBus::subscribe_channel`].
///
/// Dropping it (or calling [`unsubscribe`](Self::unsubscribe)) removes every
/// registration and closes the channel.
pub struct ChannelSubscription {
    bus: EventBus,
    ids: Vec<SubscriptionId>,
    receiver: mpsc::Receiver<Event>,
}

impl fmt::Debug for ChannelSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSubscription")
            .field("ids", &self.ids)
            .finish_non_exhaustive()
    }
}

impl ChannelSubscription {
    /// Waits for the next event. `None` once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Returns a buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    #[must_use]
    pub fn ids(&self) -> &[SubscriptionId] {
        &self.ids
    }

    /// Removes the registrations and closes the channel.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.bus.unsubscribe(id);
        }
        self.receiver.close();
    }
}
