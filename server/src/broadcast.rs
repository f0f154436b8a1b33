//! WebSocket fan-out of bus events.
//!
//! This module bridges the [`EventBus`] to any number of WebSocket clients.
//! A single ordered bus subscription (all event types) converts each event
//! into an [`EventEnvelope`] and pushes it into a tokio broadcast channel;
//! every connected client holds its own receiver and applies its own filter.
//!
//! # Architecture
//!
//! - [`EventBroadcaster`] - broadcast channel of envelopes, attached to the bus
//! - [`SubscriberFilter`] - optional category or event-type criteria per client
//!
//! # Example
//!
//! ```rust
//! use pomodoro_server::broadcast::{EventBroadcaster, SubscriberFilter};
//! use pomodoro_server::types::{Event, EventCategory, EventType, Task, TaskEventKind};
//! use chrono::Utc;
//!
//! let broadcaster = EventBroadcaster::new();
//! let mut rx = broadcaster.subscribe();
//!
//! let task = Task {
//!     id: "t1".to_string(),
//!     title: "plan sprint".to_string(),
//!     created_at: Utc::now(),
//!     completed: false,
//! };
//! let envelope = Event::task(TaskEventKind::Created, task).to_envelope();
//! broadcaster.broadcast(envelope.clone());
//!
//! let filter = SubscriberFilter::new().with_category(EventCategory::Task);
//! assert!(filter.matches(&envelope));
//! assert!(!SubscriberFilter::new()
//!     .with_types([EventType::PomodoroTick])
//!     .matches(&envelope));
//! ```

use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::{debug, trace};

use crate::bus::{EventBus, SubscriptionId};
use crate::types::{EventCategory, EventEnvelope, EventType};

/// Default channel capacity.
///
/// Clients that fall further behind than this receive
/// `RecvError::Lagged` and skip the missed envelopes.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Broadcast hub for envelopes sent to WebSocket clients.
///
/// `EventBroadcaster` is `Clone`; clones share the same channel.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: Sender<EventEnvelope>,
}

impl EventBroadcaster {
    /// Creates a broadcaster with [`DEFAULT_CHANNEL_CAPACITY`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a broadcaster with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        debug!(capacity, "Created event broadcaster");
        Self { sender }
    }

    /// Forwards every bus event into this broadcaster, in publish order.
    ///
    /// Returns the bus subscriptions so the caller can detach later.
    pub fn attach(&self, bus: &EventBus) -> Vec<SubscriptionId> {
        let broadcaster = self.clone();
        let ids = bus.subscribe_ordered(&EventType::ALL, move |event| {
            broadcaster.broadcast(event.to_envelope());
        });
        debug!(subscriptions = ids.len(), "Broadcaster attached to event bus");
        ids
    }

    /// Subscribes to envelopes broadcast from now on.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<EventEnvelope> {
        let rx = self.sender.subscribe();
        debug!(
            subscriber_count = self.subscriber_count(),
            "New subscriber added"
        );
        rx
    }

    /// Sends `envelope` to every current subscriber.
    ///
    /// Returns how many subscribers it reached. Never blocks; a full channel
    /// overwrites its oldest entry.
    pub fn broadcast(&self, envelope: EventEnvelope) -> usize {
        let event_type = envelope.event_type;
        match self.sender.send(envelope) {
            Ok(receivers) => {
                trace!(event_type = %event_type, receivers, "Envelope broadcast");
                receivers
            }
            Err(_) => {
                trace!(event_type = %event_type, "No WebSocket clients connected");
                0
            }
        }
    }

    /// Number of live receivers, i.e. connected WebSocket clients.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Which envelopes a client wants.
///
/// An explicit type list takes precedence over the category. With neither
/// set, everything matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriberFilter {
    /// Only events of this category.
    pub category: Option<EventCategory>,

    /// Only these event types.
    pub types: Option<Vec<EventType>>,
}

impl SubscriberFilter {
    /// Creates a filter that matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_category(mut self, category: EventCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Restricts the filter to `types`. An empty list clears the restriction.
    #[must_use]
    pub fn with_types(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        let types: Vec<EventType> = types.into_iter().collect();
        self.types = if types.is_empty() { None } else { Some(types) };
        self
    }

    /// Returns `true` if the envelope passes this filter.
    #[must_use]
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        self.accepts(envelope.event_type)
    }

    /// Returns `true` if events of `event_type` pass this filter.
    #[must_use]
    pub fn accepts(&self, event_type: EventType) -> bool {
        match (&self.types, self.category) {
            (Some(types), _) => types.contains(&event_type),
            (None, Some(category)) => event_type.category() == category,
            (None, None) => true,
        }
    }

    /// The event types this filter accepts, for bus subscriptions.
    #[must_use]
    pub fn event_types(&self) -> Vec<EventType> {
        EventType::ALL
            .into_iter()
            .filter(|t| self.accepts(*t))
            .collect()
    }

    /// Returns `true` if the filter matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.types.is_none()
    }
}
