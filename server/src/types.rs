//! Shared domain and event types for the Pomodoro server.
//!
//! This module defines the session record, the task record and the events
//! flowing through the bus. Events are immutable once created; every
//! subscriber receives its own copy.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every sixth phase is a long break.
pub const LONG_BREAK_INTERVAL: u32 = 6;

/// Lifecycle state of a pomodoro session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PomodoroState {
    Active,
    Paused,
    Finished,
}

/// Activity type of the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Work,
    ShortBreak,
    LongBreak,
}

impl Phase {
    /// Returns `true` for short and long breaks.
    #[must_use]
    pub fn is_break(self) -> bool {
        matches!(self, Self::ShortBreak | Self::LongBreak)
    }

    /// Phase and phase count of the session that follows `prior`.
    ///
    /// The first session ever is `(Work, 1)`. After a break comes work; after
    /// work comes a break, long when the new count is a multiple of
    /// [`LONG_BREAK_INTERVAL`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use pomodoro_server::types::Phase;
    ///
    /// assert_eq!(Phase::following(None), (Phase::Work, 1));
    /// assert_eq!(Phase::following(Some((Phase::Work, 1))), (Phase::ShortBreak, 2));
    /// assert_eq!(Phase::following(Some((Phase::Work, 5))), (Phase::LongBreak, 6));
    /// assert_eq!(Phase::following(Some((Phase::LongBreak, 6))), (Phase::Work, 7));
    /// ```
    #[must_use]
    pub fn following(prior: Option<(Phase, u32)>) -> (Phase, u32) {
        let Some((phase, count)) = prior else {
            return (Self::Work, 1);
        };

        let next_count = count.saturating_add(1);
        if phase.is_break() {
            (Self::Work, next_count)
        } else if next_count % LONG_BREAK_INTERVAL == 0 {
            (Self::LongBreak, next_count)
        } else {
            (Self::ShortBreak, next_count)
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Work => "work",
            Self::ShortBreak => "short break",
            Self::LongBreak => "long break",
        };
        f.write_str(label)
    }
}

/// One run of the technique.
///
/// At most one session is `Active` or `Paused` at any time. While a phase
/// runs, `elapsed_secs + remaining_secs` equals the configured length of the
/// current phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pomodoro {
    /// Opaque unique identifier (UUID v4).
    pub id: String,

    pub state: PomodoroState,

    pub phase: Phase,

    /// 1-based, incremented on every phase transition.
    pub phase_count: u32,

    pub start_time: DateTime<Utc>,

    pub work_duration_secs: u64,

    pub break_duration_secs: u64,

    pub long_break_duration_secs: u64,

    pub remaining_secs: u64,

    pub elapsed_secs: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl Pomodoro {
    /// Configured length of the current phase.
    #[must_use]
    pub fn phase_duration_secs(&self) -> u64 {
        match self.phase {
            Phase::Work => self.work_duration_secs,
            Phase::ShortBreak => self.break_duration_secs,
            Phase::LongBreak => self.long_break_duration_secs,
        }
    }

    /// Returns `true` while the session is `Active` or `Paused`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state, PomodoroState::Active | PomodoroState::Paused)
    }
}

/// A named unit of work a session can be attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub completed: bool,
}

/// Broad grouping of event types, used by stream filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Pomodoro,
    Task,
}

/// Event type tag. The serialized form (`pomodoro.started`, ...) is the
/// string clients use to subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "pomodoro.started")]
    PomodoroStarted,
    #[serde(rename = "pomodoro.tick")]
    PomodoroTick,
    #[serde(rename = "pomodoro.paused")]
    PomodoroPaused,
    #[serde(rename = "pomodoro.resumed")]
    PomodoroResumed,
    #[serde(rename = "pomodoro.stopped")]
    PomodoroStopped,
    #[serde(rename = "pomodoro.completed")]
    PomodoroCompleted,
    #[serde(rename = "task.created")]
    TaskCreated,
    #[serde(rename = "task.updated")]
    TaskUpdated,
    #[serde(rename = "task.deleted")]
    TaskDeleted,
}

impl EventType {
    /// Every event type, pomodoro types first.
    pub const ALL: [EventType; 9] = [
        Self::PomodoroStarted,
        Self::PomodoroTick,
        Self::PomodoroPaused,
        Self::PomodoroResumed,
        Self::PomodoroStopped,
        Self::PomodoroCompleted,
        Self::TaskCreated,
        Self::TaskUpdated,
        Self::TaskDeleted,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PomodoroStarted => "pomodoro.started",
            Self::PomodoroTick => "pomodoro.tick",
            Self::PomodoroPaused => "pomodoro.paused",
            Self::PomodoroResumed => "pomodoro.resumed",
            Self::PomodoroStopped => "pomodoro.stopped",
            Self::PomodoroCompleted => "pomodoro.completed",
            Self::TaskCreated => "task.created",
            Self::TaskUpdated => "task.updated",
            Self::TaskDeleted => "task.deleted",
        }
    }

    #[must_use]
    pub fn category(self) -> EventCategory {
        match self {
            Self::PomodoroStarted
            | Self::PomodoroTick
            | Self::PomodoroPaused
            | Self::PomodoroResumed
            | Self::PomodoroStopped
            | Self::PomodoroCompleted => EventCategory::Pomodoro,
            Self::TaskCreated | Self::TaskUpdated | Self::TaskDeleted => EventCategory::Task,
        }
    }

    /// All event types belonging to `category`.
    #[must_use]
    pub fn in_category(category: EventCategory) -> Vec<EventType> {
        Self::ALL
            .into_iter()
            .filter(|t| t.category() == category)
            .collect()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type '{s}'"))
    }
}

/// What happened to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PomodoroEventKind {
    Started,
    Tick,
    Paused,
    Resumed,
    Stopped,
    Completed,
}

/// What happened to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Created,
    Updated,
    Deleted,
}

/// Session lifecycle event carrying a snapshot of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PomodoroEvent {
    pub kind: PomodoroEventKind,
    pub timestamp: DateTime<Utc>,
    pub pomodoro: Pomodoro,
}

/// Task lifecycle event carrying a snapshot of the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub timestamp: DateTime<Utc>,
    pub task: Task,
}

/// An event flowing through the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Pomodoro(PomodoroEvent),
    Task(TaskEvent),
}

impl Event {
    /// Builds a session event stamped with the current time.
    #[must_use]
    pub fn pomodoro(kind: PomodoroEventKind, pomodoro: Pomodoro) -> Self {
        Self::Pomodoro(PomodoroEvent {
            kind,
            timestamp: Utc::now(),
            pomodoro,
        })
    }

    /// Builds a task event stamped with the current time.
    #[must_use]
    pub fn task(kind: TaskEventKind, task: Task) -> Self {
        Self::Task(TaskEvent {
            kind,
            timestamp: Utc::now(),
            task,
        })
    }

    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Pomodoro(event) => match event.kind {
                PomodoroEventKind::Started => EventType::PomodoroStarted,
                PomodoroEventKind::Tick => EventType::PomodoroTick,
                PomodoroEventKind::Paused => EventType::PomodoroPaused,
                PomodoroEventKind::Resumed => EventType::PomodoroResumed,
                PomodoroEventKind::Stopped => EventType::PomodoroStopped,
                PomodoroEventKind::Completed => EventType::PomodoroCompleted,
            },
            Self::Task(event) => match event.kind {
                TaskEventKind::Created => EventType::TaskCreated,
                TaskEventKind::Updated => EventType::TaskUpdated,
                TaskEventKind::Deleted => EventType::TaskDeleted,
            },
        }
    }

    #[must_use]
    pub fn category(&self) -> EventCategory {
        match self {
            Self::Pomodoro(_) => EventCategory::Pomodoro,
            Self::Task(_) => EventCategory::Task,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Pomodoro(event) => event.timestamp,
            Self::Task(event) => event.timestamp,
        }
    }

    /// Converts the event to the wire envelope sent to streaming clients.
    #[must_use]
    pub fn to_envelope(&self) -> EventEnvelope {
        let payload = match self {
            Self::Pomodoro(event) => EnvelopePayload::Pomodoro(event.pomodoro.clone()),
            Self::Task(event) => EnvelopePayload::Task(event.task.clone()),
        };
        EventEnvelope {
            event_type: self.event_type(),
            timestamp: self.timestamp(),
            payload,
        }
    }
}

/// Snapshot carried by an [`EventEnvelope`].
///
/// Serialized untagged; the `type` field of the envelope tells clients which
/// variant to expect. `Pomodoro` has the most required fields and must stay
/// first for untagged deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopePayload {
    Pomodoro(Pomodoro),
    Task(Task),
}

/// `{type, timestamp, payload}` envelope broadcast to WebSocket clients.
///
/// # Example
///
/// ```
/// use pomodoro_server::types::{Event, EventType, Task, TaskEventKind};
/// use chrono::Utc;
///
/// let task = Task {
///     id: "t1".to_string(),
///     title: "write docs".to_string(),
///     created_at: Utc::now(),
///     completed: false,
/// };
/// let envelope = Event::task(TaskEventKind::Created, task).to_envelope();
/// assert_eq!(envelope.event_type, EventType::TaskCreated);
///
/// let json = serde_json::to_value(&envelope).unwrap();
/// assert_eq!(json["type"], "task.created");
/// assert_eq!(json["payload"]["title"], "write docs");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: EnvelopePayload,
}
