//! GraphQL schema: queries, mutations and the live event stream.
//!
//! Resolvers call the same engine and registry methods as the HTTP routes.
//! Domain errors carry their machine-readable kind in the `code` extension.

use async_graphql::{
    Context, Enum, ErrorExtensions, Object, Result as GqlResult, Schema, SimpleObject,
    Subscription, ID,
};
use futures_util::stream::{self, Stream, StreamExt};
use tracing::debug;

use crate::broadcast::SubscriberFilter;
use crate::bus::ChannelSubscription;
use crate::config::PhaseDurations;
use crate::error::PomodoroError;
use crate::routes::AppState;
use crate::types::{Event, EventCategory, EventType, Phase, Pomodoro, PomodoroState, Task};

pub type PomodoroSchema = Schema<QueryRoot, MutationRoot, SubscriptionRoot>;

/// Builds the schema with `state` as resolver data.
#[must_use]
pub fn build_schema(state: AppState) -> PomodoroSchema {
    Schema::build(QueryRoot, MutationRoot, SubscriptionRoot)
        .data(state)
        .finish()
}

fn gql_error(err: PomodoroError) -> async_graphql::Error {
    let code = err.code();
    async_graphql::Error::new(err.to_string()).extend_with(|_, e| e.set("code", code))
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(name = "PomodoroState")]
pub enum GqlPomodoroState {
    Active,
    Paused,
    Finished,
}

impl From<PomodoroState> for GqlPomodoroState {
    fn from(state: PomodoroState) -> Self {
        match state {
            PomodoroState::Active => Self::Active,
            PomodoroState::Paused => Self::Paused,
            PomodoroState::Finished => Self::Finished,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(name = "Phase")]
pub enum GqlPhase {
    Work,
    ShortBreak,
    LongBreak,
}

impl From<Phase> for GqlPhase {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Work => Self::Work,
            Phase::ShortBreak => Self::ShortBreak,
            Phase::LongBreak => Self::LongBreak,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq)]
#[graphql(name = "EventCategory")]
pub enum GqlEventCategory {
    Pomodoro,
    Task,
}

impl From<GqlEventCategory> for EventCategory {
    fn from(category: GqlEventCategory) -> Self {
        match category {
            GqlEventCategory::Pomodoro => Self::Pomodoro,
            GqlEventCategory::Task => Self::Task,
        }
    }
}

impl From<EventCategory> for GqlEventCategory {
    fn from(category: EventCategory) -> Self {
        match category {
            EventCategory::Pomodoro => Self::Pomodoro,
            EventCategory::Task => Self::Task,
        }
    }
}

#[derive(SimpleObject, Clone)]
#[graphql(name = "Pomodoro")]
pub struct GqlPomodoro {
    pub id: ID,
    pub state: GqlPomodoroState,
    pub phase: GqlPhase,
    pub phase_count: u32,
    pub start_time: String,
    pub work_duration_secs: u64,
    pub break_duration_secs: u64,
    pub long_break_duration_secs: u64,
    pub remaining_secs: u64,
    pub elapsed_secs: u64,
    pub task_id: Option<ID>,
}

impl From<Pomodoro> for GqlPomodoro {
    fn from(p: Pomodoro) -> Self {
        Self {
            id: ID(p.id),
            state: p.state.into(),
            phase: p.phase.into(),
            phase_count: p.phase_count,
            start_time: p.start_time.to_rfc3339(),
            work_duration_secs: p.work_duration_secs,
            break_duration_secs: p.break_duration_secs,
            long_break_duration_secs: p.long_break_duration_secs,
            remaining_secs: p.remaining_secs,
            elapsed_secs: p.elapsed_secs,
            task_id: p.task_id.map(ID),
        }
    }
}

#[derive(SimpleObject, Clone)]
#[graphql(name = "Task")]
pub struct GqlTask {
    pub id: ID,
    pub title: String,
    pub created_at: String,
    pub completed: bool,
}

impl From<Task> for GqlTask {
    fn from(t: Task) -> Self {
        Self {
            id: ID(t.id),
            title: t.title,
            created_at: t.created_at.to_rfc3339(),
            completed: t.completed,
        }
    }
}

/// One bus event. Exactly one of `pomodoro` and `task` is set.
#[derive(SimpleObject, Clone)]
#[graphql(name = "Event")]
pub struct GqlEvent {
    pub event_type: String,
    pub category: GqlEventCategory,
    pub timestamp: String,
    pub pomodoro: Option<GqlPomodoro>,
    pub task: Option<GqlTask>,
}

impl From<Event> for GqlEvent {
    fn from(event: Event) -> Self {
        let event_type = event.event_type().as_str().to_string();
        let category = event.category().into();
        let timestamp = event.timestamp().to_rfc3339();
        let (pomodoro, task) = match event {
            Event::Pomodoro(e) => (Some(e.pomodoro.into()), None),
            Event::Task(e) => (None, Some(e.task.into())),
        };
        Self {
            event_type,
            category,
            timestamp,
            pomodoro,
            task,
        }
    }
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Latest session in any state.
    async fn current_pomodoro(&self, ctx: &Context<'_>) -> GqlResult<Option<GqlPomodoro>> {
        let state = ctx.data::<AppState>()?;
        let current = state.engine.current().await.map_err(gql_error)?;
        Ok(current.map(Into::into))
    }

    async fn tasks(&self, ctx: &Context<'_>) -> GqlResult<Vec<GqlTask>> {
        let state = ctx.data::<AppState>()?;
        let tasks = state.tasks.get_all_tasks().await.map_err(gql_error)?;
        Ok(tasks.into_iter().map(Into::into).collect())
    }

    async fn task(&self, ctx: &Context<'_>, id: ID) -> GqlResult<GqlTask> {
        let state = ctx.data::<AppState>()?;
        let task = state.tasks.get_task(&id).await.map_err(gql_error)?;
        Ok(task.into())
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Starts a session. Omitted durations use the server defaults.
    async fn start_pomodoro(
        &self,
        ctx: &Context<'_>,
        work_secs: Option<u64>,
        break_secs: Option<u64>,
        long_break_secs: Option<u64>,
        task_id: Option<ID>,
    ) -> GqlResult<GqlPomodoro> {
        let state = ctx.data::<AppState>()?;
        let defaults = state.config.durations;
        let durations = PhaseDurations {
            work_secs: work_secs.unwrap_or(defaults.work_secs),
            break_secs: break_secs.unwrap_or(defaults.break_secs),
            long_break_secs: long_break_secs.unwrap_or(defaults.long_break_secs),
        };
        let started = state
            .engine
            .start(durations, task_id.map(|id| id.0))
            .await
            .map_err(gql_error)?;
        Ok(started.into())
    }

    async fn pause_pomodoro(&self, ctx: &Context<'_>, id: ID) -> GqlResult<GqlPomodoro> {
        let state = ctx.data::<AppState>()?;
        Ok(state.engine.pause(&id).await.map_err(gql_error)?.into())
    }

    async fn resume_pomodoro(&self, ctx: &Context<'_>, id: ID) -> GqlResult<GqlPomodoro> {
        let state = ctx.data::<AppState>()?;
        Ok(state.engine.resume(&id).await.map_err(gql_error)?.into())
    }

    async fn stop_pomodoro(&self, ctx: &Context<'_>, id: ID) -> GqlResult<GqlPomodoro> {
        let state = ctx.data::<AppState>()?;
        Ok(state.engine.stop(&id).await.map_err(gql_error)?.into())
    }

    async fn create_task(&self, ctx: &Context<'_>, title: String) -> GqlResult<GqlTask> {
        let state = ctx.data::<AppState>()?;
        Ok(state.tasks.create_task(&title).await.map_err(gql_error)?.into())
    }

    async fn update_task(
        &self,
        ctx: &Context<'_>,
        id: ID,
        title: String,
        completed: bool,
    ) -> GqlResult<GqlTask> {
        let state = ctx.data::<AppState>()?;
        let updated = state
            .tasks
            .update_task(&id, &title, completed)
            .await
            .map_err(gql_error)?;
        Ok(updated.into())
    }

    /// Deletes a task and returns it.
    async fn delete_task(&self, ctx: &Context<'_>, id: ID) -> GqlResult<GqlTask> {
        let state = ctx.data::<AppState>()?;
        Ok(state.tasks.delete_task(&id).await.map_err(gql_error)?.into())
    }
}

pub struct SubscriptionRoot;

#[Subscription]
impl SubscriptionRoot {
    /// Live bus events. `types` (event type tags such as `pomodoro.tick`)
    /// wins over `category`; with neither, every event is streamed.
    async fn events(
        &self,
        ctx: &Context<'_>,
        category: Option<GqlEventCategory>,
        types: Option<Vec<String>>,
    ) -> impl Stream<Item = GqlResult<GqlEvent>> {
        let subscription = match open_subscription(ctx, category, types) {
            Ok(subscription) => subscription,
            Err(err) => return stream::once(async move { Err(err) }).right_stream(),
        };

        // The subscription travels with the stream; dropping the stream on
        // disconnect unsubscribes.
        stream::unfold(subscription, |mut subscription| async move {
            let event = subscription.recv().await?;
            Some((Ok(GqlEvent::from(event)), subscription))
        })
        .left_stream()
    }
}

fn open_subscription(
    ctx: &Context<'_>,
    category: Option<GqlEventCategory>,
    types: Option<Vec<String>>,
) -> GqlResult<ChannelSubscription> {
    let state = ctx.data::<AppState>()?;

    let mut filter = SubscriberFilter::new();
    if let Some(category) = category {
        filter = filter.with_category(category.into());
    }
    if let Some(types) = types {
        let parsed = types
            .iter()
            .map(|t| t.parse::<EventType>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|msg| gql_error(PomodoroError::validation(msg)))?;
        filter = filter.with_types(parsed);
    }

    debug!(filter = ?filter, "GraphQL event subscription opened");
    Ok(state.bus.subscribe_channel(&filter.event_types()))
}
