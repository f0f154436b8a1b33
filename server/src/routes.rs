//! HTTP route handlers for the Pomodoro server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /pomodoro/start` - Start a session
//! - `GET /pomodoro/current` - Latest session
//! - `POST /pomodoro/{id}/pause|resume|stop` - Session commands
//! - `DELETE /pomodoro/{id}` - Remove a session record
//! - `GET|POST /tasks`, `GET|PUT|DELETE /tasks/{id}` - Task CRUD
//! - `GET /ws` - WebSocket event stream
//! - `GET /health` - Health check endpoint
//! - `GET|POST /graphql`, `GET /graphql/ws` - GraphQL endpoint and subscriptions
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration (default phase durations)
//! - The pomodoro engine and the task registry
//! - The event bus and the WebSocket broadcaster attached to it
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pomodoro_server::routes::{create_router, AppState};
//! use pomodoro_server::config::Config;
//! use pomodoro_server::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::new(config, Arc::new(MemoryStore::new()));
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:7070").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQL, GraphQLSubscription};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace, warn};

use crate::broadcast::{EventBroadcaster, SubscriberFilter};
use crate::bus::EventBus;
use crate::config::{Config, PhaseDurations};
use crate::engine::{EngineConfig, PomodoroEngine};
use crate::error::PomodoroError;
use crate::graphql::build_schema;
use crate::store::SharedStore;
use crate::tasks::TaskRegistry;
use crate::types::{EventCategory, EventType};

// ============================================================================
// Constants
// ============================================================================

/// Maximum request body size (64 KB).
const MAX_BODY_SIZE: usize = 64 * 1024;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
///
/// Every field is cheap to clone; clones share the same engine, registry,
/// bus and broadcaster.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Session state machine.
    pub engine: Arc<PomodoroEngine>,

    /// Task CRUD.
    pub tasks: TaskRegistry,

    /// In-process event bus shared by engine, registry and transports.
    pub bus: EventBus,

    /// Fan-out of bus events to WebSocket clients.
    pub broadcaster: EventBroadcaster,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state over `store` with a fresh bus and the
    /// default one-second tick.
    #[must_use]
    pub fn new(config: Config, store: SharedStore) -> Self {
        Self::with_components(config, store, EventBus::new(), EngineConfig::default())
    }

    /// Creates application state with a caller-supplied bus and engine settings.
    ///
    /// Useful for testing with a short tick interval.
    #[must_use]
    pub fn with_components(
        config: Config,
        store: SharedStore,
        bus: EventBus,
        engine_config: EngineConfig,
    ) -> Self {
        let engine = PomodoroEngine::new(Arc::clone(&store), bus.clone(), engine_config);
        let tasks = TaskRegistry::new(store, bus.clone());
        let broadcaster = EventBroadcaster::new();
        broadcaster.attach(&bus);

        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            tasks,
            bus,
            broadcaster,
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"<Config>")
            .field("engine", &self.engine)
            .field("bus", &self.bus)
            .field("broadcaster", &self.broadcaster)
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// Panics inside a handler are turned into a 500 response by
/// [`CatchPanicLayer`]; the server keeps running.
pub fn create_router(state: AppState) -> Router {
    with_service_layers(routes(state))
}

fn routes(state: AppState) -> Router {
    let schema = build_schema(state.clone());

    Router::new()
        .route("/pomodoro/start", post(start_pomodoro))
        .route("/pomodoro/current", get(current_pomodoro))
        .route("/pomodoro/{id}", delete(delete_pomodoro))
        .route("/pomodoro/{id}/pause", post(pause_pomodoro))
        .route("/pomodoro/{id}/resume", post(resume_pomodoro))
        .route("/pomodoro/{id}/stop", post(stop_pomodoro))
        .route("/tasks", get(list_tasks).post(create_task))
        .route(
            "/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .route("/ws", get(get_ws))
        .route("/health", get(get_health))
        .route(
            "/graphql",
            get(graphiql).post_service(GraphQL::new(schema.clone())),
        )
        .route_service("/graphql/ws", GraphQLSubscription::new(schema))
        .with_state(state)
}

fn with_service_layers(router: Router) -> Router {
    router
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
}

// ============================================================================
// Error Response Types
// ============================================================================

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
        }
    }
}

impl IntoResponse for PomodoroError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) | Self::Mismatch { .. } => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Lock(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Io(_) | Self::CorruptState(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            error!(error = %self, code = self.code(), "Request failed");
        } else {
            debug!(error = %self, code = self.code(), "Request rejected");
        }

        (status, Json(ErrorResponse::new(self.to_string(), self.code()))).into_response()
    }
}

/// Parses a JSON body. An empty body yields `T::default()`.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        debug!(error = %err, "Invalid JSON body");
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(
                format!("invalid request body: {err}"),
                "invalid_body",
            )),
        )
            .into_response()
    })
}

// ============================================================================
// Pomodoro routes
// ============================================================================

/// Body of `POST /pomodoro/start`. Omitted durations use the server defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub work_secs: Option<u64>,
    pub break_secs: Option<u64>,
    pub long_break_secs: Option<u64>,
    pub task_id: Option<String>,
}

impl StartRequest {
    fn durations(&self, defaults: PhaseDurations) -> PhaseDurations {
        PhaseDurations {
            work_secs: self.work_secs.unwrap_or(defaults.work_secs),
            break_secs: self.break_secs.unwrap_or(defaults.break_secs),
            long_break_secs: self.long_break_secs.unwrap_or(defaults.long_break_secs),
        }
    }
}

/// POST /pomodoro/start
///
/// # Responses
///
/// - `201 Created` - The new session
/// - `400 Bad Request` - A duration is zero or the body is malformed
/// - `409 Conflict` - A session is already active or paused
async fn start_pomodoro(State(state): State<AppState>, body: Bytes) -> Response {
    let request: StartRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let durations = request.durations(state.config.durations);
    match state.engine.start(durations, request.task_id).await {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// GET /pomodoro/current - 404 when no session has ever been started.
async fn current_pomodoro(State(state): State<AppState>) -> Response {
    match state.engine.current().await {
        Ok(Some(session)) => Json(session).into_response(),
        Ok(None) => PomodoroError::not_found("no pomodoro session").into_response(),
        Err(err) => err.into_response(),
    }
}

async fn pause_pomodoro(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.pause(&id).await {
        Ok(session) => Json(session).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn resume_pomodoro(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.resume(&id).await {
        Ok(session) => Json(session).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn stop_pomodoro(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.stop(&id).await {
        Ok(session) => Json(session).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn delete_pomodoro(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.engine.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

// ============================================================================
// Task routes
// ============================================================================

/// Body of `POST /tasks`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub title: String,
}

/// Body of `PUT /tasks/{id}`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub completed: bool,
}

async fn list_tasks(State(state): State<AppState>) -> Response {
    match state.tasks.get_all_tasks().await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn create_task(State(state): State<AppState>, body: Bytes) -> Response {
    let request: CreateTaskRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state.tasks.create_task(&request.title).await {
        Ok(task) => (StatusCode::CREATED, Json(task)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.tasks.get_task(&id).await {
        Ok(task) => Json(task).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let request: UpdateTaskRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match state
        .tasks
        .update_task(&id, &request.title, request.completed)
        .await
    {
        Ok(task) => Json(task).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn delete_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.tasks.delete_task(&id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

// ============================================================================
// GET /ws - WebSocket Subscription
// ============================================================================

/// Query parameters for WebSocket subscription.
#[derive(Debug, Default, Deserialize)]
pub struct WsQueryParams {
    /// Only events of this category (`pomodoro` or `task`).
    pub category: Option<EventCategory>,

    /// Comma-separated event types, e.g. `pomodoro.tick,task.created`.
    pub types: Option<String>,
}

impl WsQueryParams {
    /// Builds a `SubscriberFilter` from the query parameters.
    ///
    /// Returns the offending name if a listed event type is unknown.
    fn to_filter(&self) -> Result<SubscriberFilter, String> {
        let mut filter = SubscriberFilter::new();

        if let Some(category) = self.category {
            filter = filter.with_category(category);
        }

        if let Some(ref types) = self.types {
            let parsed = types
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::parse::<EventType>)
                .collect::<Result<Vec<_>, _>>()?;
            filter = filter.with_types(parsed);
        }

        Ok(filter)
    }
}

/// GET /ws - WebSocket subscription endpoint.
///
/// # Query Parameters
///
/// - `category` - `pomodoro` or `task`
/// - `types` - comma-separated event types; takes precedence over `category`
///
/// # WebSocket Protocol
///
/// Once connected, the server sends `{type, timestamp, payload}` envelopes as
/// JSON text messages. Messages from the client are ignored.
///
/// # Responses
///
/// - `101 Switching Protocols` - WebSocket upgrade successful
/// - `400 Bad Request` - Unknown event type in `types`
async fn get_ws(
    State(state): State<AppState>,
    Query(params): Query<WsQueryParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let filter = match params.to_filter() {
        Ok(filter) => filter,
        Err(message) => {
            debug!(error = %message, "Rejected WebSocket filter");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(message, "invalid_filter")),
            )
                .into_response();
        }
    };

    info!(filter = ?filter, "WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_websocket(socket, state.broadcaster, filter))
}

/// Handles an established WebSocket connection.
///
/// Subscribes to the broadcaster and forwards matching envelopes until the
/// client disconnects.
async fn handle_websocket(
    socket: axum::extract::ws::WebSocket,
    broadcaster: EventBroadcaster,
    filter: SubscriberFilter,
) {
    use axum::extract::ws::Message;
    use futures_util::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut envelope_rx = broadcaster.subscribe();

    info!("WebSocket client connected");

    let forward_task = tokio::spawn(async move {
        loop {
            match envelope_rx.recv().await {
                Ok(envelope) => {
                    if !filter.matches(&envelope) {
                        continue;
                    }

                    match serde_json::to_string(&envelope) {
                        Ok(json) => {
                            trace!(event_type = %envelope.event_type, "Sending envelope to WebSocket client");
                            if let Err(err) = sender.send(Message::Text(json.into())).await {
                                debug!(error = %err, "Failed to send envelope to WebSocket client");
                                break;
                            }
                        }
                        Err(err) => {
                            error!(error = %err, "Failed to serialize envelope");
                        }
                    }
                }
                Err(RecvError::Lagged(count)) => {
                    warn!(skipped = count, "WebSocket client lagged, skipped events");
                }
                Err(RecvError::Closed) => {
                    debug!("Event broadcaster closed");
                    break;
                }
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client sent close frame");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "WebSocket error");
                break;
            }
        }
    }

    forward_task.abort();
    info!("WebSocket client disconnected");
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Number of active WebSocket connections.
    pub connections: usize,

    /// Whether a session ticker is running.
    pub ticking: bool,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health
///
/// ```json
/// { "status": "ok", "connections": 2, "ticking": true, "uptime_seconds": 3600 }
/// ```
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connections: state.broadcaster.subscriber_count(),
        ticking: state.engine.is_ticking(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

async fn graphiql() -> Html<String> {
    Html(
        GraphiQLSource::build()
            .endpoint("/graphql")
            .subscription_endpoint("/graphql/ws")
            .finish(),
    )
}

// ============================================================================
// Tests
// ============================================================================
