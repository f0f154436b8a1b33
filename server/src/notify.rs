//! Completion notifications.
//!
//! Hooks run on the bus when a phase completes. Each hook is invoked on its
//! own delivery task; a failing hook is logged and never retried.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, SubscriptionId};
use crate::types::{Event, EventType, Pomodoro};

/// Webhook request timeout.
const WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Errors raised by completion hooks.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// Request could not be sent.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status.
    #[error("webhook returned {status}")]
    Status { status: u16 },
}

/// Callback run after a session phase completes.
pub trait CompletionHook: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn on_completed<'a>(&'a self, session: &'a Pomodoro) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Logs a one-line summary of every completed phase.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHook;

impl CompletionHook for LogHook {
    fn name(&self) -> &'static str {
        "log"
    }

    fn on_completed<'a>(&'a self, session: &'a Pomodoro) -> BoxFuture<'a, Result<(), NotifyError>> {
        async move {
            info!(
                session_id = %session.id,
                phase = %session.phase,
                phase_count = session.phase_count,
                elapsed_secs = session.elapsed_secs,
                task_id = session.task_id.as_deref().unwrap_or("-"),
                "Phase complete"
            );
            Ok(())
        }
        .boxed()
    }
}

/// POSTs the completed session as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookHook {
    url: String,
    client: Client,
}

impl WebhookHook {
    /// Creates a webhook hook for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Http`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl CompletionHook for WebhookHook {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn on_completed<'a>(&'a self, session: &'a Pomodoro) -> BoxFuture<'a, Result<(), NotifyError>> {
        async move {
            let response = self.client.post(&self.url).json(session).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(NotifyError::Status {
                    status: status.as_u16(),
                });
            }
            debug!(session_id = %session.id, url = %self.url, "Webhook delivered");
            Ok(())
        }
        .boxed()
    }
}

/// Subscribes each hook to completion events.
pub fn register_hooks(bus: &EventBus, hooks: Vec<Arc<dyn CompletionHook>>) -> Vec<SubscriptionId> {
    hooks
        .into_iter()
        .map(|hook| {
            debug!(hook = hook.name(), "Registering completion hook");
            bus.subscribe_async(EventType::PomodoroCompleted, move |event| {
                let hook = Arc::clone(&hook);
                async move {
                    let Event::Pomodoro(event) = event else {
                        return;
                    };
                    if let Err(err) = hook.on_completed(&event.pomodoro).await {
                        warn!(
                            hook = hook.name(),
                            session_id = %event.pomodoro.id,
                            error = %err,
                            "Completion hook failed"
                        );
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Phase, PomodoroEventKind, PomodoroState};
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn completed_session() -> Pomodoro {
        Pomodoro {
            id: "p1".to_string(),
            state: PomodoroState::Finished,
            phase: Phase::Work,
            phase_count: 3,
            start_time: Utc::now(),
            work_duration_secs: 1500,
            break_duration_secs: 300,
            long_break_duration_secs: 900,
            remaining_secs: 0,
            elapsed_secs: 1500,
            task_id: Some("t1".to_string()),
        }
    }

    #[tokio::test]
    async fn webhook_posts_session_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({
                "id": "p1",
                "state": "finished",
                "phaseCount": 3,
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let hook = WebhookHook::new(format!("{}/hook", server.uri())).unwrap();
        hook.on_completed(&completed_session()).await.unwrap();
    }

    #[tokio::test]
    async fn webhook_reports_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let hook = WebhookHook::new(server.uri()).unwrap();
        let err = hook.on_completed(&completed_session()).await.unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 500 }));
    }

    #[tokio::test]
    async fn log_hook_never_fails() {
        LogHook.on_completed(&completed_session()).await.unwrap();
    }

    #[tokio::test]
    async fn registered_hooks_fire_on_completion_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let bus = EventBus::new();
        let hooks: Vec<Arc<dyn CompletionHook>> = vec![
            Arc::new(LogHook),
            Arc::new(WebhookHook::new(server.uri()).unwrap()),
        ];
        let ids = register_hooks(&bus, hooks);
        assert_eq!(ids.len(), 2);

        bus.publish(Event::pomodoro(PomodoroEventKind::Tick, completed_session()));
        bus.publish(Event::pomodoro(
            PomodoroEventKind::Completed,
            completed_session(),
        ));
        bus.shutdown().await;

        server.verify().await;
    }
}
