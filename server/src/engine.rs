//! Pomodoro session state machine.
//!
//! The engine owns the only ticking task. Commands (`start`, `pause`,
//! `resume`, `stop`, `delete`) and each tick's persist run under one
//! transition mutex, so events for a session are published in the order its
//! state changes.
//!
//! # Ticker lifecycle
//!
//! A ticker is a spawned loop paired with a [`CancellationToken`]. Stopping
//! it cancels the token and awaits the join handle, so once
//! `stop_ticker` returns no tick can persist or publish. The loop waits on
//! the token at every suspension point, including acquisition of the
//! transition mutex, which lets a command holding that mutex join the loop
//! without deadlocking. Each loop also carries the epoch it was spawned in
//! and exits without persisting if the engine has moved on.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::config::PhaseDurations;
use crate::error::{PomodoroError, Result};
use crate::store::{run_blocking, SharedStore};
use crate::types::{Event, Phase, Pomodoro, PomodoroEventKind, PomodoroState};

/// Wall-clock time between ticks in production.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Real time between ticks. Every tick counts as one second of session
    /// time regardless of this value.
    pub tick_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

#[derive(Debug)]
struct Ticker {
    session_id: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the session state machine and its ticking task.
///
/// Cloning is cheap and every clone drives the same session. Each transition
/// runs to completion on its own task, so a caller that stops waiting (a
/// client disconnect, a timeout) never leaves a half-applied transition
/// behind.
#[derive(Debug, Clone)]
pub struct PomodoroEngine {
    core: Arc<EngineCore>,
}

impl PomodoroEngine {
    #[must_use]
    pub fn new(store: SharedStore, bus: EventBus, config: EngineConfig) -> Self {
        Self {
            core: Arc::new(EngineCore::new(store, bus, config)),
        }
    }

    /// Starts a new session.
    ///
    /// The phase follows the most recent record (see [`Phase::following`]).
    ///
    /// # Errors
    ///
    /// - [`PomodoroError::Validation`] if any duration is zero
    /// - [`PomodoroError::Conflict`] if a session is already active or paused
    /// - store errors from loading or saving the record
    pub async fn start(
        &self,
        durations: PhaseDurations,
        task_id: Option<String>,
    ) -> Result<Pomodoro> {
        self.detached(move |core| async move { core.start(durations, task_id).await })
            .await
    }

    /// Pauses the active session `id`.
    ///
    /// The ticker is fully stopped before the paused state is persisted. If
    /// that persist fails the ticker is restarted and the error returned.
    ///
    /// # Errors
    ///
    /// [`PomodoroError::NotFound`] unless `id` is the active session.
    pub async fn pause(&self, id: &str) -> Result<Pomodoro> {
        let id = id.to_string();
        self.detached(move |core| async move { core.pause(&id).await })
            .await
    }

    /// Resumes the paused session `id` from its stored remaining time.
    ///
    /// # Errors
    ///
    /// [`PomodoroError::NotFound`] unless `id` is the paused session.
    pub async fn resume(&self, id: &str) -> Result<Pomodoro> {
        let id = id.to_string();
        self.detached(move |core| async move { core.resume(&id).await })
            .await
    }

    /// Stops the active or paused session `id`, keeping its remaining time.
    ///
    /// # Errors
    ///
    /// [`PomodoroError::NotFound`] unless `id` is the active or paused session.
    pub async fn stop(&self, id: &str) -> Result<Pomodoro> {
        let id = id.to_string();
        self.detached(move |core| async move { core.stop(&id).await })
            .await
    }

    /// Removes the record `id` without publishing an event. Unknown ids are a
    /// no-op.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.detached(move |core| async move { core.delete(&id).await })
            .await
    }

    /// Latest session record in any state.
    pub async fn current(&self) -> Result<Option<Pomodoro>> {
        self.core.current().await
    }

    /// Remaining seconds of the latest session.
    ///
    /// # Errors
    ///
    /// [`PomodoroError::NotFound`] when no session exists.
    pub async fn remaining_secs(&self) -> Result<u64> {
        self.core.remaining_secs().await
    }

    /// Deletes an active or paused record left behind by a previous process.
    ///
    /// Returns the id of the removed record, if any.
    pub async fn cleanup_stale(&self) -> Result<Option<String>> {
        self.detached(|core| async move { core.cleanup_stale().await })
            .await
    }

    /// Returns `true` while a tick loop is alive.
    #[must_use]
    pub fn is_ticking(&self) -> bool {
        self.core.is_ticking()
    }

    /// Stops the ticker. The persisted record is left as it is.
    pub async fn shutdown(&self) {
        let core = Arc::clone(&self.core);
        if let Err(err) = tokio::spawn(async move { core.shutdown().await }).await {
            error!(error = %err, "Engine shutdown task failed");
        }
    }

    /// Runs `op` on its own task and waits for it.
    async fn detached<T, F, Fut>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<EngineCore>) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        tokio::spawn(op(Arc::clone(&self.core))).await?
    }
}

/// Shared engine state. Transitions run on spawned tasks that own a
/// handle to it.
#[derive(Debug)]
struct EngineCore {
    store: SharedStore,
    bus: EventBus,
    tick_interval: Duration,
    transition: Arc<AsyncMutex<()>>,
    ticker: Mutex<Option<Ticker>>,
    epoch: Arc<AtomicU64>,
}

impl EngineCore {
    fn new(store: SharedStore, bus: EventBus, config: EngineConfig) -> Self {
        Self {
            store,
            bus,
            tick_interval: config.tick_interval,
            transition: Arc::new(AsyncMutex::new(())),
            ticker: Mutex::new(None),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    async fn start(
        &self,
        durations: PhaseDurations,
        task_id: Option<String>,
    ) -> Result<Pomodoro> {
        validate_durations(&durations)?;

        let _transition = self.transition.lock().await;
        let latest = run_blocking(&self.store, |s| s.get_latest_pomodoro()).await?;
        if let Some(running) = latest.as_ref().filter(|p| p.is_running()) {
            return Err(PomodoroError::conflict(format!(
                "pomodoro {} is already {}",
                running.id,
                state_label(running.state)
            )));
        }

        let (phase, phase_count) = Phase::following(latest.map(|p| (p.phase, p.phase_count)));
        let mut pomodoro = Pomodoro {
            id: Uuid::new_v4().to_string(),
            state: PomodoroState::Active,
            phase,
            phase_count,
            start_time: Utc::now(),
            work_duration_secs: durations.work_secs,
            break_duration_secs: durations.break_secs,
            long_break_duration_secs: durations.long_break_secs,
            remaining_secs: 0,
            elapsed_secs: 0,
            task_id,
        };
        pomodoro.remaining_secs = pomodoro.phase_duration_secs();

        // A completed loop may still occupy the slot.
        self.stop_ticker().await;

        let record = pomodoro.clone();
        run_blocking(&self.store, move |s| s.save_pomodoro(&record)).await?;

        info!(
            session_id = %pomodoro.id,
            phase = %pomodoro.phase,
            phase_count = pomodoro.phase_count,
            remaining_secs = pomodoro.remaining_secs,
            "Pomodoro started"
        );
        self.bus
            .publish(Event::pomodoro(PomodoroEventKind::Started, pomodoro.clone()));
        self.spawn_ticker(&pomodoro);

        Ok(pomodoro)
    }

    async fn pause(&self, id: &str) -> Result<Pomodoro> {
        let _transition = self.transition.lock().await;
        let current = self.expect_session(id, &[PomodoroState::Active]).await?;

        self.stop_ticker().await;

        let (remaining, elapsed) = (current.remaining_secs, current.elapsed_secs);
        let paused = match self
            .persist_state(id, PomodoroState::Paused, remaining, elapsed)
            .await
        {
            Ok(paused) => paused,
            Err(err) => {
                warn!(session_id = %id, error = %err, "Pause not persisted, ticker restarted");
                self.spawn_ticker(&current);
                return Err(err);
            }
        };

        info!(session_id = %id, remaining_secs = remaining, "Pomodoro paused");
        self.bus
            .publish(Event::pomodoro(PomodoroEventKind::Paused, paused.clone()));
        Ok(paused)
    }

    async fn resume(&self, id: &str) -> Result<Pomodoro> {
        let _transition = self.transition.lock().await;
        let current = self.expect_session(id, &[PomodoroState::Paused]).await?;

        self.stop_ticker().await;

        let resumed = self
            .persist_state(
                id,
                PomodoroState::Active,
                current.remaining_secs,
                current.elapsed_secs,
            )
            .await?;

        info!(session_id = %id, remaining_secs = resumed.remaining_secs, "Pomodoro resumed");
        self.bus
            .publish(Event::pomodoro(PomodoroEventKind::Resumed, resumed.clone()));
        self.spawn_ticker(&resumed);
        Ok(resumed)
    }

    async fn stop(&self, id: &str) -> Result<Pomodoro> {
        let _transition = self.transition.lock().await;
        let current = self
            .expect_session(id, &[PomodoroState::Active, PomodoroState::Paused])
            .await?;

        self.stop_ticker().await;

        let stopped = self
            .persist_state(
                id,
                PomodoroState::Finished,
                current.remaining_secs,
                current.elapsed_secs,
            )
            .await?;

        info!(
            session_id = %id,
            elapsed_secs = stopped.elapsed_secs,
            remaining_secs = stopped.remaining_secs,
            "Pomodoro stopped"
        );
        self.bus
            .publish(Event::pomodoro(PomodoroEventKind::Stopped, stopped.clone()));
        Ok(stopped)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let _transition = self.transition.lock().await;
        if self.ticking_session().as_deref() == Some(id) {
            self.stop_ticker().await;
        }

        let target = id.to_string();
        run_blocking(&self.store, move |s| s.delete_pomodoro(&target)).await?;
        debug!(session_id = %id, "Pomodoro record deleted");
        Ok(())
    }

    async fn current(&self) -> Result<Option<Pomodoro>> {
        run_blocking(&self.store, |s| s.get_latest_pomodoro()).await
    }

    async fn remaining_secs(&self) -> Result<u64> {
        self.current()
            .await?
            .map(|p| p.remaining_secs)
            .ok_or_else(|| PomodoroError::not_found("no pomodoro"))
    }

    async fn cleanup_stale(&self) -> Result<Option<String>> {
        let _transition = self.transition.lock().await;
        let Some(stale) = run_blocking(&self.store, |s| s.get_active_pomodoro()).await? else {
            return Ok(None);
        };
        if self.ticking_session().as_deref() == Some(stale.id.as_str()) {
            // Ours, not stale.
            return Ok(None);
        }

        let id = stale.id.clone();
        run_blocking(&self.store, move |s| s.delete_pomodoro(&id)).await?;
        warn!(
            session_id = %stale.id,
            state = state_label(stale.state),
            "Removed stale pomodoro from a previous run"
        );
        Ok(Some(stale.id))
    }

    fn is_ticking(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|ticker| !ticker.handle.is_finished())
    }

    async fn shutdown(&self) {
        let _transition = self.transition.lock().await;
        self.stop_ticker().await;
        debug!("Pomodoro engine shut down");
    }

    /// Loads the latest record and checks it is `id` in one of `states`.
    async fn expect_session(&self, id: &str, states: &[PomodoroState]) -> Result<Pomodoro> {
        let latest = run_blocking(&self.store, |s| s.get_latest_pomodoro()).await?;
        match latest {
            Some(p) if p.id == id && states.contains(&p.state) => Ok(p),
            Some(p) if p.id == id => Err(PomodoroError::not_found(format!(
                "pomodoro {id} is {}",
                state_label(p.state)
            ))),
            _ => Err(PomodoroError::not_found(format!("no pomodoro with id {id}"))),
        }
    }

    async fn persist_state(
        &self,
        id: &str,
        state: PomodoroState,
        remaining_secs: u64,
        elapsed_secs: u64,
    ) -> Result<Pomodoro> {
        let target = id.to_string();
        run_blocking(&self.store, move |s| {
            s.update_pomodoro_state(&target, state, remaining_secs, elapsed_secs)
        })
        .await
        .map_err(|err| match err {
            PomodoroError::Mismatch { .. } => {
                PomodoroError::not_found(format!("no pomodoro with id {id}"))
            }
            other => other,
        })
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Ticker>> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ticking_session(&self) -> Option<String> {
        self.slot().as_ref().map(|t| t.session_id.clone())
    }

    /// Spawns a tick loop for `pomodoro`. The slot must be empty.
    fn spawn_ticker(&self, pomodoro: &Pomodoro) {
        let token = CancellationToken::new();
        let tick_loop = TickLoop {
            store: Arc::clone(&self.store),
            bus: self.bus.clone(),
            transition: Arc::clone(&self.transition),
            engine_epoch: Arc::clone(&self.epoch),
            epoch: self.epoch.load(Ordering::SeqCst),
            token: token.clone(),
            period: self.tick_interval,
            session_id: pomodoro.id.clone(),
            remaining_secs: pomodoro.remaining_secs,
            elapsed_secs: pomodoro.elapsed_secs,
        };

        let handle = tokio::spawn(tick_loop.run());
        let previous = self.slot().replace(Ticker {
            session_id: pomodoro.id.clone(),
            token,
            handle,
        });
        if let Some(previous) = previous {
            // Callers stop the old ticker first; cancel it anyway so two
            // loops can never run for long.
            error!(session_id = %previous.session_id, "Ticker replaced while still registered");
            previous.token.cancel();
        }
    }

    /// Cancels the current ticker and waits for its loop to exit.
    async fn stop_ticker(&self) {
        let Some(ticker) = self.slot().take() else {
            return;
        };

        self.epoch.fetch_add(1, Ordering::SeqCst);
        ticker.token.cancel();
        if let Err(err) = ticker.handle.await {
            error!(session_id = %ticker.session_id, error = %err, "Tick loop ended abnormally");
        }
        debug!(session_id = %ticker.session_id, "Ticker stopped");
    }
}

fn validate_durations(durations: &PhaseDurations) -> Result<()> {
    for (name, secs) in [
        ("work", durations.work_secs),
        ("break", durations.break_secs),
        ("long break", durations.long_break_secs),
    ] {
        if secs == 0 {
            return Err(PomodoroError::validation(format!(
                "{name} duration must be positive"
            )));
        }
    }
    Ok(())
}

fn state_label(state: PomodoroState) -> &'static str {
    match state {
        PomodoroState::Active => "active",
        PomodoroState::Paused => "paused",
        PomodoroState::Finished => "finished",
    }
}

/// State moved into a spawned tick loop.
struct TickLoop {
    store: SharedStore,
    bus: EventBus,
    transition: Arc<AsyncMutex<()>>,
    engine_epoch: Arc<AtomicU64>,
    epoch: u64,
    token: CancellationToken,
    period: Duration,
    session_id: String,
    remaining_secs: u64,
    elapsed_secs: u64,
}

enum TickOutcome {
    Continue,
    Completed,
}

impl TickLoop {
    async fn run(mut self) {
        let mut interval = time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(session_id = %self.session_id, epoch = self.epoch, "Tick loop started");

        loop {
            tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let transition = Arc::clone(&self.transition);
            let _transition = tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                guard = transition.lock() => guard,
            };

            if self.token.is_cancelled()
                || self.engine_epoch.load(Ordering::SeqCst) != self.epoch
            {
                debug!(session_id = %self.session_id, "Stale tick discarded");
                break;
            }

            match self.tick().await {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Completed) => break,
                Err(err @ (PomodoroError::NotFound(_) | PomodoroError::Mismatch { .. })) => {
                    warn!(session_id = %self.session_id, error = %err, "Session gone, tick loop exiting");
                    break;
                }
                Err(err) => {
                    error!(session_id = %self.session_id, error = %err, "Tick not persisted");
                }
            }
        }

        debug!(session_id = %self.session_id, "Tick loop exited");
    }

    /// Advances the session by one second. Counters only move once the
    /// store accepted the update.
    async fn tick(&mut self) -> Result<TickOutcome> {
        let remaining = self.remaining_secs.saturating_sub(1);
        let elapsed = self.elapsed_secs.saturating_add(1);

        if self.remaining_secs > 0 {
            let ticked = self.persist(PomodoroState::Active, remaining, elapsed).await?;
            self.remaining_secs = remaining;
            self.elapsed_secs = elapsed;
            self.bus
                .publish(Event::pomodoro(PomodoroEventKind::Tick, ticked));
        }

        if self.remaining_secs > 0 {
            return Ok(TickOutcome::Continue);
        }

        let finished = self
            .persist(PomodoroState::Finished, 0, self.elapsed_secs)
            .await?;
        info!(
            session_id = %finished.id,
            phase = %finished.phase,
            phase_count = finished.phase_count,
            "Pomodoro completed"
        );
        self.bus
            .publish(Event::pomodoro(PomodoroEventKind::Completed, finished));
        Ok(TickOutcome::Completed)
    }

    async fn persist(
        &self,
        state: PomodoroState,
        remaining_secs: u64,
        elapsed_secs: u64,
    ) -> Result<Pomodoro> {
        let id = self.session_id.clone();
        run_blocking(&self.store, move |s| {
            s.update_pomodoro_state(&id, state, remaining_secs, elapsed_secs)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChannelSubscription;
    use crate::store::{MemoryStore, Store};
    use crate::types::{EventType, Task};
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{sleep, timeout};

    const FAST_TICK: Duration = Duration::from_millis(20);

    fn durations(work: u64, brk: u64, long: u64) -> PhaseDurations {
        PhaseDurations {
            work_secs: work,
            break_secs: brk,
            long_break_secs: long,
        }
    }

    fn engine_with(store: SharedStore, tick_interval: Duration) -> (PomodoroEngine, EventBus) {
        let bus = EventBus::new();
        let engine = PomodoroEngine::new(store, bus.clone(), EngineConfig { tick_interval });
        (engine, bus)
    }

    fn engine(tick_interval: Duration) -> (PomodoroEngine, EventBus) {
        engine_with(Arc::new(MemoryStore::new()), tick_interval)
    }

    async fn next_pomodoro(sub: &mut ChannelSubscription) -> (EventType, Pomodoro) {
        let event = timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("subscription closed");
        let event_type = event.event_type();
        match event {
            Event::Pomodoro(e) => (event_type, e.pomodoro),
            Event::Task(_) => panic!("unexpected task event"),
        }
    }

    /// Memory store whose writes can be made to fail or stall on demand.
    #[derive(Debug, Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing_updates: AtomicUsize,
        write_delay_ms: AtomicU64,
    }

    impl FlakyStore {
        fn fail_next_updates(&self, n: usize) {
            self.failing_updates.store(n, Ordering::SeqCst);
        }

        fn delay_writes(&self, delay: Duration) {
            let millis = u64::try_from(delay.as_millis()).unwrap();
            self.write_delay_ms.store(millis, Ordering::SeqCst);
        }

        fn stall(&self) {
            let millis = self.write_delay_ms.load(Ordering::SeqCst);
            if millis > 0 {
                std::thread::sleep(Duration::from_millis(millis));
            }
        }
    }

    impl Store for FlakyStore {
        fn save_pomodoro(&self, pomodoro: &Pomodoro) -> Result<()> {
            self.stall();
            self.inner.save_pomodoro(pomodoro)
        }

        fn get_latest_pomodoro(&self) -> Result<Option<Pomodoro>> {
            self.inner.get_latest_pomodoro()
        }

        fn update_pomodoro_state(
            &self,
            id: &str,
            state: PomodoroState,
            remaining_secs: u64,
            elapsed_secs: u64,
        ) -> Result<Pomodoro> {
            let failing = self
                .failing_updates
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if failing.is_ok() {
                return Err(PomodoroError::io("disk full"));
            }
            self.stall();
            self.inner
                .update_pomodoro_state(id, state, remaining_secs, elapsed_secs)
        }

        fn delete_pomodoro(&self, id: &str) -> Result<()> {
            self.inner.delete_pomodoro(id)
        }

        fn save_task(&self, task: &Task) -> Result<()> {
            self.inner.save_task(task)
        }

        fn get_tasks(&self) -> Result<Vec<Task>> {
            self.inner.get_tasks()
        }

        fn get_task_by_id(&self, id: &str) -> Result<Task> {
            self.inner.get_task_by_id(id)
        }

        fn update_task(&self, task: &Task) -> Result<Task> {
            self.inner.update_task(task)
        }

        fn delete_task(&self, id: &str) -> Result<Task> {
            self.inner.delete_task(id)
        }
    }

    #[tokio::test]
    async fn first_start_is_work_phase_one() {
        let (engine, bus) = engine(Duration::from_secs(3600));
        let mut sub = bus.subscribe_channel(&[EventType::PomodoroStarted]);

        let p = engine
            .start(durations(1500, 300, 900), Some("t1".to_string()))
            .await
            .unwrap();
        assert_eq!(p.state, PomodoroState::Active);
        assert_eq!(p.phase, Phase::Work);
        assert_eq!(p.phase_count, 1);
        assert_eq!(p.remaining_secs, 1500);
        assert_eq!(p.elapsed_secs, 0);
        assert_eq!(p.task_id.as_deref(), Some("t1"));
        assert!(!p.id.is_empty());
        assert!(engine.is_ticking());

        let (event_type, started) = next_pomodoro(&mut sub).await;
        assert_eq!(event_type, EventType::PomodoroStarted);
        assert_eq!(started.id, p.id);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn zero_duration_is_rejected() {
        let (engine, _bus) = engine(FAST_TICK);
        let err = engine.start(durations(0, 300, 900), None).await.unwrap_err();
        assert!(matches!(err, PomodoroError::Validation(_)));
        let err = engine.start(durations(10, 300, 0), None).await.unwrap_err();
        assert!(matches!(err, PomodoroError::Validation(_)));
        assert!(engine.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_start_conflicts_and_leaves_session_unchanged() {
        let (engine, _bus) = engine(Duration::from_secs(3600));
        let first = engine.start(durations(60, 5, 10), None).await.unwrap();

        let err = engine.start(durations(30, 5, 10), None).await.unwrap_err();
        assert!(matches!(err, PomodoroError::Conflict(_)));
        assert_eq!(engine.current().await.unwrap(), Some(first.clone()));

        engine.pause(&first.id).await.unwrap();
        let err = engine.start(durations(30, 5, 10), None).await.unwrap_err();
        assert!(matches!(err, PomodoroError::Conflict(_)));
        assert_eq!(
            engine.current().await.unwrap().map(|p| p.state),
            Some(PomodoroState::Paused)
        );
    }

    #[tokio::test]
    async fn ticks_preserve_elapsed_plus_remaining() {
        let (engine, bus) = engine(FAST_TICK);
        let mut sub = bus.subscribe_channel(&[EventType::PomodoroTick]);
        let p = engine.start(durations(60, 5, 10), None).await.unwrap();

        for _ in 0..3 {
            let (_, ticked) = next_pomodoro(&mut sub).await;
            assert_eq!(ticked.id, p.id);
            assert_eq!(ticked.elapsed_secs + ticked.remaining_secs, 60);
        }
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn pause_then_resume_keeps_remaining_time() {
        let (engine, _bus) = engine(FAST_TICK);
        let p = engine.start(durations(60, 5, 10), None).await.unwrap();
        sleep(FAST_TICK * 4).await;

        let paused = engine.pause(&p.id).await.unwrap();
        assert_eq!(paused.state, PomodoroState::Paused);
        assert_eq!(paused.elapsed_secs + paused.remaining_secs, 60);
        assert!(!engine.is_ticking());

        sleep(FAST_TICK * 5).await;
        let still = engine.current().await.unwrap().unwrap();
        assert_eq!(still.remaining_secs, paused.remaining_secs);

        let resumed = engine.resume(&p.id).await.unwrap();
        assert_eq!(resumed.state, PomodoroState::Active);
        assert_eq!(resumed.remaining_secs, paused.remaining_secs);
        assert_eq!(resumed.elapsed_secs, paused.elapsed_secs);
        assert!(engine.is_ticking());

        let stopped = engine.stop(&p.id).await.unwrap();
        assert_eq!(stopped.state, PomodoroState::Finished);
        assert_eq!(stopped.elapsed_secs + stopped.remaining_secs, 60);
    }

    #[tokio::test]
    async fn no_ticks_after_pause_returns() {
        let (engine, bus) = engine(FAST_TICK);
        let mut sub = bus.subscribe_channel(&[EventType::PomodoroTick]);
        let p = engine.start(durations(60, 5, 10), None).await.unwrap();
        next_pomodoro(&mut sub).await;

        let paused = engine.pause(&p.id).await.unwrap();
        // Ticks published before the pause are already buffered.
        while let Some(Event::Pomodoro(e)) = sub.try_recv() {
            assert!(e.pomodoro.remaining_secs >= paused.remaining_secs);
        }

        sleep(FAST_TICK * 6).await;
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn completion_then_next_start_is_short_break() {
        let (engine, bus) = engine(Duration::from_millis(50));
        let mut sub = bus.subscribe_channel(&[EventType::PomodoroCompleted]);

        let p = engine
            .start(durations(2, 1, 5), Some("t1".to_string()))
            .await
            .unwrap();
        let (event_type, completed) = next_pomodoro(&mut sub).await;
        assert_eq!(event_type, EventType::PomodoroCompleted);
        assert_eq!(completed.id, p.id);
        assert_eq!(completed.state, PomodoroState::Finished);
        assert_eq!(completed.phase, Phase::Work);
        assert_eq!(completed.phase_count, 1);
        assert_eq!(completed.remaining_secs, 0);
        assert_eq!(completed.elapsed_secs, 2);

        let next = engine.start(durations(2, 1, 5), None).await.unwrap();
        assert_eq!(next.phase, Phase::ShortBreak);
        assert_eq!(next.phase_count, 2);
        assert_eq!(next.remaining_secs, 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn completion_is_published_once() {
        let (engine, bus) = engine(Duration::from_millis(10));
        let mut sub = bus.subscribe_channel(&[EventType::PomodoroCompleted]);

        engine.start(durations(1, 1, 1), None).await.unwrap();
        next_pomodoro(&mut sub).await;
        sleep(Duration::from_millis(100)).await;
        assert!(sub.try_recv().is_none());
        assert!(!engine.is_ticking());
    }

    #[tokio::test]
    async fn stop_on_finished_session_is_not_found() {
        let (engine, _bus) = engine(Duration::from_secs(3600));
        let p = engine.start(durations(60, 5, 10), None).await.unwrap();
        engine.stop(&p.id).await.unwrap();

        let err = engine.stop(&p.id).await.unwrap_err();
        assert!(matches!(err, PomodoroError::NotFound(_)));
        let err = engine.pause(&p.id).await.unwrap_err();
        assert!(matches!(err, PomodoroError::NotFound(_)));
    }

    #[tokio::test]
    async fn wrong_id_is_not_found() {
        let (engine, _bus) = engine(Duration::from_secs(3600));
        let p = engine.start(durations(60, 5, 10), None).await.unwrap();

        for result in [
            engine.pause("nope").await,
            engine.resume("nope").await,
            engine.stop("nope").await,
        ] {
            assert!(matches!(result, Err(PomodoroError::NotFound(_))));
        }
        // Resuming an active session is also rejected.
        assert!(matches!(
            engine.resume(&p.id).await,
            Err(PomodoroError::NotFound(_))
        ));
        assert_eq!(
            engine.current().await.unwrap().map(|p| p.state),
            Some(PomodoroState::Active)
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn delete_removes_record_without_event() {
        let (engine, bus) = engine(FAST_TICK);
        let mut sub = bus.subscribe_channel(&[]);
        let p = engine.start(durations(60, 5, 10), None).await.unwrap();
        next_pomodoro(&mut sub).await;

        engine.delete(&p.id).await.unwrap();
        assert!(!engine.is_ticking());
        assert!(engine.current().await.unwrap().is_none());

        while let Some(event) = sub.try_recv() {
            assert_eq!(event.event_type(), EventType::PomodoroTick);
        }
        sleep(FAST_TICK * 4).await;
        assert!(sub.try_recv().is_none());

        engine.delete("unknown").await.unwrap();
    }

    #[tokio::test]
    async fn remaining_secs_requires_a_session() {
        let (engine, _bus) = engine(Duration::from_secs(3600));
        assert!(matches!(
            engine.remaining_secs().await,
            Err(PomodoroError::NotFound(_))
        ));

        engine.start(durations(90, 5, 10), None).await.unwrap();
        assert_eq!(engine.remaining_secs().await.unwrap(), 90);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn cleanup_stale_removes_leftover_session() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        {
            let (previous, _bus) = engine_with(Arc::clone(&store), Duration::from_secs(3600));
            previous.start(durations(60, 5, 10), None).await.unwrap();
            previous.shutdown().await;
        }

        let (engine, _bus) = engine_with(store, Duration::from_secs(3600));
        let removed = engine.cleanup_stale().await.unwrap();
        assert!(removed.is_some());
        assert!(engine.current().await.unwrap().is_none());
        assert_eq!(engine.cleanup_stale().await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_tick_persist_keeps_ticking() {
        let store = Arc::new(FlakyStore::default());
        let shared: SharedStore = store.clone();
        let (engine, bus) = engine_with(shared, FAST_TICK);
        let mut sub = bus.subscribe_channel(&[EventType::PomodoroTick]);

        store.fail_next_updates(2);
        engine.start(durations(60, 5, 10), None).await.unwrap();

        let (_, first) = next_pomodoro(&mut sub).await;
        assert_eq!(first.remaining_secs, 59);
        assert_eq!(first.elapsed_secs, 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn failed_pause_persist_restarts_ticker() {
        let store = Arc::new(FlakyStore::default());
        let shared: SharedStore = store.clone();
        let (engine, _bus) = engine_with(shared, Duration::from_secs(3600));
        let p = engine.start(durations(60, 5, 10), None).await.unwrap();

        store.fail_next_updates(1);
        let err = engine.pause(&p.id).await.unwrap_err();
        assert!(matches!(err, PomodoroError::Io(_)));
        assert!(engine.is_ticking());
        assert_eq!(
            engine.current().await.unwrap().map(|p| p.state),
            Some(PomodoroState::Active)
        );

        engine.pause(&p.id).await.unwrap();
        assert!(!engine.is_ticking());
    }

    #[tokio::test]
    async fn abandoned_start_still_runs_to_completion() {
        let store = Arc::new(FlakyStore::default());
        let shared: SharedStore = store.clone();
        let (engine, bus) = engine_with(shared, Duration::from_secs(3600));
        let mut sub = bus.subscribe_channel(&[EventType::PomodoroStarted]);

        store.delay_writes(Duration::from_millis(100));
        let abandoned = timeout(
            Duration::from_millis(30),
            engine.start(durations(60, 5, 10), None),
        )
        .await;
        assert!(abandoned.is_err());

        let (_, started) = next_pomodoro(&mut sub).await;
        assert_eq!(started.state, PomodoroState::Active);
        assert!(engine.is_ticking());

        store.delay_writes(Duration::ZERO);
        engine.stop(&started.id).await.unwrap();
        let next = engine.start(durations(60, 5, 10), None).await.unwrap();
        assert_eq!(next.phase, Phase::ShortBreak);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn abandoned_pause_still_persists() {
        let store = Arc::new(FlakyStore::default());
        let shared: SharedStore = store.clone();
        let (engine, bus) = engine_with(shared, Duration::from_secs(3600));
        let mut sub = bus.subscribe_channel(&[EventType::PomodoroPaused]);
        let p = engine.start(durations(60, 5, 10), None).await.unwrap();

        store.delay_writes(Duration::from_millis(100));
        let abandoned = timeout(Duration::from_millis(30), engine.pause(&p.id)).await;
        assert!(abandoned.is_err());

        let (_, paused) = next_pomodoro(&mut sub).await;
        assert_eq!(paused.id, p.id);
        assert_eq!(paused.state, PomodoroState::Paused);
        assert!(!engine.is_ticking());

        store.delay_writes(Duration::ZERO);
        let resumed = engine.resume(&p.id).await.unwrap();
        assert_eq!(resumed.state, PomodoroState::Active);
        assert!(engine.is_ticking());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn stop_from_paused_finishes_with_stored_time() {
        let (engine, bus) = engine(FAST_TICK);
        let mut sub = bus.subscribe_channel(&[EventType::PomodoroStopped]);
        let p = engine.start(durations(60, 5, 10), None).await.unwrap();
        sleep(FAST_TICK * 3).await;
        let paused = engine.pause(&p.id).await.unwrap();

        let stopped = engine.stop(&p.id).await.unwrap();
        assert_eq!(stopped.state, PomodoroState::Finished);
        assert_eq!(stopped.remaining_secs, paused.remaining_secs);
        assert_eq!(stopped.elapsed_secs, paused.elapsed_secs);
        assert!(!engine.is_ticking());

        let (event_type, published) = next_pomodoro(&mut sub).await;
        assert_eq!(event_type, EventType::PomodoroStopped);
        assert_eq!(published, stopped);
    }

    #[tokio::test]
    async fn debug_output_names_the_store() {
        let (engine, _bus) = engine(Duration::from_secs(3600));
        let rendered = format!("{engine:?}");
        assert!(rendered.contains("PomodoroEngine"));
        assert!(rendered.contains("MemoryStore"));
    }
}
