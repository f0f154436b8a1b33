//! Durable storage for the single pomodoro record and the task list.
//!
//! Every operation runs inside one process-wide exclusive section, so a
//! read-modify-write cycle can never interleave with another. Operations are
//! synchronous; async callers go through [`run_blocking`] so that waiting on
//! the lock never stalls the runtime.
//!
//! Two backends implement [`Store`]:
//!
//! - [`FileStore`] - JSON files guarded by a create-exclusive lock file
//! - [`MemoryStore`] - process-local state, for tests and ephemeral servers

use std::sync::Arc;

use crate::error::{PomodoroError, Result};
use crate::types::{Pomodoro, PomodoroState, Task};

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Storage contract the engine and task registry depend on.
pub trait Store: Send + Sync + std::fmt::Debug {
    /// Persists a full session record, replacing any previous one.
    fn save_pomodoro(&self, pomodoro: &Pomodoro) -> Result<()>;

    /// Returns the most recently saved session, if any.
    fn get_latest_pomodoro(&self) -> Result<Option<Pomodoro>>;

    /// Returns the stored session only while it is `Active` or `Paused`.
    fn get_active_pomodoro(&self) -> Result<Option<Pomodoro>> {
        Ok(self.get_latest_pomodoro()?.filter(Pomodoro::is_running))
    }

    /// Overwrites state, remaining and elapsed time of the stored session.
    ///
    /// Fails with [`PomodoroError::NotFound`] when no record exists and with
    /// [`PomodoroError::Mismatch`] when `id` is not the stored record's id; in
    /// both cases nothing is written.
    fn update_pomodoro_state(
        &self,
        id: &str,
        state: PomodoroState,
        remaining_secs: u64,
        elapsed_secs: u64,
    ) -> Result<Pomodoro>;

    /// Removes the stored session if its id matches; no-op otherwise.
    fn delete_pomodoro(&self, id: &str) -> Result<()>;

    /// Appends a task to the list.
    fn save_task(&self, task: &Task) -> Result<()>;

    fn get_tasks(&self) -> Result<Vec<Task>>;

    fn get_task_by_id(&self, id: &str) -> Result<Task>;

    /// Replaces the task with the same id.
    fn update_task(&self, task: &Task) -> Result<Task>;

    /// Removes a task and returns what was removed.
    fn delete_task(&self, id: &str) -> Result<Task>;
}

/// Shared handle to a store backend.
pub type SharedStore = Arc<dyn Store>;

/// Runs a store operation on the blocking thread pool.
///
/// The store lock may be held by another process for a while; waiting for it
/// happens off the async worker threads.
pub async fn run_blocking<T, F>(store: &SharedStore, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn Store) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref())).await?
}

/// Applies a state update to an in-memory record, enforcing the id check.
fn apply_state_update(
    record: Option<&mut Pomodoro>,
    id: &str,
    state: PomodoroState,
    remaining_secs: u64,
    elapsed_secs: u64,
) -> Result<Pomodoro> {
    let record = record.ok_or_else(|| PomodoroError::not_found("no pomodoro record"))?;
    if record.id != id {
        return Err(PomodoroError::mismatch(record.id.clone(), id));
    }
    record.state = state;
    record.remaining_secs = remaining_secs;
    record.elapsed_secs = elapsed_secs;
    Ok(record.clone())
}

fn task_not_found(id: &str) -> PomodoroError {
    PomodoroError::not_found(format!("task {id}"))
}
