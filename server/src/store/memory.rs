//! In-memory store backend.

use std::sync::{Mutex, MutexGuard};

use super::{apply_state_update, task_not_found, Store};
use crate::error::{PomodoroError, Result};
use crate::types::{Pomodoro, PomodoroState, Task};

#[derive(Debug, Default)]
struct MemoryState {
    pomodoro: Option<Pomodoro>,
    tasks: Vec<Task>,
}

/// Process-local store. The mutex is the exclusive section.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| PomodoroError::lock("memory store mutex poisoned"))
    }
}

impl Store for MemoryStore {
    fn save_pomodoro(&self, pomodoro: &Pomodoro) -> Result<()> {
        self.lock()?.pomodoro = Some(pomodoro.clone());
        Ok(())
    }

    fn get_latest_pomodoro(&self) -> Result<Option<Pomodoro>> {
        Ok(self.lock()?.pomodoro.clone())
    }

    fn update_pomodoro_state(
        &self,
        id: &str,
        state: PomodoroState,
        remaining_secs: u64,
        elapsed_secs: u64,
    ) -> Result<Pomodoro> {
        let mut guard = self.lock()?;
        apply_state_update(
            guard.pomodoro.as_mut(),
            id,
            state,
            remaining_secs,
            elapsed_secs,
        )
    }

    fn delete_pomodoro(&self, id: &str) -> Result<()> {
        let mut guard = self.lock()?;
        if guard.pomodoro.as_ref().is_some_and(|p| p.id == id) {
            guard.pomodoro = None;
        }
        Ok(())
    }

    fn save_task(&self, task: &Task) -> Result<()> {
        self.lock()?.tasks.push(task.clone());
        Ok(())
    }

    fn get_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.lock()?.tasks.clone())
    }

    fn get_task_by_id(&self, id: &str) -> Result<Task> {
        self.lock()?
            .tasks
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| task_not_found(id))
    }

    fn update_task(&self, task: &Task) -> Result<Task> {
        let mut guard = self.lock()?;
        let slot = guard
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| task_not_found(&task.id))?;
        *slot = task.clone();
        Ok(task.clone())
    }

    fn delete_task(&self, id: &str) -> Result<Task> {
        let mut guard = self.lock()?;
        let index = guard
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| task_not_found(id))?;
        Ok(guard.tasks.remove(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::check_store_contract;

    #[test]
    fn memory_store_honours_contract() {
        check_store_contract(&MemoryStore::new());
    }
}
