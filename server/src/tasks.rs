//! Task registry: CRUD over named tasks.
//!
//! Every mutation publishes a task event after the store accepted it. A
//! missing id is always a [`PomodoroError::NotFound`] error.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::error::{PomodoroError, Result};
use crate::store::{run_blocking, SharedStore};
use crate::types::{Event, Task, TaskEventKind};

/// Creates, updates and deletes tasks.
#[derive(Debug, Clone)]
pub struct TaskRegistry {
    store: SharedStore,
    bus: EventBus,
}

impl TaskRegistry {
    #[must_use]
    pub fn new(store: SharedStore, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Creates an incomplete task.
    ///
    /// # Errors
    ///
    /// [`PomodoroError::Validation`] if the trimmed title is empty.
    pub async fn create_task(&self, title: &str) -> Result<Task> {
        let task = Task {
            id: Uuid::new_v4().to_string(),
            title: validate_title(title)?,
            created_at: Utc::now(),
            completed: false,
        };

        let record = task.clone();
        run_blocking(&self.store, move |s| s.save_task(&record)).await?;

        info!(task_id = %task.id, title = %task.title, "Task created");
        self.bus
            .publish(Event::task(TaskEventKind::Created, task.clone()));
        Ok(task)
    }

    /// All tasks in creation order.
    pub async fn get_all_tasks(&self) -> Result<Vec<Task>> {
        run_blocking(&self.store, |s| s.get_tasks()).await
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        let id = id.to_string();
        run_blocking(&self.store, move |s| s.get_task_by_id(&id)).await
    }

    /// Replaces title and completion flag of task `id`.
    ///
    /// # Errors
    ///
    /// - [`PomodoroError::Validation`] if the trimmed title is empty
    /// - [`PomodoroError::NotFound`] if no task has this id
    pub async fn update_task(&self, id: &str, title: &str, completed: bool) -> Result<Task> {
        let title = validate_title(title)?;
        let id = id.to_string();
        let updated = run_blocking(&self.store, move |s| {
            let mut task = s.get_task_by_id(&id)?;
            task.title = title;
            task.completed = completed;
            s.update_task(&task)
        })
        .await?;

        debug!(task_id = %updated.id, completed = updated.completed, "Task updated");
        self.bus
            .publish(Event::task(TaskEventKind::Updated, updated.clone()));
        Ok(updated)
    }

    /// Removes task `id` and returns it.
    pub async fn delete_task(&self, id: &str) -> Result<Task> {
        let id = id.to_string();
        let removed = run_blocking(&self.store, move |s| s.delete_task(&id)).await?;

        info!(task_id = %removed.id, "Task deleted");
        self.bus
            .publish(Event::task(TaskEventKind::Deleted, removed.clone()));
        Ok(removed)
    }
}

fn validate_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(PomodoroError::validation("task title cannot be empty"));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::EventType;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn registry() -> (TaskRegistry, EventBus) {
        let bus = EventBus::new();
        (
            TaskRegistry::new(Arc::new(MemoryStore::new()), bus.clone()),
            bus,
        )
    }

    #[tokio::test]
    async fn empty_title_is_rejected() {
        let (tasks, _bus) = registry();
        for title in ["", "   ", "\t\n"] {
            let err = tasks.create_task(title).await.unwrap_err();
            assert!(matches!(err, PomodoroError::Validation(_)));
        }
        assert!(tasks.get_all_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_assigns_id_and_publishes() {
        let (tasks, bus) = registry();
        let mut sub = bus.subscribe_channel(&[EventType::TaskCreated]);

        let task = tasks.create_task("write spec").await.unwrap();
        assert!(!task.id.is_empty());
        assert_eq!(task.title, "write spec");
        assert!(!task.completed);

        let event = timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            Event::Task(e) => {
                assert_eq!(e.kind, TaskEventKind::Created);
                assert_eq!(e.task, task);
            }
            Event::Pomodoro(_) => panic!("expected task event"),
        }
    }

    #[tokio::test]
    async fn titles_are_trimmed() {
        let (tasks, _bus) = registry();
        let task = tasks.create_task("  review PR  ").await.unwrap();
        assert_eq!(task.title, "review PR");
    }

    #[tokio::test]
    async fn update_changes_title_and_completion() {
        let (tasks, bus) = registry();
        let task = tasks.create_task("draft").await.unwrap();
        let mut sub = bus.subscribe_channel(&[EventType::TaskUpdated]);

        let updated = tasks.update_task(&task.id, "final", true).await.unwrap();
        assert_eq!(updated.id, task.id);
        assert_eq!(updated.created_at, task.created_at);
        assert_eq!(updated.title, "final");
        assert!(updated.completed);
        assert_eq!(tasks.get_task(&task.id).await.unwrap(), updated);

        let event = timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), EventType::TaskUpdated);

        let err = tasks.update_task(&task.id, " ", false).await.unwrap_err();
        assert!(matches!(err, PomodoroError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_publishes_removed_task() {
        let (tasks, bus) = registry();
        let task = tasks.create_task("obsolete").await.unwrap();
        let mut sub = bus.subscribe_channel(&[EventType::TaskDeleted]);

        let removed = tasks.delete_task(&task.id).await.unwrap();
        assert_eq!(removed, task);

        let event = timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            Event::Task(e) => assert_eq!(e.task.id, task.id),
            Event::Pomodoro(_) => panic!("expected task event"),
        }
        assert!(tasks.get_all_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_task_is_not_found_everywhere() {
        let (tasks, _bus) = registry();
        assert!(matches!(
            tasks.get_task("missing").await,
            Err(PomodoroError::NotFound(_))
        ));
        assert!(matches!(
            tasks.update_task("missing", "title", false).await,
            Err(PomodoroError::NotFound(_))
        ));
        assert!(matches!(
            tasks.delete_task("missing").await,
            Err(PomodoroError::NotFound(_))
        ));
    }
}
