//! JSON file store backend.
//!
//! # Layout
//!
//! ```text
//! <data dir>/
//!   pomodoro.json   single session record, rewritten on every mutation
//!   tasks.json      task array, rewritten on every mutation
//!   .lock           present only while an operation is in progress
//! ```
//!
//! Writes go to a sibling temp file that is renamed over the target, so a
//! crash mid-write leaves either the old or the new content. The lock file is
//! created with create-exclusive semantics and removed by a drop guard, so a
//! crash leaves at most one lock file behind. Such a leftover is reclaimed
//! when the pid it records no longer exists (Linux) or once it is a minute
//! old.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::{apply_state_update, task_not_found, Store};
use crate::error::{PomodoroError, Result};
use crate::types::{Pomodoro, PomodoroState, Task};

const POMODORO_FILE: &str = "pomodoro.json";
const TASKS_FILE: &str = "tasks.json";
const LOCK_FILE: &str = ".lock";

/// Interval between lock acquisition attempts.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Lock files older than this are left over from a crash. Every operation
/// holds the lock for milliseconds.
const STALE_LOCK_AGE: Duration = Duration::from_secs(60);

/// Store backed by JSON files in a data directory.
#[derive(Debug)]
pub struct FileStore {
    pomodoro_path: PathBuf,
    tasks_path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    /// Serialises callers inside this process before they touch the lock file.
    local: Mutex<()>,
}

impl FileStore {
    /// Opens (creating if needed) a store in `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`PomodoroError::Io`] if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>, lock_timeout: Duration) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|err| {
            PomodoroError::io(format!("failed to create {}: {err}", dir.display()))
        })?;
        debug!(dir = %dir.display(), "Opened file store");

        Ok(Self {
            pomodoro_path: dir.join(POMODORO_FILE),
            tasks_path: dir.join(TASKS_FILE),
            lock_path: dir.join(LOCK_FILE),
            lock_timeout,
            local: Mutex::new(()),
        })
    }

    /// Runs `op` inside the exclusive section.
    fn exclusive<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<T> {
        let _local = self
            .local
            .lock()
            .map_err(|_| PomodoroError::lock("file store mutex poisoned"))?;
        let _guard = LockFile::acquire(&self.lock_path, self.lock_timeout)?;
        op()
    }

    fn read_pomodoro(&self) -> Result<Option<Pomodoro>> {
        read_json(&self.pomodoro_path)
    }

    fn read_tasks(&self) -> Result<Vec<Task>> {
        Ok(read_json(&self.tasks_path)?.unwrap_or_default())
    }

    fn write_tasks(&self, tasks: &[Task]) -> Result<()> {
        write_json(&self.tasks_path, &tasks)
    }
}

impl Store for FileStore {
    fn save_pomodoro(&self, pomodoro: &Pomodoro) -> Result<()> {
        self.exclusive(|| write_json(&self.pomodoro_path, pomodoro))
    }

    fn get_latest_pomodoro(&self) -> Result<Option<Pomodoro>> {
        self.exclusive(|| self.read_pomodoro())
    }

    fn update_pomodoro_state(
        &self,
        id: &str,
        state: PomodoroState,
        remaining_secs: u64,
        elapsed_secs: u64,
    ) -> Result<Pomodoro> {
        self.exclusive(|| {
            let mut record = self.read_pomodoro()?;
            let updated =
                apply_state_update(record.as_mut(), id, state, remaining_secs, elapsed_secs)?;
            write_json(&self.pomodoro_path, &updated)?;
            Ok(updated)
        })
    }

    fn delete_pomodoro(&self, id: &str) -> Result<()> {
        self.exclusive(|| {
            match self.read_pomodoro()? {
                Some(record) if record.id == id => remove_if_exists(&self.pomodoro_path),
                _ => Ok(()),
            }
        })
    }

    fn save_task(&self, task: &Task) -> Result<()> {
        self.exclusive(|| {
            let mut tasks = self.read_tasks()?;
            tasks.push(task.clone());
            self.write_tasks(&tasks)
        })
    }

    fn get_tasks(&self) -> Result<Vec<Task>> {
        self.exclusive(|| self.read_tasks())
    }

    fn get_task_by_id(&self, id: &str) -> Result<Task> {
        self.exclusive(|| {
            self.read_tasks()?
                .into_iter()
                .find(|t| t.id == id)
                .ok_or_else(|| task_not_found(id))
        })
    }

    fn update_task(&self, task: &Task) -> Result<Task> {
        self.exclusive(|| {
            let mut tasks = self.read_tasks()?;
            let slot = tasks
                .iter_mut()
                .find(|t| t.id == task.id)
                .ok_or_else(|| task_not_found(&task.id))?;
            *slot = task.clone();
            self.write_tasks(&tasks)?;
            Ok(task.clone())
        })
    }

    fn delete_task(&self, id: &str) -> Result<Task> {
        self.exclusive(|| {
            let mut tasks = self.read_tasks()?;
            let index = tasks
                .iter()
                .position(|t| t.id == id)
                .ok_or_else(|| task_not_found(id))?;
            let removed = tasks.remove(index);
            self.write_tasks(&tasks)?;
            Ok(removed)
        })
    }
}

/// Create-exclusive lock file, removed on drop.
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    // Owner pid helps whoever has to clean up after a crash.
                    let _ = writeln!(file, "{}", std::process::id());
                    trace!(path = %path.display(), "Acquired store lock");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if is_stale(path) {
                        warn!(path = %path.display(), "Removing stale store lock");
                        match fs::remove_file(path) {
                            Ok(()) => continue,
                            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                            Err(err) => {
                                return Err(PomodoroError::lock(format!(
                                    "failed to remove stale lock {}: {err}",
                                    path.display()
                                )));
                            }
                        }
                    }
                    if started.elapsed() >= timeout {
                        return Err(PomodoroError::lock(format!(
                            "{} held for more than {}ms",
                            path.display(),
                            timeout.as_millis()
                        )));
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(err) => {
                    return Err(PomodoroError::io(format!(
                        "failed to create lock file {}: {err}",
                        path.display()
                    )));
                }
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "Failed to remove store lock file");
        }
    }
}

/// A lock file is stale when its owner is gone or it has outlived any
/// operation.
fn is_stale(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    let expired = metadata
        .modified()
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age >= STALE_LOCK_AGE);
    expired || owner_is_gone(path)
}

#[cfg(target_os = "linux")]
fn owner_is_gone(path: &Path) -> bool {
    let Some(pid) = fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse::<u32>().ok())
    else {
        // Blank while the owner is still writing its pid.
        return false;
    };
    pid != std::process::id() && !Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn owner_is_gone(_path: &Path) -> bool {
    false
}

/// Reads and parses a JSON file. Missing or blank files mean "no record".
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(PomodoroError::io(format!(
                "failed to read {}: {err}",
                path.display()
            )))
        }
    };

    if contents.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|err| PomodoroError::corrupt(format!("{}: {err}", path.display())))
}

/// Serializes `value` and atomically replaces `path` with it.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|err| PomodoroError::internal(format!("failed to serialize record: {err}")))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)
        .and_then(|()| fs::rename(&tmp, path))
        .map_err(|err| PomodoroError::io(format!("failed to write {}: {err}", path.display())))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(PomodoroError::io(format!(
            "failed to remove {}: {err}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{check_store_contract, sample_pomodoro};
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> FileStore {
        FileStore::open(dir.path(), Duration::from_millis(100)).unwrap()
    }

    #[test]
    fn file_store_honours_contract() {
        let dir = TempDir::new().unwrap();
        check_store_contract(&open_store(&dir));
    }

    #[test]
    fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        open_store(&dir)
            .save_pomodoro(&sample_pomodoro("p1"))
            .unwrap();

        let reopened = open_store(&dir);
        assert_eq!(reopened.get_latest_pomodoro().unwrap().unwrap().id, "p1");
    }

    #[test]
    fn lock_file_removed_after_each_operation() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.save_pomodoro(&sample_pomodoro("p1")).unwrap();
        assert!(!dir.path().join(LOCK_FILE).exists());

        let _ = store.update_pomodoro_state("wrong", PomodoroState::Paused, 1, 1);
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn held_lock_fails_with_lock_error() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        // Held by a live process: this one.
        fs::write(dir.path().join(LOCK_FILE), std::process::id().to_string()).unwrap();

        let err = store.get_latest_pomodoro().unwrap_err();
        assert!(matches!(err, PomodoroError::Lock(_)));

        // A live lock file is never removed by a failed acquisition.
        assert!(dir.path().join(LOCK_FILE).exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn lock_of_dead_process_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.save_pomodoro(&sample_pomodoro("p1")).unwrap();
        // Above the kernel's pid_max, so never a running process.
        fs::write(dir.path().join(LOCK_FILE), "4000000000\n").unwrap();

        assert_eq!(store.get_latest_pomodoro().unwrap().unwrap().id, "p1");
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn expired_lock_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let lock = fs::File::create(dir.path().join(LOCK_FILE)).unwrap();
        lock.set_modified(std::time::SystemTime::now() - STALE_LOCK_AGE * 2)
            .unwrap();
        drop(lock);

        store.save_pomodoro(&sample_pomodoro("p1")).unwrap();
        assert_eq!(store.get_latest_pomodoro().unwrap().unwrap().id, "p1");
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[test]
    fn corrupt_record_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        fs::write(dir.path().join(POMODORO_FILE), "{not json").unwrap();

        let err = store.get_latest_pomodoro().unwrap_err();
        assert!(matches!(err, PomodoroError::CorruptState(_)));
    }

    #[test]
    fn blank_files_mean_no_record() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        fs::write(dir.path().join(POMODORO_FILE), "  \n").unwrap();
        fs::write(dir.path().join(TASKS_FILE), "").unwrap();

        assert!(store.get_latest_pomodoro().unwrap().is_none());
        assert!(store.get_tasks().unwrap().is_empty());
    }

    #[test]
    fn concurrent_writers_are_serialized() {
        let dir = TempDir::new().unwrap();
        let store = std::sync::Arc::new(
            FileStore::open(dir.path(), Duration::from_secs(5)).unwrap(),
        );

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                thread::spawn(move || {
                    store
                        .save_task(&crate::store::tests::sample_task(
                            &format!("t{i}"),
                            "parallel",
                        ))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.get_tasks().unwrap().len(), 8);
    }
}
