//! Durable one-time task store.
//!
//! The store is a small durable-queue abstraction so the medium is swappable
//! without touching scheduler logic. The file implementation keeps the whole
//! queue as one JSON array, fully rewritten per mutation via
//! temp-file-and-rename, with an internal lock serializing read-modify-write
//! cycles between the scheduler tick and agent tools.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

use crate::scheduler::types::OneTimeTask;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("task store parse: {0}")]
    Parse(#[from] serde_json::Error),
}

pub trait TaskStore: Send + Sync {
    /// Append a record; returns it with its assigned id.
    fn append(&self, task: OneTimeTask) -> Result<OneTimeTask, StoreError>;
    /// Records with `execution_time <= now`. Non-destructive: the caller
    /// removes executed records explicitly, so a crash between execution and
    /// removal re-executes at most once (at-least-once, by design of the
    /// reconciliation pass).
    fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<OneTimeTask>, StoreError>;
    fn list_all(&self) -> Result<Vec<OneTimeTask>, StoreError>;
    /// Remove records by id in one atomic write; returns how many were removed.
    fn remove(&self, ids: &[String]) -> Result<usize, StoreError>;
    /// Drop every pending record; returns how many were removed.
    fn clear(&self) -> Result<usize, StoreError>;
}

pub struct FileTaskStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileTaskStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// Load the queue. Records seeded by hand may lack an id; ids are
    /// assigned and persisted on first load so removal stays stable.
    fn load(&self) -> Result<Vec<OneTimeTask>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut tasks: Vec<OneTimeTask> = serde_json::from_str(&text)?;
        let mut assigned = false;
        for task in &mut tasks {
            if task.id.is_empty() {
                task.id = uuid::Uuid::new_v4().to_string()[..8].to_string();
                assigned = true;
            }
        }
        if assigned {
            self.write(&tasks)?;
        }
        Ok(tasks)
    }

    /// Atomic write: temp file then rename, so a crash mid-write never
    /// leaves a corrupt or partial queue.
    fn write(&self, tasks: &[OneTimeTask]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(tasks)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl TaskStore for FileTaskStore {
    fn append(&self, task: OneTimeTask) -> Result<OneTimeTask, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut tasks = self.load()?;
        tasks.push(task.clone());
        self.write(&tasks)?;
        debug!(task_id = %task.id, task_name = %task.task_name, "One-time task appended");
        Ok(task)
    }

    fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<OneTimeTask>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .load()?
            .into_iter()
            .filter(|t| t.execution_time <= now)
            .collect())
    }

    fn list_all(&self) -> Result<Vec<OneTimeTask>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load()
    }

    fn remove(&self, ids: &[String]) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let tasks = self.load()?;
        let before = tasks.len();
        let remaining: Vec<OneTimeTask> = tasks
            .into_iter()
            .filter(|t| !ids.contains(&t.id))
            .collect();
        let removed = before - remaining.len();
        if removed > 0 {
            self.write(&remaining)?;
        }
        Ok(removed)
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let tasks = self.load()?;
        let removed = tasks.len();
        if removed > 0 {
            self.write(&[])?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn temp_store() -> (TempDir, FileTaskStore) {
        let dir = TempDir::new().unwrap();
        let store = FileTaskStore::new(&dir.path().join("data").join("tasks.json"));
        (dir, store)
    }

    #[test]
    fn append_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");

        let store = FileTaskStore::new(&path);
        let task = OneTimeTask::new(utc("2030-01-01T18:00:00Z"), "publish", json!({"id": "d1"}));
        let appended = store.append(task).unwrap();

        // Fresh store instance, same file: simulates a process restart.
        let reopened = FileTaskStore::new(&path);
        let all = reopened.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, appended.id);
        assert_eq!(all[0].task_name, "publish");
    }

    #[test]
    fn list_due_uses_inclusive_cutoff() {
        let (_dir, store) = temp_store();
        let cutoff = utc("2024-01-01T00:05:00Z");
        store
            .append(OneTimeTask::new(cutoff, "publish", json!({})))
            .unwrap();
        store
            .append(OneTimeTask::new(
                utc("2024-01-01T00:05:01Z"),
                "publish",
                json!({}),
            ))
            .unwrap();

        let due = store.list_due(cutoff).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].execution_time, cutoff);
    }

    #[test]
    fn remove_rewrites_only_survivors() {
        let (_dir, store) = temp_store();
        let a = store
            .append(OneTimeTask::new(utc("2024-01-01T00:00:00Z"), "a", json!({})))
            .unwrap();
        let b = store
            .append(OneTimeTask::new(utc("2024-01-02T00:00:00Z"), "b", json!({})))
            .unwrap();

        assert_eq!(store.remove(&[a.id.clone()]).unwrap(), 1);
        let remaining = store.list_all().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b.id);

        // Removing an unknown id is a no-op.
        assert_eq!(store.remove(&["nope".to_string()]).unwrap(), 0);
    }

    #[test]
    fn hand_seeded_records_get_ids_assigned() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(
            &path,
            r#"[{"execution_time": "2024-01-01T00:00:00Z", "task_name": "publish", "task_args": {"id": "draft-1"}}]"#,
        )
        .unwrap();

        let store = FileTaskStore::new(&path);
        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert!(!all[0].id.is_empty());

        // The assigned id is persisted, so it stays stable across loads.
        let again = store.list_all().unwrap();
        assert_eq!(again[0].id, all[0].id);
    }

    #[test]
    fn clear_empties_the_queue() {
        let (_dir, store) = temp_store();
        for i in 0..3 {
            store
                .append(OneTimeTask::new(
                    utc("2030-01-01T00:00:00Z"),
                    &format!("t{i}"),
                    json!({}),
                ))
                .unwrap();
        }
        assert_eq!(store.clear().unwrap(), 3);
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn missing_and_empty_files_are_empty_queues() {
        let (_dir, store) = temp_store();
        assert!(store.list_all().unwrap().is_empty());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "  ").unwrap();
        let store = FileTaskStore::new(&path);
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn write_leaves_no_tmp_file_behind() {
        let (_dir, store) = temp_store();
        store
            .append(OneTimeTask::new(utc("2030-01-01T00:00:00Z"), "t", json!({})))
            .unwrap();
        assert!(!store.path.with_extension("json.tmp").exists());
        assert!(store.path.exists());
    }
}
