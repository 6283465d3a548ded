//! Scheduling tools — the agent's window into the scheduler.
//!
//! One-time tasks go through the durable store; recurring definitions go
//! through the generated schedule source plus a live reload. The tools only
//! touch the same abstractions the scheduler itself uses, so both sides stay
//! in agreement about what a task name means.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::scheduler::types::{OneTimeTask, RawScheduleRecord};
use crate::scheduler::{Scheduler, TaskStore};
use crate::tasks::TaskRegistry;
use crate::tools::DynTool;

pub type SchedulerHandle = Arc<Mutex<Scheduler>>;

// ---------------------------------------------------------------------------
// schedule_onetime_task
// ---------------------------------------------------------------------------

pub struct ScheduleOnetimeTaskTool {
    pub store: Arc<dyn TaskStore>,
    pub registry: Arc<TaskRegistry>,
}

#[async_trait::async_trait]
impl DynTool for ScheduleOnetimeTaskTool {
    fn name(&self) -> &str {
        "schedule_onetime_task"
    }
    fn description(&self) -> &str {
        "Schedule a task to run once at an absolute future time. Use for planned posts: e.g. task_name 'publish' with task_args {\"id\": \"<draft id>\"}."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "execution_time": {
                    "type": "string",
                    "description": "RFC-3339 UTC timestamp, e.g. '2024-06-03T15:00:00Z'"
                },
                "task_name": { "type": "string" },
                "task_args": { "type": "object" }
            },
            "required": ["execution_time", "task_name"]
        })
    }
    async fn call(&self, args: Value) -> Result<String> {
        let raw_time = args["execution_time"].as_str().unwrap_or_default();
        let execution_time: DateTime<Utc> = raw_time
            .parse()
            .with_context(|| format!("invalid execution_time '{}', expected RFC-3339", raw_time))?;
        let task_name = args["task_name"].as_str().unwrap_or_default();
        if !self.registry.contains(task_name) {
            anyhow::bail!(
                "unknown task '{}'; available: {}",
                task_name,
                self.registry.names().join(", ")
            );
        }
        let task_args = args.get("task_args").cloned().unwrap_or(json!({}));
        let task = self
            .store
            .append(OneTimeTask::new(execution_time, task_name, task_args))?;
        Ok(format!(
            "Scheduled '{}' (id {}) for {}",
            task.task_name, task.id, task.execution_time
        ))
    }
}

// ---------------------------------------------------------------------------
// list_scheduled_tasks
// ---------------------------------------------------------------------------

pub struct ListScheduledTasksTool {
    pub store: Arc<dyn TaskStore>,
}

#[async_trait::async_trait]
impl DynTool for ListScheduledTasksTool {
    fn name(&self) -> &str {
        "list_scheduled_tasks"
    }
    fn description(&self) -> &str {
        "List pending one-time tasks with their ids and execution times."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }
    async fn call(&self, _args: Value) -> Result<String> {
        let tasks = self.store.list_all()?;
        if tasks.is_empty() {
            return Ok("No pending one-time tasks.".to_string());
        }
        let lines: Vec<String> = tasks
            .iter()
            .map(|t| format!("{} | {} | {} | {}", t.id, t.execution_time, t.task_name, t.task_args))
            .collect();
        Ok(format!(
            "Pending one-time tasks ({}):\n{}",
            lines.len(),
            lines.join("\n")
        ))
    }
}

// ---------------------------------------------------------------------------
// cancel_scheduled_task
// ---------------------------------------------------------------------------

pub struct CancelScheduledTaskTool {
    pub store: Arc<dyn TaskStore>,
}

#[async_trait::async_trait]
impl DynTool for CancelScheduledTaskTool {
    fn name(&self) -> &str {
        "cancel_scheduled_task"
    }
    fn description(&self) -> &str {
        "Cancel a pending one-time task by id (see list_scheduled_tasks)."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" }
            },
            "required": ["id"]
        })
    }
    async fn call(&self, args: Value) -> Result<String> {
        let id = args["id"].as_str().unwrap_or_default().to_string();
        let removed = self.store.remove(&[id.clone()])?;
        if removed == 0 {
            Ok(format!("No pending task with id '{}'.", id))
        } else {
            Ok(format!("Cancelled task '{}'.", id))
        }
    }
}

// ---------------------------------------------------------------------------
// write_generated_schedules
// ---------------------------------------------------------------------------

/// Replace the generated recurring-schedule source. When a live scheduler
/// handle is present the new definitions are materialized immediately.
pub struct WriteGeneratedSchedulesTool {
    pub path: PathBuf,
    pub scheduler: Option<SchedulerHandle>,
}

#[async_trait::async_trait]
impl DynTool for WriteGeneratedSchedulesTool {
    fn name(&self) -> &str {
        "write_generated_schedules"
    }
    fn description(&self) -> &str {
        "Overwrite the generated recurring schedules with a new list of records {task_name, schedule: {day, at} or {unit, interval}, task_args} and reload the scheduler."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "records": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "task_name": { "type": "string" },
                            "schedule": { "type": "object" },
                            "task_args": { "type": "object" }
                        },
                        "required": ["task_name", "schedule"]
                    }
                }
            },
            "required": ["records"]
        })
    }
    async fn call(&self, args: Value) -> Result<String> {
        let records: Vec<RawScheduleRecord> =
            serde_json::from_value(args["records"].clone()).context("invalid schedule records")?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&records)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;

        let mut note = String::new();
        if let Some(handle) = &self.scheduler {
            let mut sched = handle.lock().await;
            let count = sched.reload_all(Utc::now());
            note = format!(" Live job set now has {} job(s).", count);
        }
        Ok(format!(
            "Wrote {} generated schedule record(s).{}",
            records.len(),
            note
        ))
    }
}

// ---------------------------------------------------------------------------
// reload_schedules
// ---------------------------------------------------------------------------

pub struct ReloadSchedulesTool {
    pub scheduler: SchedulerHandle,
}

#[async_trait::async_trait]
impl DynTool for ReloadSchedulesTool {
    fn name(&self) -> &str {
        "reload_schedules"
    }
    fn description(&self) -> &str {
        "Re-materialize recurring jobs from the static and generated schedule sources."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }
    async fn call(&self, _args: Value) -> Result<String> {
        let mut sched = self.scheduler.lock().await;
        let count = sched.reload_all(Utc::now());
        Ok(format!("Reloaded recurring schedules: {} job(s).", count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::FileTaskStore;
    use tempfile::TempDir;

    fn store_and_registry() -> (TempDir, Arc<FileTaskStore>, Arc<TaskRegistry>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileTaskStore::new(&dir.path().join("tasks.json")));

        struct NoopTask;
        #[async_trait::async_trait]
        impl crate::tasks::TaskHandler for NoopTask {
            fn name(&self) -> &str {
                "publish"
            }
            async fn run(&self, _args: Value) -> Result<crate::tasks::TaskOutcome> {
                Ok(crate::tasks::TaskOutcome::Completed)
            }
        }
        let mut registry = TaskRegistry::new();
        registry.register(Arc::new(NoopTask)).unwrap();
        (dir, store, Arc::new(registry))
    }

    #[tokio::test]
    async fn schedule_appends_to_store() {
        let (_dir, store, registry) = store_and_registry();
        let tool = ScheduleOnetimeTaskTool {
            store: Arc::clone(&store) as Arc<dyn TaskStore>,
            registry,
        };
        let out = tool
            .call(json!({
                "execution_time": "2030-06-03T15:00:00Z",
                "task_name": "publish",
                "task_args": {"id": "draft-1"}
            }))
            .await
            .unwrap();
        assert!(out.contains("Scheduled 'publish'"));

        let all = store.list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].task_args["id"], "draft-1");
    }

    #[tokio::test]
    async fn schedule_rejects_unknown_task_and_bad_time() {
        let (_dir, store, registry) = store_and_registry();
        let tool = ScheduleOnetimeTaskTool {
            store: Arc::clone(&store) as Arc<dyn TaskStore>,
            registry,
        };
        let err = tool
            .call(json!({"execution_time": "2030-01-01T00:00:00Z", "task_name": "ghost"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown task"));

        let err = tool
            .call(json!({"execution_time": "next tuesday", "task_name": "publish"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("RFC-3339"));

        assert!(store.list_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_and_cancel_roundtrip() {
        let (_dir, store, registry) = store_and_registry();
        let schedule = ScheduleOnetimeTaskTool {
            store: Arc::clone(&store) as Arc<dyn TaskStore>,
            registry,
        };
        schedule
            .call(json!({"execution_time": "2030-01-01T00:00:00Z", "task_name": "publish"}))
            .await
            .unwrap();
        let id = store.list_all().unwrap()[0].id.clone();

        let list = ListScheduledTasksTool {
            store: Arc::clone(&store) as Arc<dyn TaskStore>,
        };
        let out = list.call(json!({})).await.unwrap();
        assert!(out.contains(&id));

        let cancel = CancelScheduledTaskTool {
            store: Arc::clone(&store) as Arc<dyn TaskStore>,
        };
        let out = cancel.call(json!({"id": id})).await.unwrap();
        assert!(out.contains("Cancelled"));
        assert!(store.list_all().unwrap().is_empty());

        let out = cancel.call(json!({"id": "missing"})).await.unwrap();
        assert!(out.contains("No pending task"));
    }

    #[tokio::test]
    async fn write_generated_schedules_persists_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("schedules").join("generated.json");
        let tool = WriteGeneratedSchedulesTool {
            path: path.clone(),
            scheduler: None,
        };
        let out = tool
            .call(json!({
                "records": [
                    {"task_name": "publish", "schedule": {"day": "monday", "at": "18:00"}, "task_args": {"id": "d1"}}
                ]
            }))
            .await
            .unwrap();
        assert!(out.contains("1 generated schedule record(s)"));

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<RawScheduleRecord> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].task_name, "publish");
        assert_eq!(parsed[0].schedule.day.as_deref(), Some("monday"));
    }

    #[tokio::test]
    async fn write_generated_schedules_rejects_malformed_records() {
        let dir = TempDir::new().unwrap();
        let tool = WriteGeneratedSchedulesTool {
            path: dir.path().join("generated.json"),
            scheduler: None,
        };
        let err = tool
            .call(json!({"records": [{"schedule": {}}]}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid schedule records"));
    }
}
