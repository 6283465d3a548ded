//! Task registry — the single source of truth for what a named action does.
//!
//! Both the scheduler (recurring jobs and due one-time records) and the agent
//! (via scheduling tools) resolve task names here. The registry is an
//! explicit object constructed at startup and passed by reference, so tests
//! can swap in fakes.

pub mod publish;

use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of running a task through the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed,
    /// The recurring job that fired this task should be removed. Used by
    /// one-shot recurring jobs (a single future publish materialized as a
    /// recurring definition).
    Cancel,
    /// The task did not run to completion; the reason is already logged.
    /// Unknown task names land here too — never a panic, the caller decides
    /// whether that is fatal.
    Failed(String),
}

#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    fn name(&self) -> &str;
    /// Reject stale arguments before execution (e.g. a publish task whose
    /// draft directory was deleted). A `false` here is terminal for the
    /// record: it is dropped, not retried.
    fn validate(&self, args: &Value) -> bool {
        let _ = args;
        true
    }
    async fn run(&self, args: Value) -> Result<TaskOutcome>;
}

pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }

    /// Register a task. Returns an error if the name is already taken.
    pub fn register(&mut self, task: Arc<dyn TaskHandler>) -> Result<()> {
        let name = task.name().to_string();
        if self.tasks.contains_key(&name) {
            anyhow::bail!("Task '{}' is already registered", name);
        }
        self.tasks.insert(name, task);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(|s| s.as_str()).collect()
    }

    /// `false` for unknown names and for stale arguments.
    pub fn validate(&self, name: &str, args: &Value) -> bool {
        match self.tasks.get(name) {
            Some(task) => task.validate(args),
            None => false,
        }
    }

    pub async fn run(&self, name: &str, args: Value) -> TaskOutcome {
        let task = match self.tasks.get(name) {
            Some(t) => Arc::clone(t),
            None => {
                warn!(task_name = %name, "Unknown task");
                return TaskOutcome::Failed(format!("Task '{}' not found", name));
            }
        };

        let span = tracing::info_span!("task_execution", task_name = %name);
        let _guard = span.enter();
        let start = std::time::Instant::now();
        let outcome = match task.run(args).await {
            Ok(outcome) => outcome,
            Err(e) => TaskOutcome::Failed(format!("{e:#}")),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            TaskOutcome::Failed(reason) => {
                warn!(task_name = %name, duration_ms, reason = %reason, "Task failed")
            }
            _ => info!(task_name = %name, duration_ms, outcome = ?outcome, "Task completed"),
        }
        outcome
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
