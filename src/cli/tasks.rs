//! Tasks command - Inspect and clear the pending one-time task queue.

use anyhow::Result;
use clap::Subcommand;

use crate::config;
use crate::scheduler::{FileTaskStore, TaskStore};

#[derive(Subcommand)]
pub enum TasksAction {
    /// List pending one-time tasks.
    List,
    /// Remove all pending one-time tasks.
    Clear,
}

pub async fn cmd_tasks(action: TasksAction) -> Result<()> {
    let cfg = config::load_config(None)?;
    let ws = config::workspace_path(&cfg);
    let store = FileTaskStore::new(&config::task_store_path(&ws));

    match action {
        TasksAction::List => {
            let tasks = store.list_all()?;
            if tasks.is_empty() {
                println!("No pending one-time tasks.");
            } else {
                for t in tasks {
                    println!(
                        "[{}] {} | {} | {}",
                        t.id, t.execution_time, t.task_name, t.task_args
                    );
                }
            }
        }
        TasksAction::Clear => {
            let removed = store.clear()?;
            println!("✓ Removed {removed} pending task(s).");
        }
    }
    Ok(())
}
