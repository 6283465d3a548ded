//! Built-in tasks: publishing drafts, scheduler-triggered agent runs, and
//! the weekly planning kickoff.

use anyhow::Result;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use crate::bus::{InboundMessage, OutboundMessage};
use crate::platform::ContentPlatform;
use crate::scheduler::TaskStore;
use crate::tasks::{TaskHandler, TaskOutcome};
use crate::tools::drafts::{draft_exists, load_draft};

/// `"once": true` in task_args turns a recurring firing into a one-shot:
/// the handler asks the scheduler to drop the job after this run.
fn once_requested(args: &Value) -> bool {
    args.get("once").and_then(|v| v.as_bool()).unwrap_or(false)
}

// ---------------------------------------------------------------------------
// publish
// ---------------------------------------------------------------------------

/// Publish a saved draft. Validation checks the draft still exists, so a
/// stale record (draft deleted after scheduling) is dropped instead of
/// failing forever.
pub struct PublishTask {
    pub platform: Arc<dyn ContentPlatform>,
    pub drafts_dir: PathBuf,
    pub outbound_tx: broadcast::Sender<OutboundMessage>,
    /// Where to announce published posts; empty chat id disables announcements.
    pub notify_channel: String,
    pub notify_chat_id: String,
}

#[async_trait::async_trait]
impl TaskHandler for PublishTask {
    fn name(&self) -> &str {
        "publish"
    }

    fn validate(&self, args: &Value) -> bool {
        match args.get("id").and_then(|v| v.as_str()) {
            Some(id) => draft_exists(&self.drafts_dir, id),
            None => false,
        }
    }

    async fn run(&self, args: Value) -> Result<TaskOutcome> {
        let id = args
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("publish requires an 'id' argument"))?;
        let (text, image) = load_draft(&self.drafts_dir, id)?;
        let post = self.platform.publish(&text, image.as_deref()).await?;
        info!(draft = %id, url = %post.url, "Draft published");

        if !self.notify_chat_id.is_empty() {
            let _ = self.outbound_tx.send(OutboundMessage::chat(
                self.notify_channel.clone(),
                self.notify_chat_id.clone(),
                format!("Published draft '{}': {}", id, post.url),
                vec![],
            ));
        }
        if once_requested(&args) {
            return Ok(TaskOutcome::Cancel);
        }
        Ok(TaskOutcome::Completed)
    }
}

// ---------------------------------------------------------------------------
// agent_turn
// ---------------------------------------------------------------------------

/// Bridge from the scheduler into the agent loop: fires a prompt as a
/// synthetic inbound message, giving scheduled runs their own session.
pub struct AgentTurnTask {
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    /// Chat the agent's replies are routed to for scheduled runs.
    pub reply_chat_id: String,
}

#[async_trait::async_trait]
impl TaskHandler for AgentTurnTask {
    fn name(&self) -> &str {
        "agent_turn"
    }

    fn validate(&self, args: &Value) -> bool {
        args.get("prompt")
            .and_then(|v| v.as_str())
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false)
    }

    async fn run(&self, args: Value) -> Result<TaskOutcome> {
        let prompt = args
            .get("prompt")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("agent_turn requires a non-empty 'prompt'"))?;
        let chat_id = args
            .get("chat_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.reply_chat_id);
        self.inbound_tx
            .send(InboundMessage::from_scheduler(chat_id, prompt.to_string()))
            .await
            .map_err(|_| anyhow::anyhow!("agent loop is not running"))?;
        if once_requested(&args) {
            return Ok(TaskOutcome::Cancel);
        }
        Ok(TaskOutcome::Completed)
    }
}

// ---------------------------------------------------------------------------
// weekly_planning
// ---------------------------------------------------------------------------

const PLANNING_PROMPT: &str = "Weekly planning run. Review recent posts with fetch_post_history, \
update content_plan.md via write_content_plan with post ideas for the coming week, save a draft \
per idea, and schedule each one with the 'publish' task via schedule_onetime_task (Monday, \
Wednesday and Friday slots at 18:00, 19:00 or 20:00 local time, next week not this one).";

/// Starts a fresh week: clears leftover one-time tasks and kicks off a
/// planning session through the agent.
pub struct WeeklyPlanningTask {
    pub store: Arc<dyn TaskStore>,
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub reply_chat_id: String,
}

#[async_trait::async_trait]
impl TaskHandler for WeeklyPlanningTask {
    fn name(&self) -> &str {
        "weekly_planning"
    }

    async fn run(&self, _args: Value) -> Result<TaskOutcome> {
        let removed = self.store.clear()?;
        info!(removed, "Cleared leftover one-time tasks for the new week");
        self.inbound_tx
            .send(InboundMessage::from_scheduler(
                &self.reply_chat_id,
                PLANNING_PROMPT.to_string(),
            ))
            .await
            .map_err(|_| anyhow::anyhow!("agent loop is not running"))?;
        Ok(TaskOutcome::Completed)
    }
}
