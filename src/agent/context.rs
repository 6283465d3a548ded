//! Conversation context and system-prompt assembly.

use anyhow::{Context, Result};
use chrono::Local;
use rig::message::Message;
use std::path::{Path, PathBuf};

use crate::config::{content_plan_path, content_rules_path};

/// Ordered message history plus continuation state, owned by exactly one
/// logical session (one chat, or one scheduled run) at a time.
#[derive(Debug, Default)]
pub struct ConversationContext {
    pub messages: Vec<Message>,
    /// How many times the current turn has continued autonomously.
    pub continuation_depth: u32,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            continuation_depth: 0,
        }
    }
}

/// The model must answer with this JSON shape so the loop can decide
/// between terminating and continuing autonomously.
pub const REPLY_CONTRACT: &str = "## Response format\n\
Always answer with a single JSON object:\n\
{\"text_response\": \"<message for the user>\", \"can_continue\": <bool>}\n\
Set can_continue to true only when you have more autonomous work to do in\n\
this run (the conversation continues without new user input). No prose\n\
outside the JSON object.";

/// Assembles the system prompt from the workspace's content configuration.
pub struct PromptBuilder {
    workspace: PathBuf,
}

impl PromptBuilder {
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
        }
    }

    /// Build the full system prompt. The content rules file is required
    /// startup configuration: without it the session cannot run.
    pub fn build_system_prompt(&self) -> Result<String> {
        let rules_path = content_rules_path(&self.workspace);
        let rules = std::fs::read_to_string(&rules_path).with_context(|| {
            format!(
                "missing content rules at {} (run `postpilot onboard`)",
                rules_path.display()
            )
        })?;

        let mut parts = vec![self.identity_section(), rules];

        let plan_path = content_plan_path(&self.workspace);
        if let Ok(plan) = std::fs::read_to_string(&plan_path) {
            if !plan.trim().is_empty() {
                parts.push(format!("# Current content plan\n\n{}", plan));
            }
        }

        parts.push(REPLY_CONTRACT.to_string());
        Ok(parts.join("\n\n---\n\n"))
    }

    fn identity_section(&self) -> String {
        let now = Local::now().format("%Y-%m-%d %H:%M (%A)");
        let ws = self.workspace.display();
        format!(
            "# postpilot\n\n\
             You are postpilot, the publishing assistant for this account. You plan posts,\n\
             prepare drafts, and schedule or publish them with your tools.\n\n\
             ## Current Time\n{now}\n\n\
             ## Workspace\n{ws}\n"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_rules_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        let err = PromptBuilder::new(dir.path())
            .build_system_prompt()
            .unwrap_err();
        assert!(err.to_string().contains("content rules"));
    }

    #[test]
    fn prompt_includes_rules_plan_and_contract() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("content_rules.md"), "# Rules\nBe kind.").unwrap();
        std::fs::write(dir.path().join("content_plan.md"), "# Plan\nMemories week.").unwrap();

        let prompt = PromptBuilder::new(dir.path()).build_system_prompt().unwrap();
        assert!(prompt.contains("Be kind."));
        assert!(prompt.contains("Memories week."));
        assert!(prompt.contains("text_response"));
    }

    #[test]
    fn empty_plan_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("content_rules.md"), "rules").unwrap();
        std::fs::write(dir.path().join("content_plan.md"), "  \n").unwrap();

        let prompt = PromptBuilder::new(dir.path()).build_system_prompt().unwrap();
        assert!(!prompt.contains("Current content plan"));
    }
}
