//! Session persistence — conversation history surviving restarts.
//!
//! One JSON file per session key under the workspace `sessions/` directory,
//! written atomically (tmp file, then rename). Only text-bearing messages
//! are persisted; tool-call plumbing is transient turn state and is not
//! useful after a restart.

use anyhow::{Context, Result};
use rig::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::agent::context::ConversationContext;

/// Serializable form of a chat message. `rig::message::Message` does not
/// round-trip through serde, so history is flattened to role + text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionMessage {
    pub role: String,
    pub content: String,
}

impl SessionMessage {
    pub fn from_message(msg: &Message) -> Self {
        match msg {
            Message::User { content } => {
                let text = content
                    .iter()
                    .filter_map(|c| {
                        if let rig::message::UserContent::Text(t) = c {
                            Some(t.text.as_str())
                        } else {
                            None
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("");
                SessionMessage {
                    role: "user".to_string(),
                    content: text,
                }
            }
            Message::Assistant { content } => {
                let text = content
                    .iter()
                    .filter_map(|c| {
                        if let rig::message::AssistantContent::Text(t) = c {
                            Some(t.text.as_str())
                        } else {
                            None
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("");
                SessionMessage {
                    role: "assistant".to_string(),
                    content: text,
                }
            }
        }
    }

    pub fn to_message(&self) -> Message {
        match self.role.as_str() {
            "assistant" => Message::assistant(&self.content),
            _ => Message::user(&self.content),
        }
    }
}

/// File-backed store for conversation contexts, one file per session key.
pub struct SessionStore {
    session_dir: PathBuf,
}

impl SessionStore {
    pub fn new(session_dir: &Path) -> Self {
        Self {
            session_dir: session_dir.to_path_buf(),
        }
    }

    /// Session keys contain `:`; keep filenames portable.
    fn safe_filename(key: &str) -> String {
        key.replace(':', "_")
    }

    fn session_path(&self, key: &str) -> PathBuf {
        self.session_dir
            .join(format!("{}.json", Self::safe_filename(key)))
    }

    fn tmp_path(&self, key: &str) -> PathBuf {
        self.session_dir
            .join(format!("{}.json.tmp", Self::safe_filename(key)))
    }

    /// Persist one session atomically: a crash mid-write never leaves a
    /// corrupt file. Tool-plumbing messages (empty after flattening) are
    /// skipped.
    pub async fn save(&self, key: &str, context: &ConversationContext) -> Result<()> {
        fs::create_dir_all(&self.session_dir)
            .await
            .context("creating sessions directory")?;

        let messages: Vec<SessionMessage> = context
            .messages
            .iter()
            .map(SessionMessage::from_message)
            .filter(|m| !m.content.is_empty())
            .collect();
        let json = serde_json::to_string_pretty(&messages).context("serializing session")?;

        let tmp = self.tmp_path(key);
        let target = self.session_path(key);
        fs::write(&tmp, &json)
            .await
            .context("writing tmp session file")?;
        fs::rename(&tmp, &target)
            .await
            .context("renaming tmp session file")?;
        debug!(session_key = %key, "Session saved");
        Ok(())
    }

    /// `Ok(None)` when no session exists for the key.
    pub async fn load(&self, key: &str) -> Result<Option<ConversationContext>> {
        let path = self.session_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)
            .await
            .context("reading session file")?;
        let messages: Vec<SessionMessage> =
            serde_json::from_str(&data).context("deserializing session")?;
        Ok(Some(ConversationContext::with_messages(
            messages.iter().map(SessionMessage::to_message).collect(),
        )))
    }

    /// Load every persisted session; corrupt files are skipped with a
    /// warning rather than blocking startup.
    pub async fn load_all(&self) -> Result<HashMap<String, ConversationContext>> {
        let mut sessions = HashMap::new();
        if !self.session_dir.exists() {
            return Ok(sessions);
        }

        let mut entries = fs::read_dir(&self.session_dir)
            .await
            .context("reading sessions directory")?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_dir() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            let key = stem.replacen('_', ":", 1);

            match fs::read_to_string(&path).await {
                Ok(data) => match serde_json::from_str::<Vec<SessionMessage>>(&data) {
                    Ok(msgs) => {
                        sessions.insert(
                            key,
                            ConversationContext::with_messages(
                                msgs.iter().map(SessionMessage::to_message).collect(),
                            ),
                        );
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping corrupt session file")
                    }
                },
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to read session file"),
            }
        }
        Ok(sessions)
    }

    /// Delete a persisted session. Returns whether a file existed.
    pub async fn reset(&self, key: &str) -> Result<bool> {
        let path = self.session_path(key);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .await
            .with_context(|| format!("removing {}", path.display()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rig::message::{ToolResultContent, UserContent};
    use rig::OneOrMany;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, SessionStore) {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(&dir.path().join("sessions"));
        (dir, store)
    }

    fn ctx(messages: Vec<Message>) -> ConversationContext {
        ConversationContext::with_messages(messages)
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let (_dir, store) = temp_store();
        let context = ctx(vec![
            Message::user("plan next week"),
            Message::assistant("{\"text_response\": \"done\", \"can_continue\": false}"),
        ]);
        store.save("telegram:42", &context).await.unwrap();

        let loaded = store.load("telegram:42").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.continuation_depth, 0);

        let roles: Vec<SessionMessage> = loaded
            .messages
            .iter()
            .map(SessionMessage::from_message)
            .collect();
        assert_eq!(roles[0].role, "user");
        assert_eq!(roles[1].role, "assistant");
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let (_dir, store) = temp_store();
        assert!(store.load("no:such").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tool_plumbing_is_not_persisted() {
        let (_dir, store) = temp_store();
        let tool_result = Message::User {
            content: OneOrMany::one(UserContent::tool_result(
                "call-1",
                OneOrMany::one(ToolResultContent::text("raw tool output")),
            )),
        };
        let context = ctx(vec![
            Message::user("publish it"),
            tool_result,
            Message::assistant("published"),
        ]);
        store.save("telegram:42", &context).await.unwrap();

        let loaded = store.load("telegram:42").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
    }

    #[tokio::test]
    async fn load_all_restores_every_session() {
        let (_dir, store) = temp_store();
        store
            .save("telegram:1", &ctx(vec![Message::user("a")]))
            .await
            .unwrap();
        store
            .save("scheduler:owner", &ctx(vec![Message::user("b")]))
            .await
            .unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.contains_key("telegram:1"));
        assert!(all.contains_key("scheduler:owner"));
    }

    #[tokio::test]
    async fn load_all_skips_corrupt_files() {
        let (_dir, store) = temp_store();
        store
            .save("telegram:1", &ctx(vec![Message::user("fine")]))
            .await
            .unwrap();
        std::fs::write(store.session_dir.join("telegram_2.json"), "not json").unwrap();

        let all = store.load_all().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn reset_deletes_the_session() {
        let (_dir, store) = temp_store();
        store
            .save("telegram:1", &ctx(vec![Message::user("x")]))
            .await
            .unwrap();
        assert!(store.reset("telegram:1").await.unwrap());
        assert!(!store.reset("telegram:1").await.unwrap());
        assert!(store.load("telegram:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_leaves_no_tmp_behind() {
        let (_dir, store) = temp_store();
        store
            .save("key:1", &ctx(vec![Message::user("t")]))
            .await
            .unwrap();
        assert!(!store.tmp_path("key:1").exists());
        assert!(store.session_path("key:1").exists());
    }
}
