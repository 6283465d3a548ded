//! Draft tools — prepared posts waiting for publication.
//!
//! A draft is a directory under `drafts/` holding `post.txt` and optionally
//! `post.png`. Drafts are the handoff point between the agent (which writes
//! them) and the scheduler's publish task (which consumes them later).

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

use crate::bus::OutboundMessage;
use crate::tools::DynTool;

/// Read a draft's text and optional image path. Errors if the draft does
/// not exist — callers surface that to the model / scheduler log.
pub fn load_draft(drafts_dir: &Path, id: &str) -> Result<(String, Option<PathBuf>)> {
    let dir = drafts_dir.join(id);
    let text_path = dir.join("post.txt");
    let text = std::fs::read_to_string(&text_path)
        .with_context(|| format!("draft '{}' not found at {}", id, text_path.display()))?;
    let image = dir.join("post.png");
    let image = image.exists().then_some(image);
    Ok((text, image))
}

pub fn draft_exists(drafts_dir: &Path, id: &str) -> bool {
    drafts_dir.join(id).join("post.txt").exists()
}

// ---------------------------------------------------------------------------
// save_draft
// ---------------------------------------------------------------------------

pub struct SaveDraftTool {
    pub drafts_dir: PathBuf,
}

#[async_trait::async_trait]
impl DynTool for SaveDraftTool {
    fn name(&self) -> &str {
        "save_draft"
    }
    fn description(&self) -> &str {
        "Save post text as a draft for later publication. Returns the draft id to use with publish_post or a scheduled 'publish' task."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Full, ready-to-publish post text" },
                "slug": { "type": "string", "description": "Optional draft id; defaults to a timestamp" }
            },
            "required": ["text"]
        })
    }
    async fn call(&self, args: Value) -> Result<String> {
        let text = args["text"].as_str().unwrap_or_default();
        if text.trim().is_empty() {
            anyhow::bail!("draft text must not be empty");
        }
        let id = match args["slug"].as_str().filter(|s| !s.is_empty()) {
            Some(slug) => slug.to_string(),
            None => chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string(),
        };
        if id.contains('/') || id.contains("..") {
            anyhow::bail!("draft id must be a plain name");
        }
        let dir = self.drafts_dir.join(&id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating draft dir {}", dir.display()))?;
        std::fs::write(dir.join("post.txt"), text)?;
        Ok(format!("Draft saved as '{}'", id))
    }
}

// ---------------------------------------------------------------------------
// list_drafts
// ---------------------------------------------------------------------------

pub struct ListDraftsTool {
    pub drafts_dir: PathBuf,
}

#[async_trait::async_trait]
impl DynTool for ListDraftsTool {
    fn name(&self) -> &str {
        "list_drafts"
    }
    fn description(&self) -> &str {
        "List saved drafts with a first-line preview and whether each has an image."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }
    async fn call(&self, _args: Value) -> Result<String> {
        if !self.drafts_dir.exists() {
            return Ok("No drafts.".to_string());
        }
        let mut names: Vec<String> = std::fs::read_dir(&self.drafts_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().join("post.txt").exists())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        if names.is_empty() {
            return Ok("No drafts.".to_string());
        }
        let mut lines = Vec::with_capacity(names.len());
        for name in names {
            let (text, image) = load_draft(&self.drafts_dir, &name)?;
            let preview = text.lines().next().unwrap_or_default();
            let preview = if preview.chars().count() > 60 {
                format!("{}...", preview.chars().take(60).collect::<String>())
            } else {
                preview.to_string()
            };
            lines.push(format!(
                "{} [{}] {}",
                name,
                if image.is_some() { "image" } else { "text only" },
                preview
            ));
        }
        Ok(format!("Drafts ({}):\n{}", lines.len(), lines.join("\n")))
    }
}

// ---------------------------------------------------------------------------
// send_photo
// ---------------------------------------------------------------------------

/// Deliver an image to the chat (e.g. a draft preview before approval).
pub struct SendPhotoTool {
    pub outbound_tx: broadcast::Sender<OutboundMessage>,
    pub default_channel: String,
    pub default_chat_id: String,
}

#[async_trait::async_trait]
impl DynTool for SendPhotoTool {
    fn name(&self) -> &str {
        "send_photo"
    }
    fn description(&self) -> &str {
        "Send an image file to the user on the chat channel, with an optional caption."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Local path of the image" },
                "caption": { "type": "string" }
            },
            "required": ["path"]
        })
    }
    async fn call(&self, args: Value) -> Result<String> {
        let path = args["path"].as_str().unwrap_or_default();
        if !Path::new(path).exists() {
            anyhow::bail!("image '{}' does not exist", path);
        }
        let caption = args["caption"].as_str().unwrap_or_default().to_string();
        let msg = OutboundMessage::chat(
            self.default_channel.clone(),
            self.default_chat_id.clone(),
            caption,
            vec![path.to_string()],
        );
        let _ = self.outbound_tx.send(msg);
        Ok("Photo sent.".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let tool = SaveDraftTool {
            drafts_dir: dir.path().to_path_buf(),
        };
        let out = tool
            .call(json!({"text": "hello feed", "slug": "d1"}))
            .await
            .unwrap();
        assert!(out.contains("'d1'"));

        let (text, image) = load_draft(dir.path(), "d1").unwrap();
        assert_eq!(text, "hello feed");
        assert!(image.is_none());
        assert!(draft_exists(dir.path(), "d1"));
    }

    #[tokio::test]
    async fn save_rejects_empty_and_traversal_ids() {
        let dir = TempDir::new().unwrap();
        let tool = SaveDraftTool {
            drafts_dir: dir.path().to_path_buf(),
        };
        assert!(tool.call(json!({"text": "  "})).await.is_err());
        assert!(tool
            .call(json!({"text": "x", "slug": "../escape"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn list_reports_drafts_with_image_flag() {
        let dir = TempDir::new().unwrap();
        let save = SaveDraftTool {
            drafts_dir: dir.path().to_path_buf(),
        };
        save.call(json!({"text": "first line\nmore", "slug": "a"}))
            .await
            .unwrap();
        std::fs::write(dir.path().join("a").join("post.png"), b"png").unwrap();

        let list = ListDraftsTool {
            drafts_dir: dir.path().to_path_buf(),
        };
        let out = list.call(json!({})).await.unwrap();
        assert!(out.contains("a [image] first line"));
    }

    #[tokio::test]
    async fn list_empty_dir_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let list = ListDraftsTool {
            drafts_dir: dir.path().join("missing"),
        };
        assert_eq!(list.call(json!({})).await.unwrap(), "No drafts.");
    }

    #[tokio::test]
    async fn send_photo_emits_media_message() {
        let dir = TempDir::new().unwrap();
        let img = dir.path().join("p.png");
        std::fs::write(&img, b"png").unwrap();

        let (tx, mut rx) = broadcast::channel(8);
        let tool = SendPhotoTool {
            outbound_tx: tx,
            default_channel: "telegram".into(),
            default_chat_id: "42".into(),
        };
        tool.call(json!({"path": img.to_str().unwrap(), "caption": "preview"}))
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        match msg.message_type {
            crate::bus::OutboundMessageType::Chat { content, media } => {
                assert_eq!(content, "preview");
                assert_eq!(media.len(), 1);
            }
            _ => panic!("expected chat message"),
        }
    }

    #[tokio::test]
    async fn send_photo_missing_file_errors() {
        let (tx, _rx) = broadcast::channel(8);
        let tool = SendPhotoTool {
            outbound_tx: tx,
            default_channel: "telegram".into(),
            default_chat_id: "42".into(),
        };
        assert!(tool.call(json!({"path": "/nope.png"})).await.is_err());
    }
}
