//! Platform-facing tools: publishing, history, search, image generation and
//! the content plan file.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::platform::{ContentPlatform, ImageGenerator};
use crate::tools::drafts::load_draft;
use crate::tools::DynTool;

// ---------------------------------------------------------------------------
// publish_post
// ---------------------------------------------------------------------------

pub struct PublishPostTool {
    pub platform: Arc<dyn ContentPlatform>,
    pub drafts_dir: PathBuf,
}

#[async_trait::async_trait]
impl DynTool for PublishPostTool {
    fn name(&self) -> &str {
        "publish_post"
    }
    fn description(&self) -> &str {
        "Publish a saved draft to the content platform right now. For future publication use schedule_onetime_task with the 'publish' task instead."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "draft": { "type": "string", "description": "Draft id from save_draft / list_drafts" }
            },
            "required": ["draft"]
        })
    }
    async fn call(&self, args: Value) -> Result<String> {
        let draft = args["draft"].as_str().unwrap_or_default();
        let (text, image) = load_draft(&self.drafts_dir, draft)?;
        let post = self.platform.publish(&text, image.as_deref()).await?;
        Ok(format!("Published draft '{}' as {}", draft, post.url))
    }
}

// ---------------------------------------------------------------------------
// fetch_post_history
// ---------------------------------------------------------------------------

pub struct FetchPostHistoryTool {
    pub platform: Arc<dyn ContentPlatform>,
}

#[async_trait::async_trait]
impl DynTool for FetchPostHistoryTool {
    fn name(&self) -> &str {
        "fetch_post_history"
    }
    fn description(&self) -> &str {
        "Fetch recently published posts (newest first). Useful to avoid repeating topics when planning."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "description": "Max posts to return, default 10" }
            }
        })
    }
    async fn call(&self, args: Value) -> Result<String> {
        let limit = args["limit"].as_u64().unwrap_or(10) as usize;
        let posts = self.platform.recent_posts(limit).await?;
        if posts.is_empty() {
            return Ok("No published posts yet.".to_string());
        }
        let lines: Vec<String> = posts
            .iter()
            .map(|p| {
                let caption = p.caption.lines().next().unwrap_or_default();
                format!("{} | {} | {}", p.published_at.format("%Y-%m-%d"), p.url, caption)
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// search_posts
// ---------------------------------------------------------------------------

pub struct SearchPostsTool {
    pub platform: Arc<dyn ContentPlatform>,
}

#[async_trait::async_trait]
impl DynTool for SearchPostsTool {
    fn name(&self) -> &str {
        "search_posts"
    }
    fn description(&self) -> &str {
        "Search published posts by caption text."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" }
            },
            "required": ["query"]
        })
    }
    async fn call(&self, args: Value) -> Result<String> {
        let query = args["query"].as_str().unwrap_or_default();
        let posts = self.platform.search(query).await?;
        if posts.is_empty() {
            return Ok(format!("No posts matching '{}'.", query));
        }
        let lines: Vec<String> = posts
            .iter()
            .map(|p| format!("{} | {}", p.url, p.caption.lines().next().unwrap_or_default()))
            .collect();
        Ok(lines.join("\n"))
    }
}

// ---------------------------------------------------------------------------
// generate_image
// ---------------------------------------------------------------------------

pub struct GenerateImageTool {
    pub generator: Arc<dyn ImageGenerator>,
    pub drafts_dir: PathBuf,
}

#[async_trait::async_trait]
impl DynTool for GenerateImageTool {
    fn name(&self) -> &str {
        "generate_image"
    }
    fn description(&self) -> &str {
        "Generate an image from a prompt. With 'draft' set the image becomes that draft's post.png; otherwise it lands in a scratch file. Returns the image path."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "English image prompt" },
                "draft": { "type": "string", "description": "Optional draft id to attach the image to" }
            },
            "required": ["prompt"]
        })
    }
    async fn call(&self, args: Value) -> Result<String> {
        let prompt = args["prompt"].as_str().unwrap_or_default();
        let dest = match args["draft"].as_str().filter(|s| !s.is_empty()) {
            Some(draft) => {
                let dir = self.drafts_dir.join(draft);
                if !dir.join("post.txt").exists() {
                    anyhow::bail!("draft '{}' does not exist, save it first", draft);
                }
                dir.join("post.png")
            }
            None => self
                .drafts_dir
                .join("_generated")
                .join(format!("{}.png", uuid::Uuid::new_v4())),
        };
        self.generator.generate(prompt, &dest).await?;
        Ok(format!("Image written to {}", dest.display()))
    }
}

// ---------------------------------------------------------------------------
// write_content_plan
// ---------------------------------------------------------------------------

/// Rewrite the content plan the system prompt is assembled from.
pub struct WriteContentPlanTool {
    pub plan_path: PathBuf,
}

#[async_trait::async_trait]
impl DynTool for WriteContentPlanTool {
    fn name(&self) -> &str {
        "write_content_plan"
    }
    fn description(&self) -> &str {
        "Replace content_plan.md with new markdown content (the plan for upcoming posts)."
    }
    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string" }
            },
            "required": ["content"]
        })
    }
    async fn call(&self, args: Value) -> Result<String> {
        let content = args["content"].as_str().unwrap_or_default();
        if content.trim().is_empty() {
            anyhow::bail!("content plan must not be empty");
        }
        if let Some(parent) = self.plan_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.plan_path.with_extension("md.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.plan_path)?;
        Ok(format!("Content plan updated ({} bytes).", content.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::LocalArchivePlatform;
    use tempfile::TempDir;

    fn draft(dir: &TempDir, id: &str, text: &str) {
        let d = dir.path().join("drafts").join(id);
        std::fs::create_dir_all(&d).unwrap();
        std::fs::write(d.join("post.txt"), text).unwrap();
    }

    #[tokio::test]
    async fn publish_post_reads_draft_and_publishes() {
        let dir = TempDir::new().unwrap();
        draft(&dir, "d1", "restored memories");
        let platform = Arc::new(LocalArchivePlatform::new(&dir.path().join("archive")));

        let tool = PublishPostTool {
            platform: Arc::clone(&platform) as Arc<dyn ContentPlatform>,
            drafts_dir: dir.path().join("drafts"),
        };
        let out = tool.call(json!({"draft": "d1"})).await.unwrap();
        assert!(out.contains("Published draft 'd1'"));

        let recent = platform.recent_posts(1).await.unwrap();
        assert_eq!(recent[0].caption, "restored memories");
    }

    #[tokio::test]
    async fn publish_post_missing_draft_errors() {
        let dir = TempDir::new().unwrap();
        let platform = Arc::new(LocalArchivePlatform::new(&dir.path().join("archive")));
        let tool = PublishPostTool {
            platform,
            drafts_dir: dir.path().join("drafts"),
        };
        assert!(tool.call(json!({"draft": "ghost"})).await.is_err());
    }

    #[tokio::test]
    async fn history_and_search_format_results() {
        let dir = TempDir::new().unwrap();
        let platform: Arc<dyn ContentPlatform> =
            Arc::new(LocalArchivePlatform::new(&dir.path().join("archive")));
        platform.publish("film grain forever", None).await.unwrap();

        let history = FetchPostHistoryTool {
            platform: Arc::clone(&platform),
        };
        let out = history.call(json!({})).await.unwrap();
        assert!(out.contains("film grain forever"));

        let search = SearchPostsTool {
            platform: Arc::clone(&platform),
        };
        let out = search.call(json!({"query": "grain"})).await.unwrap();
        assert!(out.contains("film grain forever"));
        let out = search.call(json!({"query": "nothing"})).await.unwrap();
        assert!(out.contains("No posts matching"));
    }

    #[tokio::test]
    async fn generate_image_requires_existing_draft() {
        let dir = TempDir::new().unwrap();
        let tool = GenerateImageTool {
            generator: Arc::new(crate::platform::DisabledImageGenerator),
            drafts_dir: dir.path().join("drafts"),
        };
        let err = tool
            .call(json!({"prompt": "a photo", "draft": "ghost"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn write_content_plan_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content_plan.md");
        let tool = WriteContentPlanTool {
            plan_path: path.clone(),
        };
        tool.call(json!({"content": "# Plan\n- Monday: memories"}))
            .await
            .unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("Monday"));

        assert!(tool.call(json!({"content": "  "})).await.is_err());
    }
}
