//! Content-platform and image-generation collaborator seams.
//!
//! The core never talks to a publishing platform directly — everything goes
//! through `ContentPlatform`, consumed only by task and tool handlers. The
//! default implementation records published posts into a local archive; a
//! real network client slots in behind the same trait.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedPost {
    pub id: String,
    pub caption: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
}

#[async_trait]
pub trait ContentPlatform: Send + Sync {
    /// Publish a post; returns the created post record.
    async fn publish(&self, text: &str, image: Option<&Path>) -> Result<PublishedPost>;
    /// Most recent posts, newest first.
    async fn recent_posts(&self, limit: usize) -> Result<Vec<PublishedPost>>;
    /// Case-insensitive caption search.
    async fn search(&self, query: &str) -> Result<Vec<PublishedPost>>;
}

// ---------------------------------------------------------------------------
// Local archive platform
// ---------------------------------------------------------------------------

/// File-backed platform: each published post becomes a directory under the
/// archive root with `post.json` (+ copied image). Doubles as the publish
/// history the agent consults when planning.
pub struct LocalArchivePlatform {
    root: PathBuf,
}

impl LocalArchivePlatform {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn load_all(&self) -> Result<Vec<PublishedPost>> {
        let mut posts = Vec::new();
        if !self.root.exists() {
            return Ok(posts);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path().join("post.json");
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            match serde_json::from_str::<PublishedPost>(&text) {
                Ok(post) => posts.push(post),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping corrupt archive entry"),
            }
        }
        posts.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(posts)
    }
}

#[async_trait]
impl ContentPlatform for LocalArchivePlatform {
    async fn publish(&self, text: &str, image: Option<&Path>) -> Result<PublishedPost> {
        let id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        let dir = self.root.join(&id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating archive dir {}", dir.display()))?;

        let post = PublishedPost {
            id: id.clone(),
            caption: text.to_string(),
            url: format!("archive://{}", id),
            published_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&post)?;
        std::fs::write(dir.join("post.json"), json)?;
        if let Some(img) = image {
            std::fs::copy(img, dir.join("post.png"))
                .with_context(|| format!("copying image {}", img.display()))?;
        }
        info!(post_id = %id, "Post archived");
        Ok(post)
    }

    async fn recent_posts(&self, limit: usize) -> Result<Vec<PublishedPost>> {
        let mut posts = self.load_all()?;
        posts.truncate(limit);
        Ok(posts)
    }

    async fn search(&self, query: &str) -> Result<Vec<PublishedPost>> {
        let needle = query.to_lowercase();
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|p| p.caption.to_lowercase().contains(&needle))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Image generation
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Generate an image for the prompt and write it to `dest` as PNG.
    async fn generate(&self, prompt: &str, dest: &Path) -> Result<()>;
}

/// OpenAI images API implementation (`/v1/images/generations`).
pub struct OpenAiImageGenerator {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    b64_json: String,
}

impl OpenAiImageGenerator {
    pub fn new(api_key: &str, api_base: Option<&str>, size: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            api_base: api_base
                .filter(|b| !b.is_empty())
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            size: size.to_string(),
        }
    }
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    async fn generate(&self, prompt: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/images/generations", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": "gpt-image-1",
                "prompt": prompt,
                "size": self.size,
                "n": 1,
            }))
            .send()
            .await
            .context("image generation request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("image generation failed: HTTP {status}: {body}");
        }

        let parsed: ImageResponse = response
            .json()
            .await
            .context("parsing image generation response")?;
        let datum = parsed
            .data
            .first()
            .context("image generation returned no data")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&datum.b64_json)
            .context("decoding image payload")?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, bytes)
            .with_context(|| format!("writing image to {}", dest.display()))?;
        info!(path = %dest.display(), "Image generated");
        Ok(())
    }
}

/// Placeholder used when no image provider is configured. Keeps the tool
/// registered so the model gets a clear failure instead of a missing tool.
pub struct DisabledImageGenerator;

#[async_trait]
impl ImageGenerator for DisabledImageGenerator {
    async fn generate(&self, _prompt: &str, _dest: &Path) -> Result<()> {
        anyhow::bail!("image generation is not configured (set tools.image.enabled and an OpenAI key)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn publish_and_list_roundtrip() {
        let dir = TempDir::new().unwrap();
        let platform = LocalArchivePlatform::new(dir.path());

        let first = platform.publish("old films, new life", None).await.unwrap();
        let second = platform.publish("restoration day", None).await.unwrap();
        assert_ne!(first.id, second.id);

        let recent = platform.recent_posts(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        // Newest first.
        assert_eq!(recent[0].id, second.id);
    }

    #[tokio::test]
    async fn recent_posts_respects_limit() {
        let dir = TempDir::new().unwrap();
        let platform = LocalArchivePlatform::new(dir.path());
        for i in 0..5 {
            platform.publish(&format!("post {i}"), None).await.unwrap();
        }
        let recent = platform.recent_posts(2).await.unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn search_matches_case_insensitively() {
        let dir = TempDir::new().unwrap();
        let platform = LocalArchivePlatform::new(dir.path());
        platform.publish("Vintage Photo Restoration", None).await.unwrap();
        platform.publish("something else", None).await.unwrap();

        let hits = platform.search("vintage").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].caption.contains("Vintage"));
    }

    #[tokio::test]
    async fn publish_copies_image_into_archive() {
        let dir = TempDir::new().unwrap();
        let img = dir.path().join("img.png");
        std::fs::write(&img, b"png-bytes").unwrap();

        let platform = LocalArchivePlatform::new(&dir.path().join("archive"));
        let post = platform.publish("with image", Some(&img)).await.unwrap();

        let copied = dir.path().join("archive").join(&post.id).join("post.png");
        assert!(copied.exists());
    }

    #[tokio::test]
    async fn disabled_generator_reports_error() {
        let dir = TempDir::new().unwrap();
        let err = DisabledImageGenerator
            .generate("a cat", &dir.path().join("out.png"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn empty_archive_lists_nothing() {
        let dir = TempDir::new().unwrap();
        let platform = LocalArchivePlatform::new(&dir.path().join("missing"));
        assert!(platform.recent_posts(5).await.unwrap().is_empty());
        assert!(platform.search("x").await.unwrap().is_empty());
    }
}
