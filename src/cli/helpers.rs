//! Shared CLI helpers: provider resolution and registry wiring.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::backend::{build_backend, CompletionBackend};
use crate::bus::{InboundMessage, OutboundMessage};
use crate::config::{self, Config};
use crate::platform::{
    ContentPlatform, DisabledImageGenerator, ImageGenerator, LocalArchivePlatform,
    OpenAiImageGenerator,
};
use crate::scheduler::TaskStore;
use crate::tasks::publish::{AgentTurnTask, PublishTask, WeeklyPlanningTask};
use crate::tasks::TaskRegistry;
use crate::tools::drafts::{ListDraftsTool, SaveDraftTool, SendPhotoTool};
use crate::tools::platform_tools::{
    FetchPostHistoryTool, GenerateImageTool, PublishPostTool, SearchPostsTool, WriteContentPlanTool,
};
use crate::tools::schedule::{
    CancelScheduledTaskTool, ListScheduledTasksTool, ReloadSchedulesTool, SchedulerHandle,
    ScheduleOnetimeTaskTool, WriteGeneratedSchedulesTool,
};
use crate::tools::ToolRegistry;

/// API key and optional base URL for the configured provider.
pub fn resolve_provider(cfg: &Config, provider_name: &str) -> (String, Option<String>) {
    let lower = provider_name.to_lowercase();
    let entry = if lower.contains("anthropic") || lower.contains("claude") {
        &cfg.providers.anthropic
    } else if lower.contains("openrouter") {
        &cfg.providers.openrouter
    } else {
        &cfg.providers.openai
    };
    (entry.api_key.clone(), entry.api_base.clone())
}

pub fn build_backend_from_config(
    cfg: &Config,
    provider_override: Option<&str>,
    model_override: Option<&str>,
) -> Result<Arc<dyn CompletionBackend>> {
    let provider = provider_override.unwrap_or(&cfg.agent.provider);
    let model = model_override.unwrap_or(&cfg.agent.model);
    let (api_key, api_base) = resolve_provider(cfg, provider);
    if api_key.is_empty() {
        anyhow::bail!(
            "No API key configured for provider '{}'. Run `postpilot onboard` and edit {}",
            provider,
            config::config_path().display()
        );
    }
    build_backend(provider, model, &api_key, api_base.as_deref())
}

/// Create the workspace directory skeleton (idempotent).
pub fn ensure_workspace_dirs(ws: &Path) -> Result<()> {
    for dir in [
        config::drafts_dir(ws),
        config::archive_dir(ws),
        config::sessions_dir(ws),
        ws.join("schedules"),
        ws.join("data"),
    ] {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(())
}

pub fn build_image_generator(cfg: &Config) -> Arc<dyn ImageGenerator> {
    let image_cfg = &cfg.tools.image;
    let key = &cfg.providers.openai.api_key;
    if image_cfg.enabled && !key.is_empty() {
        Arc::new(OpenAiImageGenerator::new(
            key,
            cfg.providers.openai.api_base.as_deref(),
            &image_cfg.size,
        ))
    } else {
        Arc::new(DisabledImageGenerator)
    }
}

/// The registered tasks shared by the scheduler and the agent's scheduling
/// tools. Replies from scheduled runs route to the owner chat.
pub fn build_task_registry(
    cfg: &Config,
    ws: &Path,
    platform: Arc<dyn ContentPlatform>,
    store: Arc<dyn TaskStore>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    outbound_tx: broadcast::Sender<OutboundMessage>,
) -> Result<TaskRegistry> {
    let owner_chat = cfg.channels.telegram.owner_chat_id.clone();
    let mut registry = TaskRegistry::new();
    registry.register(Arc::new(PublishTask {
        platform,
        drafts_dir: config::drafts_dir(ws),
        outbound_tx,
        notify_channel: "telegram".to_string(),
        notify_chat_id: owner_chat.clone(),
    }))?;
    registry.register(Arc::new(AgentTurnTask {
        inbound_tx: inbound_tx.clone(),
        reply_chat_id: owner_chat.clone(),
    }))?;
    registry.register(Arc::new(WeeklyPlanningTask {
        store: Arc::clone(&store),
        inbound_tx,
        reply_chat_id: owner_chat,
    }))?;
    Ok(registry)
}

/// All agent tools. `scheduler` is present in daemon mode, where schedule
/// edits can be materialized live; without it the write tool only persists.
#[allow(clippy::too_many_arguments)]
pub fn build_tool_registry(
    cfg: &Config,
    ws: &Path,
    platform: Arc<dyn ContentPlatform>,
    store: Arc<dyn TaskStore>,
    task_registry: Arc<TaskRegistry>,
    scheduler: Option<SchedulerHandle>,
    outbound_tx: broadcast::Sender<OutboundMessage>,
    default_channel: &str,
    default_chat_id: &str,
) -> Result<ToolRegistry> {
    let drafts_dir = config::drafts_dir(ws);
    let mut tools = ToolRegistry::new();

    tools.register(Arc::new(SaveDraftTool {
        drafts_dir: drafts_dir.clone(),
    }))?;
    tools.register(Arc::new(ListDraftsTool {
        drafts_dir: drafts_dir.clone(),
    }))?;
    tools.register(Arc::new(SendPhotoTool {
        outbound_tx,
        default_channel: default_channel.to_string(),
        default_chat_id: default_chat_id.to_string(),
    }))?;

    tools.register(Arc::new(PublishPostTool {
        platform: Arc::clone(&platform),
        drafts_dir: drafts_dir.clone(),
    }))?;
    tools.register(Arc::new(FetchPostHistoryTool {
        platform: Arc::clone(&platform),
    }))?;
    tools.register(Arc::new(SearchPostsTool { platform }))?;
    tools.register(Arc::new(GenerateImageTool {
        generator: build_image_generator(cfg),
        drafts_dir,
    }))?;
    tools.register(Arc::new(WriteContentPlanTool {
        plan_path: config::content_plan_path(ws),
    }))?;

    tools.register(Arc::new(ScheduleOnetimeTaskTool {
        store: Arc::clone(&store),
        registry: task_registry,
    }))?;
    tools.register(Arc::new(ListScheduledTasksTool {
        store: Arc::clone(&store),
    }))?;
    tools.register(Arc::new(CancelScheduledTaskTool { store }))?;
    tools.register(Arc::new(WriteGeneratedSchedulesTool {
        path: config::generated_schedules_path(ws),
        scheduler: scheduler.clone(),
    }))?;
    if let Some(handle) = scheduler {
        tools.register(Arc::new(ReloadSchedulesTool { scheduler: handle }))?;
    }
    Ok(tools)
}
