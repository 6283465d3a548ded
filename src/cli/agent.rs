//! Agent command - Run the agent (one-shot or interactive).

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use super::helpers::{
    build_backend_from_config, build_task_registry, build_tool_registry, ensure_workspace_dirs,
};
use crate::agent::AgentLoop;
use crate::bus::{InboundMessage, MessageBus, OutboundMessageType};
use crate::config;
use crate::logging;
use crate::platform::{ContentPlatform, LocalArchivePlatform};
use crate::scheduler::{FileTaskStore, TaskStore};

fn cli_message(content: &str) -> InboundMessage {
    InboundMessage {
        channel: "cli".into(),
        sender_id: "user".into(),
        chat_id: "direct".into(),
        content: content.to_string(),
        timestamp: chrono::Utc::now(),
        metadata: serde_json::Value::Null,
    }
}

pub async fn cmd_agent(
    message: Option<String>,
    provider: Option<String>,
    model: Option<String>,
) -> Result<()> {
    let cfg = config::load_config(None)?;
    let _log_guard = logging::init_logging(&cfg)?;

    let ws = config::workspace_path(&cfg);
    ensure_workspace_dirs(&ws)?;

    let backend = build_backend_from_config(&cfg, provider.as_deref(), model.as_deref())?;
    info!(
        provider = %provider.as_deref().unwrap_or(&cfg.agent.provider),
        model = %model.as_deref().unwrap_or(&cfg.agent.model),
        "Starting agent"
    );

    let mut bus = MessageBus::new();
    let store = Arc::new(FileTaskStore::new(&config::task_store_path(&ws)));
    let platform: Arc<dyn ContentPlatform> =
        Arc::new(LocalArchivePlatform::new(&config::archive_dir(&ws)));

    let task_registry = Arc::new(build_task_registry(
        &cfg,
        &ws,
        Arc::clone(&platform),
        Arc::clone(&store) as Arc<dyn TaskStore>,
        bus.inbound_sender(),
        bus.outbound_tx_clone(),
    )?);
    // No live scheduler in CLI mode: schedule edits persist and are picked
    // up by the next daemon reload.
    let tools = Arc::new(build_tool_registry(
        &cfg,
        &ws,
        platform,
        Arc::clone(&store) as Arc<dyn TaskStore>,
        task_registry,
        None,
        bus.outbound_tx_clone(),
        "cli",
        "direct",
    )?);

    let inbound_rx = bus.take_inbound_receiver().expect("fresh bus");
    let mut agent = AgentLoop::new(
        backend,
        &ws,
        tools,
        cfg.agent.max_continuations,
        inbound_rx,
        bus.outbound_tx_clone(),
    )
    .await;

    // Print everything the agent emits for this chat.
    let mut rx = bus.subscribe_outbound();
    let printer = tokio::spawn(async move {
        while let Ok(out) = rx.recv().await {
            match out.message_type {
                OutboundMessageType::Chat { content, media } => {
                    if !content.is_empty() {
                        println!("{content}");
                    }
                    for m in media {
                        println!("[image] {m}");
                    }
                }
                OutboundMessageType::ToolProgress {
                    tool_name,
                    status,
                    result_preview,
                } => {
                    println!("[tool {tool_name}] {status} — {result_preview}");
                }
            }
        }
    });

    if let Some(msg) = message {
        agent.handle_message(cli_message(&msg)).await?;
    } else {
        println!("postpilot interactive mode (type 'exit' to quit)");
        loop {
            print!("> ");
            use std::io::Write;
            std::io::stdout().flush()?;
            let mut input = String::new();
            std::io::stdin().read_line(&mut input)?;
            let input = input.trim();
            if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
                break;
            }
            if input.is_empty() {
                continue;
            }
            agent.handle_message(cli_message(input)).await?;
        }
    }

    // Let the printer drain before tearing down.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    printer.abort();
    Ok(())
}
