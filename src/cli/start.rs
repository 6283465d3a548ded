//! Start command - Run the full daemon (scheduler + agent + channel).

use anyhow::{Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::helpers::{
    build_backend_from_config, build_task_registry, build_tool_registry, ensure_workspace_dirs,
};
use crate::agent::AgentLoop;
use crate::bus::MessageBus;
use crate::channels::telegram::TelegramChannel;
use crate::channels::Channel;
use crate::config;
use crate::logging;
use crate::platform::{ContentPlatform, LocalArchivePlatform};
use crate::scheduler::{self, FileTaskStore, Scheduler, TaskStore};

pub async fn cmd_start() -> Result<()> {
    let cfg = config::load_config(None)?;
    let _log_guard = logging::init_logging(&cfg)?;

    let ws = config::workspace_path(&cfg);
    ensure_workspace_dirs(&ws)?;

    let backend = build_backend_from_config(&cfg, None, None)?;
    let tz: Tz = cfg
        .scheduler
        .timezone
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown time zone '{}'", cfg.scheduler.timezone))
        .context("scheduler configuration")?;

    let mut bus = MessageBus::new();
    let inbound_tx = bus.inbound_sender();
    let inbound_rx = bus.take_inbound_receiver().expect("fresh bus");

    let store = Arc::new(FileTaskStore::new(&config::task_store_path(&ws)));
    let platform: Arc<dyn ContentPlatform> =
        Arc::new(LocalArchivePlatform::new(&config::archive_dir(&ws)));

    let task_registry = Arc::new(build_task_registry(
        &cfg,
        &ws,
        Arc::clone(&platform),
        Arc::clone(&store) as Arc<dyn TaskStore>,
        inbound_tx.clone(),
        bus.outbound_tx_clone(),
    )?);

    let mut sched = Scheduler::new(
        Arc::clone(&task_registry),
        Arc::clone(&store) as Arc<dyn TaskStore>,
        &config::static_schedules_path(&ws),
        &config::generated_schedules_path(&ws),
        tz,
    );
    sched.reload_all(Utc::now());
    let sched = Arc::new(Mutex::new(sched));

    let tools = Arc::new(build_tool_registry(
        &cfg,
        &ws,
        platform,
        Arc::clone(&store) as Arc<dyn TaskStore>,
        Arc::clone(&task_registry),
        Some(Arc::clone(&sched)),
        bus.outbound_tx_clone(),
        "telegram",
        &cfg.channels.telegram.owner_chat_id,
    )?);

    let mut agent = AgentLoop::new(
        backend,
        &ws,
        tools,
        cfg.agent.max_continuations,
        inbound_rx,
        bus.outbound_tx_clone(),
    )
    .await;
    tokio::spawn(async move {
        if let Err(e) = agent.run().await {
            error!("Agent loop error: {e:#}");
        }
    });

    let shutdown = CancellationToken::new();
    let tick = Duration::from_secs(cfg.scheduler.tick_interval_secs.max(1));
    let scheduler_handle = tokio::spawn(scheduler::service::run(
        Arc::clone(&sched),
        tick,
        shutdown.clone(),
    ));

    if cfg.channels.telegram.enabled {
        let tg_cfg = cfg.channels.telegram.clone();
        let tg_inbound = inbound_tx.clone();
        let tg_outbound = bus.subscribe_outbound();
        tokio::spawn(async move {
            let mut ch = TelegramChannel::new(tg_cfg, tg_inbound, tg_outbound);
            if let Err(e) = ch.start().await {
                error!("Telegram channel error: {e:#}");
            }
        });
    } else {
        warn!("Telegram channel disabled; only scheduled runs will produce activity");
    }

    info!("postpilot daemon running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    // Graceful shutdown: no new ticks, the in-flight tick finishes.
    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), scheduler_handle).await;
    Ok(())
}
