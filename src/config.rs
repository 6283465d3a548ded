use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Channel configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub allow_from: Vec<String>,
    /// Chat that receives notifications from scheduled runs.
    #[serde(default)]
    pub owner_chat_id: String,
    /// Mirror tool progress into the chat.
    #[serde(default)]
    pub show_tool_calls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
}

// ---------------------------------------------------------------------------
// Provider configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEntry {
    #[serde(default)]
    pub api_key: String,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderEntry,
    #[serde(default)]
    pub anthropic: ProviderEntry,
    #[serde(default)]
    pub openrouter: ProviderEntry,
}

// ---------------------------------------------------------------------------
// Agent defaults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaults {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Upper bound on autonomous continuations per turn. The model may keep
    /// a session going by replying `can_continue: true`; past this bound the
    /// loop terminates with a depth-limit notice.
    #[serde(default = "default_max_continuations")]
    pub max_continuations: u32,
}

fn default_workspace() -> String {
    "~/.postpilot/workspace".into()
}
fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4.1".into()
}
fn default_max_continuations() -> u32 {
    3
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            provider: default_provider(),
            model: default_model(),
            max_continuations: default_max_continuations(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Named zone that weekly publishing times are pinned to, so a post
    /// scheduled for 18:00 stays at 18:00 local across DST shifts.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
}

fn default_timezone() -> String {
    "Europe/Kyiv".into()
}
fn default_tick_interval() -> u64 {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            tick_interval_secs: default_tick_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool configs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageToolConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_image_size")]
    pub size: String,
}

fn default_image_size() -> String {
    "1024x1024".into()
}

impl Default for ImageToolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            size: default_image_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolsConfig {
    #[serde(default)]
    pub image: ImageToolConfig,
}

// ---------------------------------------------------------------------------
// Log config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ---------------------------------------------------------------------------
// Root config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub agent: AgentDefaults,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

// ---------------------------------------------------------------------------
// Paths & loading
// ---------------------------------------------------------------------------

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".postpilot")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

pub fn log_dir() -> PathBuf {
    config_dir().join("logs")
}

pub fn workspace_path(cfg: &Config) -> PathBuf {
    let raw = &cfg.agent.workspace;
    if raw.starts_with('~') {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(raw.trim_start_matches("~/"))
    } else {
        PathBuf::from(raw)
    }
}

// Workspace layout. Everything the daemon persists lives under the
// workspace, so one directory carries the whole publishing state.

pub fn drafts_dir(workspace: &Path) -> PathBuf {
    workspace.join("drafts")
}

pub fn task_store_path(workspace: &Path) -> PathBuf {
    workspace.join("data").join("tasks.json")
}

pub fn static_schedules_path(workspace: &Path) -> PathBuf {
    workspace.join("schedules").join("static.json")
}

pub fn generated_schedules_path(workspace: &Path) -> PathBuf {
    workspace.join("schedules").join("generated.json")
}

pub fn content_rules_path(workspace: &Path) -> PathBuf {
    workspace.join("content_rules.md")
}

pub fn content_plan_path(workspace: &Path) -> PathBuf {
    workspace.join("content_plan.md")
}

pub fn archive_dir(workspace: &Path) -> PathBuf {
    workspace.join("archive")
}

pub fn sessions_dir(workspace: &Path) -> PathBuf {
    workspace.join("sessions")
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let p = path.map(PathBuf::from).unwrap_or_else(config_path);

    if p.exists() {
        let text = std::fs::read_to_string(&p)
            .with_context(|| format!("reading config from {}", p.display()))?;
        let cfg: Config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config from {}", p.display()))?;
        Ok(cfg)
    } else {
        Ok(Config::default())
    }
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let p = path.map(PathBuf::from).unwrap_or_else(config_path);

    if let Some(parent) = p.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(cfg)?;
    std::fs::write(&p, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.agent.max_continuations, 3);
        assert_eq!(cfg.scheduler.timezone, "Europe/Kyiv");
        assert_eq!(cfg.scheduler.tick_interval_secs, 1);
        assert!(!cfg.channels.telegram.enabled);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let mut cfg = Config::default();
        cfg.agent.model = "gpt-4.1-mini".to_string();
        cfg.channels.telegram.token = "tok".to_string();
        save_config(&cfg, Some(&path)).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert_eq!(loaded.agent.model, "gpt-4.1-mini");
        assert_eq!(loaded.channels.telegram.token, "tok");
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(cfg.agent.provider, "openai");
    }

    #[test]
    fn workspace_layout_is_stable() {
        let ws = Path::new("/tmp/ws");
        assert_eq!(task_store_path(ws), Path::new("/tmp/ws/data/tasks.json"));
        assert_eq!(
            static_schedules_path(ws),
            Path::new("/tmp/ws/schedules/static.json")
        );
        assert_eq!(
            generated_schedules_path(ws),
            Path::new("/tmp/ws/schedules/generated.json")
        );
    }
}
