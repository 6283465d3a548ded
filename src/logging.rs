//! Logging initialization.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{log_dir, Config};

fn parse_log_level(level: &str) -> Result<tracing::Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(tracing::Level::TRACE),
        "debug" => Ok(tracing::Level::DEBUG),
        "info" => Ok(tracing::Level::INFO),
        "warn" => Ok(tracing::Level::WARN),
        "error" => Ok(tracing::Level::ERROR),
        other => anyhow::bail!("unknown log level '{}'", other),
    }
}

/// Initialize the logging system from config.
///
/// Logs go to stderr and to a daily-rolling file under `~/.postpilot/logs`.
/// The returned guard must be held for the lifetime of the process, or the
/// non-blocking file writer stops flushing.
pub fn init_logging(cfg: &Config) -> Result<WorkerGuard> {
    let level = parse_log_level(&cfg.log.level)?;

    let dir = log_dir();
    std::fs::create_dir_all(&dir)?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("postpilot={}", level)));

    let file_suffix = match cfg.log.format.to_lowercase().as_str() {
        "json" => "json",
        _ => "log",
    };
    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("postpilot")
        .filename_suffix(file_suffix)
        .build(&dir)
        .map_err(|e| anyhow::anyhow!("Failed to create rolling file appender: {}", e))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    match cfg.log.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(non_blocking))
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .ok();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_ansi(false).with_writer(non_blocking))
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init()
                .ok();
        }
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_levels() {
        assert_eq!(parse_log_level("info").unwrap(), tracing::Level::INFO);
        assert_eq!(parse_log_level("DEBUG").unwrap(), tracing::Level::DEBUG);
        assert_eq!(parse_log_level("Warn").unwrap(), tracing::Level::WARN);
    }

    #[test]
    fn parse_unknown_level_errors() {
        assert!(parse_log_level("loud").is_err());
    }
}
