use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

pub const LOG_ENV: &str = "BOARD_TUI_LOG";
const DEFAULT_FILTER: &str = "board_tui=info";

/// Sends tracing output to a file; the terminal belongs to the UI.
pub fn install(cfg: &LoggingConfig) -> Result<PathBuf> {
    let path = cfg
        .file
        .clone()
        .or_else(default_log_path)
        .context("logging: no log file location")?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("logging: create directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("logging: open {}", path.display()))?;

    let directives = filter_directives(std::env::var(LOG_ENV).ok(), &cfg.filter);
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .context("logging: install subscriber")?;
    Ok(path)
}

fn filter_directives(from_env: Option<String>, from_config: &str) -> String {
    from_env
        .filter(|value| !value.trim().is_empty())
        .or_else(|| Some(from_config.to_string()).filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

pub fn default_log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("board-tui").join("board-tui.log"))
}
