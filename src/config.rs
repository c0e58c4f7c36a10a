use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::board::DEFAULT_BASE_URL;

const DEFAULT_ENV_PREFIX: &str = "BOARD_TUI";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_page_start")]
    pub page_start: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout: default_timeout(),
            page_start: default_page_start(),
            page_size: default_page_size(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("board-tui/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_page_start() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_thumbnail_cols")]
    pub thumbnail_cols: u16,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            thumbnail_cols: default_thumbnail_cols(),
        }
    }
}

fn default_thumbnail_cols() -> u16 {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: i64,
    #[serde(default = "default_media_ttl_duration", with = "humantime_serde")]
    pub default_ttl: Duration,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_size_bytes: default_max_size_bytes(),
            default_ttl: default_media_ttl_duration(),
            workers: default_workers(),
        }
    }
}

fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("board-tui").join("media"))
}

fn default_max_size_bytes() -> i64 {
    200 * 1024 * 1024
}

fn default_media_ttl_duration() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}

fn default_workers() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "board_tui=info".into()
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

/// Defaults, then the YAML file (explicit, or the default location when it
/// exists), then `<PREFIX>_<SECTION>__<KEY>` environment variables.
pub fn load(options: LoadOptions) -> Result<Config> {
    let file = options
        .config_file
        .or_else(|| default_path().filter(|path| path.exists()));
    let mut cfg = match file {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };

    let prefix = format!(
        "{}_",
        options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX).to_uppercase()
    );
    let overrides: BTreeMap<String, String> = env::vars()
        .filter_map(|(name, value)| {
            let key = name.strip_prefix(&prefix)?;
            Some((key.to_ascii_lowercase().replace("__", "."), value))
        })
        .collect();
    for (key, value) in overrides {
        cfg.set(&key, &value)
            .with_context(|| format!("config: bad value for {key}"))?;
    }
    Ok(cfg)
}

impl Config {
    fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("config: read {}", path.display()))?;
        let mut cfg: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("config: parse {}", path.display()))?;
        cfg.fill_blanks();
        Ok(cfg)
    }

    /// Blank or zero values in a file mean "use the default".
    fn fill_blanks(&mut self) {
        let defaults = Config::default();
        if self.server.base_url.trim().is_empty() {
            self.server.base_url = defaults.server.base_url;
        }
        if self.server.user_agent.trim().is_empty() {
            self.server.user_agent = defaults.server.user_agent;
        }
        if self.server.timeout.is_zero() {
            self.server.timeout = defaults.server.timeout;
        }
        if self.server.page_size == 0 {
            self.server.page_size = defaults.server.page_size;
        }
        if self.ui.thumbnail_cols == 0 {
            self.ui.thumbnail_cols = defaults.ui.thumbnail_cols;
        }
        if self.media.cache_dir.is_none() {
            self.media.cache_dir = defaults.media.cache_dir;
        }
        if self.media.max_size_bytes == 0 {
            self.media.max_size_bytes = defaults.media.max_size_bytes;
        }
        if self.media.workers == 0 {
            self.media.workers = defaults.media.workers;
        }
        if self.logging.filter.trim().is_empty() {
            self.logging.filter = defaults.logging.filter;
        }
    }

    /// Sets one dotted key. Keys this crate does not know are ignored so
    /// unrelated variables sharing the prefix pass through.
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "server.base_url" => self.server.base_url = value.to_string(),
            "server.user_agent" => self.server.user_agent = value.to_string(),
            "server.timeout" => self.server.timeout = humantime::parse_duration(value)?,
            "server.page_start" => self.server.page_start = value.parse()?,
            "server.page_size" => self.server.page_size = value.parse()?,
            "ui.thumbnail_cols" => self.ui.thumbnail_cols = value.parse()?,
            "media.cache_dir" => self.media.cache_dir = Some(PathBuf::from(value)),
            "media.max_size_bytes" => self.media.max_size_bytes = value.parse()?,
            "media.default_ttl" => self.media.default_ttl = humantime::parse_duration(value)?,
            "media.workers" => self.media.workers = value.parse()?,
            "logging.file" => self.logging.file = Some(PathBuf::from(value)),
            "logging.filter" => self.logging.filter = value.to_string(),
            _ => {}
        }
        Ok(())
    }
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("board-tui").join("config.yaml"))
}
