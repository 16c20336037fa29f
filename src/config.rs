//! Configuration loader and validator for the chat poller.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub source: Source,
    pub notify: Notify,
}

/// Polling loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    pub poll_interval_secs: u64,
    #[serde(default = "default_stream_delay_ms")]
    pub stream_delay_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// The operator's own author id; items with this author are outgoing.
    pub operator_id: String,
}

/// Remote messaging service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub force_fresh: bool,
    #[serde(default = "default_chat_page_size")]
    pub chat_page_size: usize,
    #[serde(default = "default_max_chat_pages")]
    pub max_chat_pages: usize,
    /// Sent verbatim with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Stream ids or display names to watch. Empty means every enumerated stream.
    #[serde(default)]
    pub streams: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Log,
    Console,
    File,
    Telegram,
}

/// Notification settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notify {
    pub sink: SinkKind,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub telegram: Option<TelegramSink>,
    #[serde(default = "default_true")]
    pub include_operator_items: bool,
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
}

/// Telegram chat that receives alerts when `notify.sink` is `telegram`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TelegramSink {
    pub bot_token: String,
    pub chat_id: i64,
}

fn default_state_file() -> String {
    "poller_state.json".into()
}
fn default_stream_delay_ms() -> u64 {
    1000
}
fn default_page_size() -> usize {
    10
}
fn default_max_concurrency() -> usize {
    1
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_chat_page_size() -> usize {
    50
}
fn default_max_chat_pages() -> usize {
    20
}
fn default_max_text_chars() -> usize {
    100
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Location of the checkpoint file. Relative `state_file` values live
    /// under `data_dir`.
    pub fn state_path(&self) -> PathBuf {
        let file = Path::new(&self.app.state_file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            Path::new(&self.app.data_dir).join(file)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.app.poll_interval_secs)
    }

    pub fn stream_delay(&self) -> Duration {
        Duration::from_millis(self.app.stream_delay_ms)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.state_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.state_file must be non-empty"));
    }
    if cfg.app.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_secs must be > 0"));
    }
    if cfg.app.page_size == 0 || cfg.app.page_size > 100 {
        return Err(ConfigError::Invalid("app.page_size must be within 1..=100"));
    }
    if cfg.app.max_concurrency == 0 {
        return Err(ConfigError::Invalid("app.max_concurrency must be >= 1"));
    }
    if cfg.app.operator_id.trim().is_empty() {
        return Err(ConfigError::Invalid("app.operator_id must be non-empty"));
    }

    if reqwest::Url::parse(&cfg.source.base_url).is_err() {
        return Err(ConfigError::Invalid("source.base_url must be an absolute URL"));
    }
    if cfg.source.timeout_secs == 0 {
        return Err(ConfigError::Invalid("source.timeout_secs must be > 0"));
    }
    if cfg.source.chat_page_size == 0 {
        return Err(ConfigError::Invalid("source.chat_page_size must be > 0"));
    }
    if cfg.source.max_chat_pages == 0 {
        return Err(ConfigError::Invalid("source.max_chat_pages must be > 0"));
    }

    match cfg.notify.sink {
        SinkKind::File => {
            let missing = cfg
                .notify
                .file_path
                .as_deref()
                .map_or(true, |p| p.trim().is_empty());
            if missing {
                return Err(ConfigError::Invalid(
                    "notify.file_path is required when notify.sink is file",
                ));
            }
        }
        SinkKind::Telegram => match &cfg.notify.telegram {
            None => {
                return Err(ConfigError::Invalid(
                    "notify.telegram is required when notify.sink is telegram",
                ))
            }
            Some(tg) if tg.bot_token.trim().is_empty() => {
                return Err(ConfigError::Invalid("notify.telegram.bot_token must be non-empty"))
            }
            Some(_) => {}
        },
        SinkKind::Log | SinkKind::Console => {}
    }

    Ok(())
}

/// Returns the example YAML content shipped with the poller.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  state_file: "poller_state.json"
  poll_interval_secs: 60
  stream_delay_ms: 1000
  page_size: 10
  max_concurrency: 1
  operator_id: "123456789"

source:
  base_url: "https://onlyfans.com/"
  timeout_secs: 30
  force_fresh: true
  chat_page_size: 50
  max_chat_pages: 20
  headers:
    user-agent: "Mozilla/5.0"
    cookie: "YOUR_SESSION_COOKIE"
  streams: []

notify:
  sink: "console"
  include_operator_items: true
  max_text_chars: 100
"#
}
