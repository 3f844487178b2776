//! TOML configuration parsing.
//!
//! Only `[db]` is required; every other section falls back to defaults that
//! match the public weather-alert feed and the push/email providers used in
//! production. See `config/alh.example.toml` for a complete file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub diff: DiffConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,
    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_referer")]
    pub referer: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            timeout_secs: default_feed_timeout_secs(),
            referer: default_referer(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_feed_url() -> String {
    "https://product.weather.com.cn/alarm/grepalarm_cn.php".to_string()
}
fn default_feed_timeout_secs() -> u64 {
    30
}
fn default_referer() -> String {
    "https://www.weather.com.cn/".to_string()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/141.0.0.0 Safari/537.36".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetentionConfig {
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_keep_ingestion_logs")]
    pub keep_ingestion_logs: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            keep_ingestion_logs: default_keep_ingestion_logs(),
        }
    }
}

fn default_window_days() -> i64 {
    7
}
fn default_keep_ingestion_logs() -> i64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiffConfig {
    /// Number of most recent records from other batches compared against.
    #[serde(default = "default_prior_sample")]
    pub prior_sample: i64,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            prior_sample: default_prior_sample(),
        }
    }
}

fn default_prior_sample() -> i64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_push_url")]
    pub push_url: String,
    /// Legacy push endpoint; `{key}` is replaced by the config's push key.
    #[serde(default = "default_push_fallback_url")]
    pub push_fallback_url: String,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_digest_items")]
    pub max_digest_items: usize,
    #[serde(default = "default_digest_title")]
    pub title: String,
    #[serde(default = "default_detail_url_prefix")]
    pub detail_url_prefix: String,
    #[serde(default = "default_sender_name")]
    pub email_sender_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            push_url: default_push_url(),
            push_fallback_url: default_push_fallback_url(),
            timeout_secs: default_dispatch_timeout_secs(),
            max_digest_items: default_max_digest_items(),
            title: default_digest_title(),
            detail_url_prefix: default_detail_url_prefix(),
            email_sender_name: default_sender_name(),
        }
    }
}

fn default_push_url() -> String {
    "https://api.sc3.ft07.com/send/push".to_string()
}
fn default_push_fallback_url() -> String {
    "https://sctapi.ftqq.com/{key}.send".to_string()
}
fn default_dispatch_timeout_secs() -> u64 {
    15
}
fn default_max_digest_items() -> usize {
    10
}
fn default_digest_title() -> String {
    "气象预警通知".to_string()
}
fn default_detail_url_prefix() -> String {
    "https://www.weather.com.cn/alarm/newalarmcontent.shtml?file=".to_string()
}
fn default_sender_name() -> String {
    "气象预警系统".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: default_log_format(),
        }
    }
}

fn default_log_filter() -> String {
    "info,sqlx=warn".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Config pointing at `db_path` with every other section defaulted.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            feed: FeedConfig::default(),
            retention: RetentionConfig::default(),
            diff: DiffConfig::default(),
            dispatch: DispatchConfig::default(),
            scheduler: SchedulerConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.feed.timeout_secs == 0 {
        anyhow::bail!("feed.timeout_secs must be > 0");
    }
    if config.retention.window_days < 1 {
        anyhow::bail!("retention.window_days must be >= 1");
    }
    if config.retention.keep_ingestion_logs < 1 {
        anyhow::bail!("retention.keep_ingestion_logs must be >= 1");
    }
    if config.diff.prior_sample < 1 {
        anyhow::bail!("diff.prior_sample must be >= 1");
    }
    if config.dispatch.timeout_secs == 0 {
        anyhow::bail!("dispatch.timeout_secs must be > 0");
    }
    if config.dispatch.max_digest_items == 0 {
        anyhow::bail!("dispatch.max_digest_items must be >= 1");
    }
    if !config.dispatch.push_fallback_url.contains("{key}") {
        anyhow::bail!("dispatch.push_fallback_url must contain a {{key}} placeholder");
    }
    if config.scheduler.interval_secs == 0 {
        anyhow::bail!("scheduler.interval_secs must be > 0");
    }

    match config.logging.format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!(
            "Unknown logging format: '{}'. Must be text or json.",
            other
        ),
    }

    Ok(())
}
