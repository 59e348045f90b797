//! Flowcast configuration system.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FlowcastError, Result};

/// Queue receiving manual / API executions.
pub const QUEUE_ON_DEMAND: &str = "on-demand-execution";
/// Queue receiving events fired by the in-process scheduler.
pub const QUEUE_SCHEDULED: &str = "scheduled-execution";
/// Queue holding self re-arming recurring jobs.
pub const QUEUE_RECURRING: &str = "recurring-execution";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowcastConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub delegate: Option<DelegateConfig>,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

impl FlowcastConfig {
    /// Load config from the default path (~/.flowcast/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlowcastError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text and validate it.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| FlowcastError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| FlowcastError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Sanity checks that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for q in &self.queue.queues {
            if q.name.trim().is_empty() {
                return Err(FlowcastError::Config("queue name must not be empty".into()));
            }
            if !seen.insert(q.name.as_str()) {
                return Err(FlowcastError::Config(format!("duplicate queue '{}'", q.name)));
            }
            if q.concurrency == 0 {
                return Err(FlowcastError::Config(format!(
                    "queue '{}': concurrency must be at least 1",
                    q.name
                )));
            }
            if q.attempts == 0 {
                return Err(FlowcastError::Config(format!(
                    "queue '{}': attempts must be at least 1",
                    q.name
                )));
            }
        }
        if self.engine.max_poll_attempts == 0 {
            return Err(FlowcastError::Config(
                "engine.max_poll_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Flowcast home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".flowcast")
    }

    /// Settings for a named queue, if configured.
    pub fn queue_settings(&self, name: &str) -> Option<&QueueSettings> {
        self.queue.queues.iter().find(|q| q.name == name)
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn bool_true() -> bool { true }

/// HTTP API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// "text" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 3100 }
fn default_log_format() -> String { "text".into() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_format: default_log_format(),
        }
    }
}

/// Persistent queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_queue_db")]
    pub db_path: String,
    /// How often idle workers re-check for delayed jobs.
    #[serde(default = "default_queue_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_queues")]
    pub queues: Vec<QueueSettings>,
}

fn default_queue_db() -> String { "~/.flowcast/queue.db".into() }
fn default_queue_poll_ms() -> u64 { 1000 }

fn default_queues() -> Vec<QueueSettings> {
    vec![
        QueueSettings {
            name: QUEUE_ON_DEMAND.into(),
            concurrency: 4,
            attempts: 3,
            backoff: BackoffPolicy::Exponential { delay_ms: 2000 },
            keep_completed: default_keep_completed(),
            keep_failed: default_keep_failed(),
        },
        QueueSettings {
            name: QUEUE_SCHEDULED.into(),
            concurrency: 2,
            attempts: 3,
            backoff: BackoffPolicy::Fixed { delay_ms: 5000 },
            keep_completed: default_keep_completed(),
            keep_failed: default_keep_failed(),
        },
        QueueSettings {
            name: QUEUE_RECURRING.into(),
            concurrency: 2,
            attempts: 2,
            backoff: BackoffPolicy::Fixed { delay_ms: 10000 },
            keep_completed: default_keep_completed(),
            keep_failed: default_keep_failed(),
        },
    ]
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_queue_db(),
            poll_interval_ms: default_queue_poll_ms(),
            queues: default_queues(),
        }
    }
}

/// Per-queue settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSettings {
    pub name: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    /// Completed jobs kept for inspection.
    #[serde(default = "default_keep_completed")]
    pub keep_completed: usize,
    /// Failed jobs kept for inspection.
    #[serde(default = "default_keep_failed")]
    pub keep_failed: usize,
}

fn default_concurrency() -> usize { 1 }
fn default_attempts() -> u32 { 3 }
fn default_keep_completed() -> usize { 100 }
fn default_keep_failed() -> usize { 500 }

impl QueueSettings {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            concurrency: default_concurrency(),
            attempts: default_attempts(),
            backoff: BackoffPolicy::default(),
            keep_completed: default_keep_completed(),
            keep_failed: default_keep_failed(),
        }
    }
}

/// Retry delay policy, applied only to jobs that returned an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffPolicy {
    Fixed { delay_ms: u64 },
    Exponential { delay_ms: u64 },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed { delay_ms: 1000 }
    }
}

impl BackoffPolicy {
    /// Delay before the next try, given the number of attempts already made (1-based).
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            BackoffPolicy::Exponential { delay_ms } => {
                let shift = attempts_made.saturating_sub(1).min(20);
                Duration::from_millis(delay_ms.saturating_mul(1u64 << shift))
            }
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// SQLite file holding schedule metadata.
    #[serde(default = "default_schedule_db")]
    pub store_path: String,
    /// Re-arm schedules from the metadata store at startup.
    #[serde(default)]
    pub rearm_on_startup: bool,
}

fn default_schedule_db() -> String { "~/.flowcast/schedules.db".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            store_path: default_schedule_db(),
            rearm_on_startup: false,
        }
    }
}

/// Dual execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_poll_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_poll_attempts: u32,
    #[serde(default)]
    pub parallel_accounts: bool,
    #[serde(default)]
    pub parallel_channels: bool,
    /// Recent executions kept in memory.
    #[serde(default = "default_history")]
    pub history_size: usize,
}

fn default_poll_ms() -> u64 { 2000 }
fn default_max_polls() -> u32 { 30 }
fn default_history() -> usize { 100 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_ms(),
            max_poll_attempts: default_max_polls(),
            parallel_accounts: false,
            parallel_channels: false,
            history_size: default_history(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// External workflow engine the core can offload runs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_http_timeout() -> u64 { 30 }

/// Plan generator endpoint. Without a base URL a template plan is produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Distribution channel credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub email: SmtpConfig,
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

/// Slack-compatible incoming webhook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagingConfig {
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub default_channel: Option<String>,
    #[serde(default)]
    pub mock: bool,
}

/// Outbound SMTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_from")]
    pub from: String,
    #[serde(default)]
    pub mock: bool,
}

fn default_smtp_port() -> u16 { 587 }
fn default_from() -> String { "flowcast@localhost".into() }

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from: default_from(),
            mock: false,
        }
    }
}

/// CRM REST API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrmConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub mock: bool,
}

/// Generic outbound webhook defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub mock: bool,
}
