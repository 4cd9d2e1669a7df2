//! Configuration management

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::acquire::AcquireConfig;
use crate::mode::ModeStoreConfig;
use crate::queue::QueueConfig;

/// Bot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token
    pub bot_token: String,

    /// Bot API base URL (points at the local relay when self-hosted)
    pub api_url: String,

    /// Relay data directory, set when the relay shares our filesystem
    pub local_data_dir: Option<PathBuf>,

    /// Root for per-user feature directories
    pub data_dir: PathBuf,

    /// SQLite database for users, entitlements and activity
    pub db_path: PathBuf,

    /// User IDs seeded as active admins on startup
    pub admins: Vec<i64>,

    /// Capacity of the activity buffer before oldest entries are dropped
    pub activity_buffer: usize,

    pub sessions: ModeStoreConfig,
    pub queue: QueueConfig,
    pub acquire: AcquireConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let bot_token =
            std::env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;

        let api_url = std::env::var("TELEGRAM_API_URL")
            .unwrap_or_else(|_| "https://api.telegram.org".to_string());

        let local_data_dir = std::env::var("TELEGRAM_LOCAL_DATA_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        let data_dir = std::env::var("FIELDBOT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("fieldbot")
            });

        let db_path = std::env::var("FIELDBOT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("fieldbot.db"));

        let admins = parse_id_list(&std::env::var("FIELDBOT_ADMINS").unwrap_or_default());

        let sessions = ModeStoreConfig {
            idle_ttl: Duration::from_secs(env_u64("FIELDBOT_SESSION_TTL_SECS", 24 * 60 * 60)),
            sweep_interval: Duration::from_secs(env_u64_min(
                "FIELDBOT_SWEEP_INTERVAL_SECS",
                30 * 60,
                1,
            )),
        };

        let queue = QueueConfig {
            min_spacing: Duration::from_millis(env_u64("FIELDBOT_QUEUE_SPACING_MS", 100)),
            progress_every: env_u64_min("FIELDBOT_PROGRESS_EVERY", 10, 1),
        };

        let acquire = AcquireConfig {
            local_data_dir: local_data_dir.clone(),
            bot_token: bot_token.clone(),
            download_timeout: Duration::from_secs(env_u64("FIELDBOT_DOWNLOAD_TIMEOUT_SECS", 30)),
        };

        let activity_buffer = env_u64_min("FIELDBOT_ACTIVITY_BUFFER", 1024, 1) as usize;

        Ok(Self {
            bot_token,
            api_url,
            local_data_dir,
            data_dir,
            db_path,
            admins,
            activity_buffer,
            sessions,
            queue,
            acquire,
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Like `env_u64`, but never below `min` (zero intervals panic in tokio)
fn env_u64_min(key: &str, default: u64, min: u64) -> u64 {
    env_u64(key, default).max(min)
}

/// Parse "1, 2,abc,3" into [1, 2, 3]
pub fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}
