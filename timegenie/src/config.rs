//! Engine configuration
//!
//! Central location for configuration constants, resource limits and
//! the JSON-backed `EngineConfig` loaded at startup.

use crate::error::{AppError, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

// ===== Storage =====

/// Database file used when no path is configured
pub const DEFAULT_DATABASE_FILE: &str = "reminders.db";

// ===== Time Handling =====

/// Zone applied to timestamps the user typed without one
pub const DEFAULT_TIMEZONE: &str = "UTC";

// ===== Delivery Limits =====

/// Attempts per reminder before a transient failure is treated as permanent
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Backoff before the second attempt; doubled for every attempt after that
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Upper bound for a single backoff sleep (30 seconds)
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Random jitter added on top of each backoff sleep
pub const DEFAULT_BACKOFF_JITTER_MS: u64 = 250;

// ===== Intake Limits =====

/// Drafts untouched for this long are discarded (30 minutes)
pub const DEFAULT_DRAFT_TTL_SECS: u64 = 1_800;

/// Cron expression for the abandoned-draft sweep (every minute)
pub const DRAFT_SWEEP_CRON: &str = "0 * * * * *";

/// Maximum reminder body length in characters.
/// Keeps a single delivery within common chat message limits.
pub const MAX_BODY_CHARS: usize = 4_096;

/// Retry behaviour of the delivery dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_DELIVERY_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BACKOFF_BASE_MS
}

fn default_max_delay_ms() -> u64 {
    MAX_BACKOFF_MS
}

fn default_jitter_ms() -> u64 {
    DEFAULT_BACKOFF_JITTER_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryPolicy {
    /// Backoff to sleep after the given failed attempt (1-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub delivery: RetryPolicy,
    #[serde(default = "default_draft_ttl_secs")]
    pub draft_ttl_secs: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from(DEFAULT_DATABASE_FILE)
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_draft_ttl_secs() -> u64 {
    DEFAULT_DRAFT_TTL_SECS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            timezone: default_timezone(),
            delivery: RetryPolicy::default(),
            draft_ttl_secs: default_draft_ttl_secs(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file, falling back to defaults when it
    /// does not exist
    pub async fn load(path: &Path) -> Result<Self> {
        if !fs::try_exists(path).await? {
            tracing::info!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await?;
        let config: EngineConfig = serde_json::from_str(&contents)?;
        config.validate()?;

        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.timezone.parse::<Tz>().is_err() {
            return Err(AppError::Config(format!(
                "Unknown timezone '{}'",
                self.timezone
            )));
        }

        if self.delivery.max_attempts == 0 {
            return Err(AppError::Config(
                "delivery.max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.draft_ttl_secs == 0 {
            return Err(AppError::Config(
                "draft_ttl_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn draft_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.draft_ttl_secs.min(i64::MAX as u64) as i64)
    }
}
