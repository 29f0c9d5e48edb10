//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (bot token, operator allow-list) are referenced by env-var name
//! in the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub engine: EngineConfig,
    #[serde(default)]
    pub boosts: BoostsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub minter: MinterConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub reporter: ReporterConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub name: String,
    /// Newline-delimited credential list.
    pub credentials_file: PathBuf,
    /// Directory holding `session_*.session` files.
    pub session_dir: PathBuf,
    #[serde(default = "default_pass_interval_secs")]
    pub pass_interval_secs: u64,
    #[serde(default = "default_inactive_poll_secs")]
    pub inactive_poll_secs: u64,
    /// Start the loop without waiting for an operator `/start`.
    #[serde(default)]
    pub start_active: bool,
}

/// Upgrade opt-ins, fixed for the lifetime of a run.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct BoostsConfig {
    #[serde(default)]
    pub upgrade_fuel_tank: bool,
    #[serde(default)]
    pub upgrade_turbo: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub ticker_url: String,
    pub link_code: String,
    pub game_id: u32,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.okx.com/priapi/v1/affiliate/game/racer".into(),
            ticker_url: "https://www.okx.com/api/v5/market/ticker?instId=BTC-USDT".into(),
            link_code: "88910038".into(),
            game_id: 1,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
        }
    }
}

/// External credential minting helper.
#[derive(Debug, Deserialize, Clone)]
pub struct MinterConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    pub bot_token_env: Option<String>,
    /// Comma-separated numeric user ids allowed to issue commands.
    pub authorized_users_env: Option<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token_env: Some("TELEGRAM_BOT_TOKEN".into()),
            authorized_users_env: Some("AUTHORIZED_USERS".into()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReporterConfig {
    pub interval_secs: u64,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_pass_interval_secs() -> u64 {
    300
}

fn default_inactive_poll_secs() -> u64 {
    60
}

impl EngineConfig {
    pub fn pass_interval(&self) -> Duration {
        Duration::from_secs(self.pass_interval_secs)
    }

    pub fn inactive_poll(&self) -> Duration {
        Duration::from_secs(self.inactive_poll_secs)
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        if config.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if config.reporter.interval_secs == 0 {
            anyhow::bail!("reporter.interval_secs must be at least 1");
        }
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

/// Parse a comma-separated list of numeric user ids.
pub fn parse_user_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .with_context(|| format!("Invalid user id in allow-list: {s}"))
        })
        .collect()
}
