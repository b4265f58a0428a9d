use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::profile::coordinator::CoordinatorConfig;
use crate::profile::invoker::InvokerConfig;

pub const DEFAULT_PROMPT_TOKEN_CEILING: usize = 12_000;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    pub engine: EngineConfig,
}

/// Tunables of the profile evolution engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub coordinator: CoordinatorConfig,
    pub invoker: InvokerConfig,
    pub prompt_token_ceiling: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            invoker: InvokerConfig::default(),
            prompt_token_ceiling: DEFAULT_PROMPT_TOKEN_CEILING,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            engine: EngineConfig::from_lookup(|key| std::env::var(key).ok())?,
        })
    }
}

impl EngineConfig {
    /// Reads overrides through `lookup`; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = EngineConfig::default();
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            Ok(Duration::from_secs(parse_or(&lookup, key, default.as_secs())?))
        };

        let coordinator = CoordinatorConfig {
            idempotency_window: secs(
                "PROFILE_IDEMPOTENCY_WINDOW_SECS",
                defaults.coordinator.idempotency_window,
            )?,
            join_timeout: secs("PROFILE_JOIN_TIMEOUT_SECS", defaults.coordinator.join_timeout)?,
            lock_max_age: secs("PROFILE_LOCK_MAX_AGE_SECS", defaults.coordinator.lock_max_age)?,
            sweep_interval: secs(
                "PROFILE_SWEEP_INTERVAL_SECS",
                defaults.coordinator.sweep_interval,
            )?,
            failure_cooldown: secs(
                "PROFILE_FAILURE_COOLDOWN_SECS",
                defaults.coordinator.failure_cooldown,
            )?,
        };
        if coordinator.sweep_interval.is_zero() {
            anyhow::bail!("PROFILE_SWEEP_INTERVAL_SECS must be greater than zero");
        }

        let invoker = InvokerConfig {
            attempt_timeout: secs(
                "ANALYSIS_ATTEMPT_TIMEOUT_SECS",
                defaults.invoker.attempt_timeout,
            )?,
            max_retries: parse_or(&lookup, "ANALYSIS_MAX_RETRIES", defaults.invoker.max_retries)?,
            backoff_step: Duration::from_millis(parse_or(
                &lookup,
                "ANALYSIS_BACKOFF_MS",
                defaults.invoker.backoff_step.as_millis() as u64,
            )?),
        };

        Ok(EngineConfig {
            coordinator,
            invoker,
            prompt_token_ceiling: parse_or(
                &lookup,
                "PROMPT_TOKEN_CEILING",
                defaults.prompt_token_ceiling,
            )?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("'{key}' has invalid value '{raw}'")),
        None => Ok(default),
    }
}
