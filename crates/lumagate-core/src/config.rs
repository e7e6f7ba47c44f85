//! Gateway configuration.
//!
//! All knobs are plain numbers supplied at construction time. Values come from
//! the built-in [`defaults`], an optional TOML file and finally environment
//! variables (see [`env_vars`]). There is no dynamic reconfiguration.
//!
//! ```toml
//! [retry]
//! max_retries = 3
//! initial_backoff_ms = 1000
//! max_backoff_ms = 10000
//!
//! [queue]
//! coalesce_window_ms = 200
//! executor_timeout_ms = 30000
//!
//! [cache]
//! ttl_ms = 30000
//! max_size = 100
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default values for every configuration knob.
pub mod defaults {
    /// Retries after the initial attempt.
    pub const MAX_RETRIES: u32 = 3;
    /// First backoff delay in milliseconds.
    pub const INITIAL_BACKOFF_MS: u64 = 1_000;
    /// Backoff cap in milliseconds.
    pub const MAX_BACKOFF_MS: u64 = 10_000;
    /// Same-kind commands closer than this are coalesced. 0 disables merging.
    pub const COALESCE_WINDOW_MS: u64 = 200;
    /// Upper bound for one executor call. 0 disables the timeout.
    pub const EXECUTOR_TIMEOUT_MS: u64 = 30_000;
    /// Read cache entry lifetime in milliseconds.
    pub const CACHE_TTL_MS: u64 = 30_000;
    /// Read cache capacity.
    pub const CACHE_MAX_SIZE: usize = 100;
}

/// Environment variable names.
pub mod env_vars {
    pub const MAX_RETRIES: &str = "LUMAGATE_MAX_RETRIES";
    pub const INITIAL_BACKOFF_MS: &str = "LUMAGATE_INITIAL_BACKOFF_MS";
    pub const MAX_BACKOFF_MS: &str = "LUMAGATE_MAX_BACKOFF_MS";
    pub const COALESCE_WINDOW_MS: &str = "LUMAGATE_COALESCE_WINDOW_MS";
    pub const EXECUTOR_TIMEOUT_MS: &str = "LUMAGATE_EXECUTOR_TIMEOUT_MS";
    pub const CACHE_TTL_MS: &str = "LUMAGATE_CACHE_TTL_MS";
    pub const CACHE_MAX_SIZE: &str = "LUMAGATE_CACHE_MAX_SIZE";
    /// Switches the CLI to JSON log output.
    pub const LOG_JSON: &str = "LUMAGATE_LOG_JSON";
}

/// Retry executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

/// Command queue settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,
    #[serde(default = "default_executor_timeout_ms")]
    pub executor_timeout_ms: u64,
}

/// Read cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_max_retries() -> u32 {
    defaults::MAX_RETRIES
}
fn default_initial_backoff_ms() -> u64 {
    defaults::INITIAL_BACKOFF_MS
}
fn default_max_backoff_ms() -> u64 {
    defaults::MAX_BACKOFF_MS
}
fn default_coalesce_window_ms() -> u64 {
    defaults::COALESCE_WINDOW_MS
}
fn default_executor_timeout_ms() -> u64 {
    defaults::EXECUTOR_TIMEOUT_MS
}
fn default_cache_ttl_ms() -> u64 {
    defaults::CACHE_TTL_MS
}
fn default_cache_max_size() -> usize {
    defaults::CACHE_MAX_SIZE
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: default_coalesce_window_ms(),
            executor_timeout_ms: default_executor_timeout_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_cache_ttl_ms(),
            max_size: default_cache_max_size(),
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl QueueConfig {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    /// `None` when the timeout is disabled.
    pub fn executor_timeout(&self) -> Option<Duration> {
        (self.executor_timeout_ms > 0).then(|| Duration::from_millis(self.executor_timeout_ms))
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl GatewayConfig {
    /// Parse a TOML document. Missing sections and fields take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from an optional file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `LUMAGATE_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override fields from an arbitrary key lookup. Unparseable values are
    /// ignored with a warning.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_value(&lookup, env_vars::MAX_RETRIES, &mut self.retry.max_retries);
        override_value(
            &lookup,
            env_vars::INITIAL_BACKOFF_MS,
            &mut self.retry.initial_backoff_ms,
        );
        override_value(&lookup, env_vars::MAX_BACKOFF_MS, &mut self.retry.max_backoff_ms);
        override_value(
            &lookup,
            env_vars::COALESCE_WINDOW_MS,
            &mut self.queue.coalesce_window_ms,
        );
        override_value(
            &lookup,
            env_vars::EXECUTOR_TIMEOUT_MS,
            &mut self.queue.executor_timeout_ms,
        );
        override_value(&lookup, env_vars::CACHE_TTL_MS, &mut self.cache.ttl_ms);
        override_value(&lookup, env_vars::CACHE_MAX_SIZE, &mut self.cache.max_size);
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(Error::InvalidConfiguration(format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms, self.retry.max_backoff_ms
            )));
        }
        if self.cache.max_size == 0 {
            return Err(Error::InvalidConfiguration(
                "cache.max_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn override_value<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable configuration override"),
    }
}
