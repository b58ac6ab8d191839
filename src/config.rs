//! Construction-time configuration.
//!
//! All values are read once when components are built; nothing hot-reloads.
//! Every knob has a sensible default and an environment override, so a
//! zero-config construction is always valid. The coordination-store URL is
//! optional: absence selects fully functional local-only mode.

use crate::cache::CacheSettings;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Admission Controller settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub max_concurrent: usize,
    /// Default `acquire` timeout used by the facade.
    pub default_timeout_ms: u64,
    /// Polling interval for store-backed admission.
    pub poll_interval_ms: u64,
    /// Optional shared coordination store; `None` means local-only mode.
    pub store_url: Option<Url>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            default_timeout_ms: 30_000,
            poll_interval_ms: 50,
            store_url: None,
        }
    }
}

impl AdmissionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Resource Governor settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub max_concurrent: usize,
    /// Hard ceiling on resident memory; breaching it fails acquisition.
    pub max_memory_mb: u64,
    /// Soft CPU threshold; breaching it only logs a warning.
    pub max_cpu_percent: f64,
    pub default_timeout_ms: u64,
    /// Capacity of the rolling execution-time window.
    pub execution_window: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            max_memory_mb: 4096,
            max_cpu_percent: 85.0,
            default_timeout_ms: 60_000,
            execution_window: 256,
        }
    }
}

impl GovernorConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Retry/backoff discipline for the protected remote call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, min_delay_ms: 250, max_delay_ms: 10_000, jitter: true }
    }
}

/// Serde-facing cache section; converted into [`CacheSettings`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub default_ttl_secs: u64,
    /// Per-operation TTL table in seconds.
    pub ttl_by_operation_secs: HashMap<String, u64>,
    pub max_entry_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1024,
            default_ttl_secs: 3600,
            ttl_by_operation_secs: HashMap::new(),
            max_entry_size: 10 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn settings(&self) -> CacheSettings {
        CacheSettings {
            enabled: self.enabled,
            default_ttl: Duration::from_secs(self.default_ttl_secs),
            ttl_by_operation: self
                .ttl_by_operation_secs
                .iter()
                .map(|(k, v)| (k.clone(), Duration::from_secs(*v)))
                .collect(),
            max_entry_size: self.max_entry_size,
        }
    }
}

/// Top-level configuration for the whole protection layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub admission: AdmissionConfig,
    pub governor: GovernorConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
}

impl GateConfig {
    /// Defaults overridden by `VIDGATE_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.admission.max_concurrent =
            env_parse("VIDGATE_MAX_CONCURRENT", cfg.admission.max_concurrent);
        cfg.admission.default_timeout_ms =
            env_parse("VIDGATE_ADMISSION_TIMEOUT_MS", cfg.admission.default_timeout_ms);
        cfg.admission.poll_interval_ms =
            env_parse("VIDGATE_STORE_POLL_INTERVAL_MS", cfg.admission.poll_interval_ms);
        cfg.admission.store_url =
            env::var("VIDGATE_STORE_URL").ok().and_then(|s| Url::parse(&s).ok());

        cfg.governor.max_concurrent =
            env_parse("VIDGATE_GOVERNOR_MAX_CONCURRENT", cfg.governor.max_concurrent);
        cfg.governor.max_memory_mb = env_parse("VIDGATE_MAX_MEMORY_MB", cfg.governor.max_memory_mb);
        cfg.governor.max_cpu_percent =
            env_parse("VIDGATE_MAX_CPU_PERCENT", cfg.governor.max_cpu_percent);
        cfg.governor.default_timeout_ms =
            env_parse("VIDGATE_GOVERNOR_TIMEOUT_MS", cfg.governor.default_timeout_ms);

        cfg.cache.enabled = env_parse("VIDGATE_CACHE_ENABLED", cfg.cache.enabled);
        cfg.cache.max_entries = env_parse("VIDGATE_CACHE_MAX_ENTRIES", cfg.cache.max_entries);
        cfg.cache.default_ttl_secs =
            env_parse("VIDGATE_CACHE_TTL_SECS", cfg.cache.default_ttl_secs);

        cfg.retry.max_retries = env_parse("VIDGATE_RETRY_MAX", cfg.retry.max_retries);
        cfg.retry.min_delay_ms = env_parse("VIDGATE_RETRY_MIN_DELAY_MS", cfg.retry.min_delay_ms);
        cfg.retry.max_delay_ms = env_parse("VIDGATE_RETRY_MAX_DELAY_MS", cfg.retry.max_delay_ms);
        cfg
    }
}
