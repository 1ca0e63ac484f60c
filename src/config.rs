//! Runtime configuration loading from environment variables.
//!
//! All configuration values are loaded from `GG_DISPATCH_*` environment
//! variables with sensible defaults. Invalid values fall back to defaults
//! without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `GG_DISPATCH_NETWORK_THREADS` | 4 | Network workers (0 = CPU count) |
//! | `GG_DISPATCH_TIMEOUT_MS` | 2500 | Initial per-attempt timeout (ms) |
//! | `GG_DISPATCH_MAX_RETRIES` | 1 | Retries of the default policy |
//! | `GG_DISPATCH_BACKOFF_MULTIPLIER` | 1.0 | Timeout growth per retry |
//! | `GG_DISPATCH_CACHE_MAX_ENTRIES` | 1024 | `MemoryCache` capacity |
//! | `GG_DISPATCH_LOG_LEVEL` | info | Log filter directive |
//! | `GG_DISPATCH_LOG_FORMAT` | json | `json` or `pretty` |

use std::time::Duration;

use serde::Serialize;

use crate::cache::MemoryCacheConfig;
use crate::request::RetryConfig;
use crate::telemetry::{LogConfig, LogFormat};
use crate::EngineConfig;

/// Upper bound on the backoff multiplier.
const MAX_BACKOFF_MULTIPLIER: f32 = 16.0;

/// Effective runtime configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub network_threads: usize,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_multiplier: f32,
    pub cache_max_entries: usize,
    pub log_level: String,
    pub log_format: LogFormat,
}

/// All runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub engine: EngineConfig,
    pub cache: MemoryCacheConfig,
    pub log: LogConfig,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a finite `f32` env var, returning `default` on missing or invalid.
fn parse_f32(key: &str, default: f32) -> f32 {
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .unwrap_or(default),
        Err(_) => default,
    }
}

/// Load default retry parameters from environment.
fn load_retry_config() -> RetryConfig {
    let timeout_ms = parse_u64("GG_DISPATCH_TIMEOUT_MS", 2500).max(1);
    let max_retries = parse_u32("GG_DISPATCH_MAX_RETRIES", 1);
    let backoff_multiplier =
        parse_f32("GG_DISPATCH_BACKOFF_MULTIPLIER", 1.0).clamp(0.0, MAX_BACKOFF_MULTIPLIER);
    RetryConfig {
        initial_timeout: Duration::from_millis(timeout_ms),
        max_retries,
        backoff_multiplier,
    }
}

/// Load logging configuration from environment.
fn load_log_config() -> LogConfig {
    let level = std::env::var("GG_DISPATCH_LOG_LEVEL")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "info".to_string());
    let format = std::env::var("GG_DISPATCH_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse::<LogFormat>().ok())
        .unwrap_or_default();
    LogConfig { format, level, output_path: None }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let network_threads = parse_usize("GG_DISPATCH_NETWORK_THREADS", 4).min(256);
    let max_entries = parse_usize("GG_DISPATCH_CACHE_MAX_ENTRIES", 1024);

    EnvConfig {
        engine: EngineConfig {
            network_threads,
            default_retry: load_retry_config(),
        },
        cache: MemoryCacheConfig { max_entries },
        log: load_log_config(),
    }
}

impl EnvConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        let retry = &self.engine.default_retry;
        EffectiveConfig {
            network_threads: self.engine.resolved_network_threads(),
            timeout_ms: retry.initial_timeout.as_millis() as u64,
            max_retries: retry.max_retries,
            backoff_multiplier: retry.backoff_multiplier,
            cache_max_entries: self.cache.max_entries,
            log_level: self.log.level.clone(),
            log_format: self.log.format,
        }
    }
}
