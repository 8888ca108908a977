//! Gateway Configuration Module
//!
//! Configuration can be built in code, parsed from TOML, or loaded from
//! environment variables with defaults suitable for local development.
//! Per-resource maps override the built-in cache policies by class name.

use crate::constants::*;
use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// CIRCUIT BREAKER SETTINGS
// ============================================================================

/// Per-resource-class circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Consecutive successes in half-open state before it closes.
    pub success_threshold: u32,
    /// How long the circuit stays open before probing again.
    pub open_duration_ms: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_BREAKER_SUCCESS_THRESHOLD,
            open_duration_ms: DEFAULT_BREAKER_OPEN_DURATION_MS,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }
}

// ============================================================================
// GATEWAY CONFIGURATION
// ============================================================================

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the trading system REST API.
    pub upstream_base_url: String,

    /// Per-attempt timeout for classes without their own.
    pub default_timeout_ms: u64,

    /// TCP connect timeout.
    pub connect_timeout_ms: u64,

    /// Class name → per-attempt timeout.
    pub per_resource_timeout_ms: HashMap<String, u64>,

    /// Class name → TTL.
    pub per_resource_ttl_ms: HashMap<String, u64>,

    /// Class name → whether stale entries may be served on failure.
    pub stale_on_failure: HashMap<String, bool>,

    /// Wait before the single retry of an idempotent read.
    pub retry_backoff_ms: u64,

    /// Maximum number of cached entries across all classes.
    pub cache_max_entries: usize,

    /// Upstream call samples kept per class by the health monitor.
    pub health_window: usize,

    pub circuit_breaker: CircuitBreakerSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            per_resource_timeout_ms: HashMap::new(),
            per_resource_ttl_ms: HashMap::new(),
            stale_on_failure: HashMap::new(),
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            health_window: DEFAULT_HEALTH_WINDOW,
            circuit_breaker: CircuitBreakerSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Create GatewayConfig from environment variables.
    ///
    /// Environment variables:
    /// - `MARU_UPSTREAM_BASE_URL`: trading API base URL (default: http://localhost:8099)
    /// - `MARU_DEFAULT_TIMEOUT_MS`: per-attempt timeout (default: 10000)
    /// - `MARU_CONNECT_TIMEOUT_MS`: connect timeout (default: 5000)
    /// - `MARU_RETRY_BACKOFF_MS`: wait before a read retry (default: 500)
    /// - `MARU_CACHE_MAX_ENTRIES`: cache capacity (default: 1000)
    /// - `MARU_HEALTH_WINDOW`: samples kept per class (default: 100)
    /// - `MARU_CIRCUIT_BREAKER_ENABLED`: "true" or "false" (default: true)
    ///
    /// Per-resource maps are not read from the environment; use a TOML file.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let upstream_base_url = std::env::var("MARU_UPSTREAM_BASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.upstream_base_url);

        let default_timeout_ms = std::env::var("MARU_DEFAULT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.default_timeout_ms);

        let connect_timeout_ms = std::env::var("MARU_CONNECT_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.connect_timeout_ms);

        let retry_backoff_ms = std::env::var("MARU_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.retry_backoff_ms);

        let cache_max_entries = std::env::var("MARU_CACHE_MAX_ENTRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cache_max_entries);

        let health_window = std::env::var("MARU_HEALTH_WINDOW")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.health_window);

        let breaker_enabled = std::env::var("MARU_CIRCUIT_BREAKER_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            upstream_base_url,
            default_timeout_ms,
            connect_timeout_ms,
            retry_backoff_ms,
            cache_max_entries,
            health_window,
            circuit_breaker: CircuitBreakerSettings {
                enabled: breaker_enabled,
                ..defaults.circuit_breaker
            },
            ..Self::default()
        }
    }

    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(input: &str) -> ConfigResult<Self> {
        toml::from_str(input).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check the values that would otherwise fail at request time.
    pub fn validate(&self) -> ConfigResult<()> {
        let url = url::Url::parse(&self.upstream_base_url).map_err(|e| {
            ConfigError::InvalidValue {
                field: "upstream_base_url".to_string(),
                value: self.upstream_base_url.clone(),
                reason: e.to_string(),
            }
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                field: "upstream_base_url".to_string(),
                value: self.upstream_base_url.clone(),
                reason: "scheme must be http or https".to_string(),
            });
        }

        non_zero("default_timeout_ms", self.default_timeout_ms)?;
        non_zero("connect_timeout_ms", self.connect_timeout_ms)?;
        non_zero("cache_max_entries", self.cache_max_entries as u64)?;
        non_zero("health_window", self.health_window as u64)?;
        if self.circuit_breaker.enabled {
            non_zero(
                "circuit_breaker.failure_threshold",
                u64::from(self.circuit_breaker.failure_threshold),
            )?;
            non_zero(
                "circuit_breaker.success_threshold",
                u64::from(self.circuit_breaker.success_threshold),
            )?;
        }

        for (class, ms) in &self.per_resource_timeout_ms {
            non_zero(&format!("per_resource_timeout_ms.{}", class), *ms)?;
        }
        for (class, ms) in &self.per_resource_ttl_ms {
            non_zero(&format!("per_resource_ttl_ms.{}", class), *ms)?;
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Set the TTL override for a class.
    pub fn with_ttl(mut self, class: impl Into<String>, ttl: Duration) -> Self {
        self.per_resource_ttl_ms
            .insert(class.into(), duration_ms(ttl));
        self
    }

    /// Set the timeout override for a class.
    pub fn with_timeout(mut self, class: impl Into<String>, timeout: Duration) -> Self {
        self.per_resource_timeout_ms
            .insert(class.into(), duration_ms(timeout));
        self
    }

    /// Set the stale-serving override for a class.
    pub fn with_stale_on_failure(mut self, class: impl Into<String>, enabled: bool) -> Self {
        self.stale_on_failure.insert(class.into(), enabled);
        self
    }

    pub fn with_upstream_base_url(mut self, url: impl Into<String>) -> Self {
        self.upstream_base_url = url.into();
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff_ms = duration_ms(backoff);
        self
    }

    pub fn with_circuit_breaker(mut self, settings: CircuitBreakerSettings) -> Self {
        self.circuit_breaker = settings;
        self
    }
}

fn non_zero(field: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
