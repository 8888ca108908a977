//! Prometheus Metrics Definitions
//!
//! Every gateway owns its own [`Registry`], so several gateways (or tests)
//! in one process never collide on metric names.

use maru_core::{GatewayError, GatewayResult, ServedFrom, UpstreamCallResult};
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Upstream call latency buckets (seconds)
/// Covers: 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s, 30s, 60s
const UPSTREAM_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Label value for reads that ended in an error.
pub const SERVED_ERROR: &str = "error";

/// Container for all gateway metrics.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,

    /// Reads answered - labels: class, served_from (fresh/stale/upstream/error)
    pub fetch_total: CounterVec,

    /// Logical upstream calls - labels: class, outcome
    pub upstream_calls_total: CounterVec,

    /// Upstream call duration across attempts - labels: class
    pub upstream_call_duration_seconds: HistogramVec,

    /// Cache entries removed by invalidation - labels: class
    pub invalidations_total: CounterVec,

    /// Entries currently cached
    pub cache_entries: IntGauge,
}

fn registration_error(metric: &str, e: prometheus::Error) -> GatewayError {
    GatewayError::Telemetry {
        reason: format!("Failed to register {}: {}", metric, e),
    }
}

impl GatewayMetrics {
    /// Create all metrics and register them with a fresh registry.
    pub fn new() -> GatewayResult<Self> {
        let registry = Registry::new();

        let fetch_total = CounterVec::new(
            Opts::new("maru_gateway_fetch_total", "Reads answered by the gateway"),
            &["class", "served_from"],
        )
        .map_err(|e| registration_error("fetch_total", e))?;

        let upstream_calls_total = CounterVec::new(
            Opts::new(
                "maru_gateway_upstream_calls_total",
                "Logical calls made to the trading system",
            ),
            &["class", "outcome"],
        )
        .map_err(|e| registration_error("upstream_calls_total", e))?;

        let upstream_call_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "maru_gateway_upstream_call_duration_seconds",
                "Upstream call duration in seconds, including the retry",
            )
            .buckets(UPSTREAM_LATENCY_BUCKETS.to_vec()),
            &["class"],
        )
        .map_err(|e| registration_error("upstream_call_duration_seconds", e))?;

        let invalidations_total = CounterVec::new(
            Opts::new(
                "maru_gateway_invalidations_total",
                "Cache entries removed by invalidation",
            ),
            &["class"],
        )
        .map_err(|e| registration_error("invalidations_total", e))?;

        let cache_entries = IntGauge::new("maru_gateway_cache_entries", "Entries currently cached")
            .map_err(|e| registration_error("cache_entries", e))?;

        registry
            .register(Box::new(fetch_total.clone()))
            .map_err(|e| registration_error("fetch_total", e))?;
        registry
            .register(Box::new(upstream_calls_total.clone()))
            .map_err(|e| registration_error("upstream_calls_total", e))?;
        registry
            .register(Box::new(upstream_call_duration_seconds.clone()))
            .map_err(|e| registration_error("upstream_call_duration_seconds", e))?;
        registry
            .register(Box::new(invalidations_total.clone()))
            .map_err(|e| registration_error("invalidations_total", e))?;
        registry
            .register(Box::new(cache_entries.clone()))
            .map_err(|e| registration_error("cache_entries", e))?;

        Ok(Self {
            registry,
            fetch_total,
            upstream_calls_total,
            upstream_call_duration_seconds,
            invalidations_total,
            cache_entries,
        })
    }

    /// Record a read answered from `served_from`.
    pub fn record_fetch(&self, class: &str, served_from: ServedFrom) {
        self.fetch_total
            .with_label_values(&[class, served_from.as_str()])
            .inc();
    }

    /// Record a read that ended in an error.
    pub fn record_fetch_error(&self, class: &str) {
        self.fetch_total
            .with_label_values(&[class, SERVED_ERROR])
            .inc();
    }

    /// Record a completed upstream call.
    pub fn record_upstream_call(&self, class: &str, result: &UpstreamCallResult) {
        self.upstream_calls_total
            .with_label_values(&[class, result.outcome.kind().as_str()])
            .inc();
        self.upstream_call_duration_seconds
            .with_label_values(&[class])
            .observe(result.latency.as_secs_f64());
    }

    pub fn record_invalidation(&self, class: &str, removed: usize) {
        self.invalidations_total
            .with_label_values(&[class])
            .inc_by(removed as f64);
    }

    pub fn set_cache_entries(&self, entries: usize) {
        self.cache_entries
            .set(i64::try_from(entries).unwrap_or(i64::MAX));
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn render(&self) -> GatewayResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| GatewayError::Telemetry {
                reason: format!("Failed to encode metrics: {}", e),
            })?;

        String::from_utf8(buffer).map_err(|e| GatewayError::Telemetry {
            reason: format!("Invalid UTF-8 in metrics: {}", e),
        })
    }
}

impl std::fmt::Debug for GatewayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maru_core::UpstreamOutcome;
    use std::time::Duration;

    #[test]
    fn test_independent_registries() -> Result<(), String> {
        let first = GatewayMetrics::new().map_err(|e| e.to_string())?;
        let second = GatewayMetrics::new().map_err(|e| e.to_string())?;

        first.record_fetch("accounts", ServedFrom::Fresh);
        assert_eq!(
            first
                .fetch_total
                .with_label_values(&["accounts", "fresh"])
                .get(),
            1.0
        );
        assert_eq!(
            second
                .fetch_total
                .with_label_values(&["accounts", "fresh"])
                .get(),
            0.0
        );
        Ok(())
    }

    #[test]
    fn test_render_includes_recorded_series() -> Result<(), String> {
        let metrics = GatewayMetrics::new().map_err(|e| e.to_string())?;
        metrics.record_fetch("orders", ServedFrom::Stale);
        metrics.record_fetch_error("orders");
        metrics.record_upstream_call(
            "orders",
            &UpstreamCallResult::new(UpstreamOutcome::Timeout, Duration::from_millis(120), 2),
        );
        metrics.record_invalidation("orders", 3);
        metrics.set_cache_entries(7);

        let output = metrics.render().map_err(|e| e.to_string())?;
        assert!(output.contains("maru_gateway_fetch_total"));
        assert!(output.contains("served_from=\"stale\""));
        assert!(output.contains("served_from=\"error\""));
        assert!(output.contains("outcome=\"timeout\""));
        assert!(output.contains("maru_gateway_upstream_call_duration_seconds_bucket"));
        assert!(output.contains("maru_gateway_invalidations_total{class=\"orders\"} 3"));
        assert!(output.contains("maru_gateway_cache_entries 7"));
        Ok(())
    }
}
