//! Upstream health tracking
//!
//! A bounded window of call samples per resource class, plus lifetime
//! counters, rolled up into the [`HealthSnapshot`] the health page renders.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use maru_core::constants::DEFAULT_HEALTH_WINDOW;
use maru_core::{
    FetchCounts, HealthSnapshot, HealthStatus, LastError, OutcomeKind, ResourceHealth,
    UpstreamCallResult, UpstreamOutcome,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// How a read was answered, as counted by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDisposition {
    Fresh,
    Stale,
    Upstream,
    Error,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    kind: OutcomeKind,
    latency_ms: u64,
}

#[derive(Debug, Default)]
struct ClassHealth {
    samples: VecDeque<Sample>,
    total_calls: u64,
    last_latency_ms: Option<u64>,
    last_success_at: Option<DateTime<Utc>>,
    last_error: Option<LastError>,
    fetches: FetchCounts,
    invalidations: u64,
    rejected_invalidations: u64,
}

#[derive(Debug, Clone, Copy)]
struct LatestCall {
    kind: OutcomeKind,
    latency_ms: u64,
}

/// Rolling per-class record of upstream calls, reads and invalidations.
#[derive(Debug)]
pub struct HealthMonitor {
    window: usize,
    classes: DashMap<String, ClassHealth>,
    latest: Mutex<Option<LatestCall>>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_WINDOW)
    }
}

impl HealthMonitor {
    /// Monitor keeping at most `window` samples per class.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            classes: DashMap::new(),
            latest: Mutex::new(None),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Record one completed upstream call. The oldest sample is dropped
    /// once the window is full.
    pub fn record_call(&self, class: &str, result: &UpstreamCallResult) {
        let kind = result.outcome.kind();
        let latency_ms = result.latency_ms();

        {
            let mut health = self.classes.entry(class.to_string()).or_default();
            if health.samples.len() >= self.window {
                health.samples.pop_front();
            }
            health.samples.push_back(Sample { kind, latency_ms });
            health.total_calls += 1;
            health.last_latency_ms = Some(latency_ms);

            match &result.outcome {
                UpstreamOutcome::Success(_) => {
                    health.last_success_at = Some(result.completed_at);
                }
                failure => {
                    health.last_error = Some(LastError {
                        kind,
                        message: describe(failure),
                        at: result.completed_at,
                    });
                }
            }
        }

        *self.latest() = Some(LatestCall { kind, latency_ms });
    }

    pub fn record_fetch(&self, class: &str, disposition: FetchDisposition) {
        let mut health = self.classes.entry(class.to_string()).or_default();
        let counter = match disposition {
            FetchDisposition::Fresh => &mut health.fetches.fresh,
            FetchDisposition::Stale => &mut health.fetches.stale,
            FetchDisposition::Upstream => &mut health.fetches.upstream,
            FetchDisposition::Error => &mut health.fetches.errors,
        };
        *counter += 1;
    }

    pub fn record_invalidation(&self, class: &str, removed: usize) {
        let mut health = self.classes.entry(class.to_string()).or_default();
        health.invalidations += removed as u64;
    }

    pub fn record_rejected_invalidation(&self, class: &str) {
        let mut health = self.classes.entry(class.to_string()).or_default();
        health.rejected_invalidations += 1;
    }

    /// Point-in-time view of every class seen so far.
    ///
    /// The overall status is `Unknown` until some class has samples,
    /// `Healthy` or `Unhealthy` when every sampled class agrees, and
    /// `Degraded` otherwise.
    pub fn snapshot(&self) -> HealthSnapshot {
        let resources: BTreeMap<String, ResourceHealth> = self
            .classes
            .iter()
            .map(|entry| (entry.key().clone(), summarize(entry.value())))
            .collect();

        let status = overall_status(resources.values().map(|r| r.status));
        let latest = *self.latest();

        HealthSnapshot {
            status,
            connected: latest.is_some_and(|call| call.kind.reached_upstream()),
            response_time_ms: latest.map(|call| call.latency_ms),
            checked_at: Utc::now(),
            resources,
        }
    }

    fn latest(&self) -> MutexGuard<'_, Option<LatestCall>> {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn describe(outcome: &UpstreamOutcome) -> String {
    match outcome {
        UpstreamOutcome::Success(_) => String::new(),
        UpstreamOutcome::Timeout => "upstream timed out".to_string(),
        UpstreamOutcome::ConnectionFailure { reason } => reason.clone(),
        UpstreamOutcome::ClientError { code, message }
        | UpstreamOutcome::ServerError { code, message } => format!("HTTP {}: {}", code, message),
    }
}

fn summarize(health: &ClassHealth) -> ResourceHealth {
    let failures = health
        .samples
        .iter()
        .filter(|sample| sample.kind.is_failure())
        .count();
    let successes = health.samples.len() - failures;

    let mut latencies: Vec<u64> = health.samples.iter().map(|s| s.latency_ms).collect();
    latencies.sort_unstable();

    ResourceHealth {
        status: HealthStatus::from_window(successes, failures),
        window_size: health.samples.len(),
        successes,
        failures,
        total_calls: health.total_calls,
        p50_ms: percentile(&latencies, 50),
        p95_ms: percentile(&latencies, 95),
        p99_ms: percentile(&latencies, 99),
        last_latency_ms: health.last_latency_ms,
        last_success_at: health.last_success_at,
        last_error: health.last_error.clone(),
        fetches: health.fetches,
        invalidations: health.invalidations,
        rejected_invalidations: health.rejected_invalidations,
    }
}

/// Nearest-rank percentile of an ascending slice.
fn percentile(sorted: &[u64], p: usize) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p * sorted.len()).div_ceil(100).max(1);
    sorted.get(rank - 1).copied()
}

fn overall_status(statuses: impl Iterator<Item = HealthStatus>) -> HealthStatus {
    let mut overall = HealthStatus::Unknown;
    for status in statuses {
        overall = match (overall, status) {
            (current, HealthStatus::Unknown) => current,
            (HealthStatus::Unknown, next) => next,
            (current, next) if current == next => current,
            _ => HealthStatus::Degraded,
        };
    }
    overall
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn call(outcome: UpstreamOutcome, latency_ms: u64) -> UpstreamCallResult {
        UpstreamCallResult::new(outcome, Duration::from_millis(latency_ms), 1)
    }

    fn ok(latency_ms: u64) -> UpstreamCallResult {
        call(UpstreamOutcome::Success(Arc::new(json!({}))), latency_ms)
    }

    #[test]
    fn test_empty_monitor_is_unknown() {
        let monitor = HealthMonitor::new(10);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.status, HealthStatus::Unknown);
        assert!(!snapshot.connected);
        assert!(snapshot.response_time_ms.is_none());
        assert!(snapshot.resources.is_empty());
    }

    #[test]
    fn test_window_evicts_oldest() {
        let monitor = HealthMonitor::new(3);
        monitor.record_call("accounts", &call(UpstreamOutcome::Timeout, 1_000));
        for latency in [10, 20, 30] {
            monitor.record_call("accounts", &ok(latency));
        }

        let snapshot = monitor.snapshot();
        let accounts = &snapshot.resources["accounts"];
        assert_eq!(accounts.window_size, 3);
        assert_eq!(accounts.failures, 0);
        assert_eq!(accounts.status, HealthStatus::Healthy);
        assert_eq!(accounts.total_calls, 4);
        // The timeout left the window but is still the last error.
        assert_eq!(
            accounts.last_error.as_ref().map(|e| e.kind),
            Some(OutcomeKind::Timeout)
        );
    }

    #[test]
    fn test_status_per_class() {
        let monitor = HealthMonitor::new(10);
        monitor.record_call("orders", &ok(5));
        monitor.record_call(
            "orders",
            &call(
                UpstreamOutcome::ServerError {
                    code: 500,
                    message: "boom".to_string(),
                },
                5,
            ),
        );
        monitor.record_call(
            "positions",
            &call(
                UpstreamOutcome::ConnectionFailure {
                    reason: "refused".to_string(),
                },
                1,
            ),
        );

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.resources["orders"].status, HealthStatus::Degraded);
        assert_eq!(
            snapshot.resources["positions"].status,
            HealthStatus::Unhealthy
        );
        assert_eq!(snapshot.status, HealthStatus::Degraded);
        assert!(!snapshot.connected);
        assert_eq!(
            snapshot.resources["orders"]
                .last_error
                .as_ref()
                .map(|e| e.message.as_str()),
            Some("HTTP 500: boom")
        );
    }

    #[test]
    fn test_client_error_is_not_a_failure() {
        let monitor = HealthMonitor::new(10);
        monitor.record_call(
            "accounts",
            &call(
                UpstreamOutcome::ClientError {
                    code: 404,
                    message: "Account not found".to_string(),
                },
                8,
            ),
        );
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.resources["accounts"].status, HealthStatus::Healthy);
        assert!(snapshot.connected);
        assert_eq!(snapshot.response_time_ms, Some(8));
    }

    #[test]
    fn test_nearest_rank_percentiles() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&sorted, 50), Some(50));
        assert_eq!(percentile(&sorted, 95), Some(95));
        assert_eq!(percentile(&sorted, 99), Some(99));
        assert_eq!(percentile(&[42], 99), Some(42));
        assert_eq!(percentile(&[1, 2, 3, 4], 50), Some(2));
        assert_eq!(percentile(&[], 50), None);
    }

    #[test]
    fn test_fetch_and_invalidation_counters() {
        let monitor = HealthMonitor::new(10);
        monitor.record_fetch("instruments", FetchDisposition::Fresh);
        monitor.record_fetch("instruments", FetchDisposition::Fresh);
        monitor.record_fetch("instruments", FetchDisposition::Stale);
        monitor.record_fetch("instruments", FetchDisposition::Error);
        monitor.record_invalidation("instruments", 4);

        let snapshot = monitor.snapshot();
        let instruments = &snapshot.resources["instruments"];
        assert_eq!(instruments.fetches.fresh, 2);
        assert_eq!(instruments.fetches.stale, 1);
        assert_eq!(instruments.fetches.errors, 1);
        assert_eq!(instruments.fetches.total(), 4);
        assert_eq!(instruments.invalidations, 4);
        assert_eq!(instruments.status, HealthStatus::Unknown);
        assert_eq!(snapshot.status, HealthStatus::Unknown);
    }

    #[test]
    fn test_overall_status_rollup() {
        use HealthStatus::*;
        assert_eq!(overall_status([Healthy, Unknown].into_iter()), Healthy);
        assert_eq!(overall_status([Unhealthy, Unhealthy].into_iter()), Unhealthy);
        assert_eq!(overall_status([Healthy, Unhealthy].into_iter()), Degraded);
        assert_eq!(overall_status(std::iter::empty()), Unknown);
    }
}
