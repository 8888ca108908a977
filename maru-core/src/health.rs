//! Health report types
//!
//! Serializable views of upstream health, produced by the gateway's health
//! monitor and rendered by the dashboard's health page.

use crate::outcome::OutcomeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Health status for the upstream or one resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No failures in the sample window
    Healthy,
    /// Mixed successes and failures
    Degraded,
    /// No successes in the sample window
    Unhealthy,
    /// No upstream call recorded yet
    Unknown,
}

impl HealthStatus {
    /// Severity used to pick the worst status; `Unknown` ranks lowest.
    fn severity(&self) -> u8 {
        match self {
            HealthStatus::Unknown => 0,
            HealthStatus::Healthy => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 3,
        }
    }

    /// The more severe of two statuses.
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Status from the success and failure counts of a sample window.
    pub fn from_window(successes: usize, failures: usize) -> HealthStatus {
        match (successes, failures) {
            (0, 0) => HealthStatus::Unknown,
            (_, 0) => HealthStatus::Healthy,
            (0, _) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        }
    }
}

/// Reads served by the gateway for one class, by disposition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchCounts {
    pub fresh: u64,
    pub stale: u64,
    pub upstream: u64,
    pub errors: u64,
}

impl FetchCounts {
    pub fn total(&self) -> u64 {
        self.fresh + self.stale + self.upstream + self.errors
    }
}

/// Most recent failure of a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: OutcomeKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Health of one resource class over the sample window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHealth {
    pub status: HealthStatus,
    /// Samples currently in the window.
    pub window_size: usize,
    pub successes: usize,
    pub failures: usize,
    /// Lifetime count of upstream calls.
    pub total_calls: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub last_latency_ms: Option<u64>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub fetches: FetchCounts,
    pub invalidations: u64,
    /// Invalidations refused because the class is not registered.
    #[serde(default)]
    pub rejected_invalidations: u64,
}

/// Point-in-time health of the upstream as seen by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    /// Whether the most recent upstream call got an answer.
    pub connected: bool,
    /// Latency of the most recent upstream call.
    pub response_time_ms: Option<u64>,
    pub checked_at: DateTime<Utc>,
    pub resources: BTreeMap<String, ResourceHealth>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        let status: HealthStatus = serde_json::from_str("\"unhealthy\"").unwrap();
        assert_eq!(status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_from_window() {
        assert_eq!(HealthStatus::from_window(0, 0), HealthStatus::Unknown);
        assert_eq!(HealthStatus::from_window(10, 0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_window(0, 3), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::from_window(7, 3), HealthStatus::Degraded);
    }

    #[test]
    fn test_worst() {
        assert_eq!(
            HealthStatus::Healthy.worst(HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Unhealthy.worst(HealthStatus::Healthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthStatus::Unknown.worst(HealthStatus::Healthy),
            HealthStatus::Healthy
        );
    }

    #[test]
    fn test_fetch_counts_total() {
        let counts = FetchCounts {
            fresh: 5,
            stale: 1,
            upstream: 2,
            errors: 1,
        };
        assert_eq!(counts.total(), 9);
    }
}
