//! Upstream call outcomes and read provenance.

use crate::error::GatewayError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Classified result of one logical upstream call.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamOutcome {
    /// 2xx with a decoded JSON payload (`null` for an empty body).
    Success(Arc<Value>),
    /// No answer within the per-attempt timeout.
    Timeout,
    /// The upstream could not be reached (refused, reset, DNS, open circuit).
    ConnectionFailure { reason: String },
    /// 4xx: the request was wrong.
    ClientError { code: u16, message: String },
    /// 5xx or an undecodable success body.
    ServerError { code: u16, message: String },
}

impl UpstreamOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            UpstreamOutcome::Success(_) => OutcomeKind::Success,
            UpstreamOutcome::Timeout => OutcomeKind::Timeout,
            UpstreamOutcome::ConnectionFailure { .. } => OutcomeKind::ConnectionFailure,
            UpstreamOutcome::ClientError { .. } => OutcomeKind::ClientError,
            UpstreamOutcome::ServerError { .. } => OutcomeKind::ServerError,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UpstreamOutcome::Success(_))
    }

    /// Timeouts and connection failures are the only outcomes a read may
    /// be retried on.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamOutcome::Timeout | UpstreamOutcome::ConnectionFailure { .. }
        )
    }

    /// The payload, or the caller-facing error for a non-success outcome.
    pub fn to_result(&self, class: &str, key: &str) -> Result<Arc<Value>, GatewayError> {
        match self {
            UpstreamOutcome::Success(payload) => Ok(Arc::clone(payload)),
            UpstreamOutcome::Timeout => Err(GatewayError::UpstreamTimeout {
                class: class.to_string(),
                key: key.to_string(),
            }),
            UpstreamOutcome::ConnectionFailure { reason } => {
                Err(GatewayError::UpstreamConnectionFailure {
                    class: class.to_string(),
                    reason: reason.clone(),
                })
            }
            UpstreamOutcome::ClientError { code, message } => {
                Err(GatewayError::UpstreamClientError {
                    class: class.to_string(),
                    code: *code,
                    message: message.clone(),
                })
            }
            UpstreamOutcome::ServerError { code, message } => {
                Err(GatewayError::UpstreamServerError {
                    class: class.to_string(),
                    code: *code,
                    message: message.clone(),
                })
            }
        }
    }

    /// The caller-facing error, `None` for a success.
    pub fn to_error(&self, class: &str, key: &str) -> Option<GatewayError> {
        self.to_result(class, key).err()
    }
}

/// Payload-free discriminant of [`UpstreamOutcome`], used for health
/// samples and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    Timeout,
    ConnectionFailure,
    ClientError,
    ServerError,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::ConnectionFailure => "connection_failure",
            OutcomeKind::ClientError => "client_error",
            OutcomeKind::ServerError => "server_error",
        }
    }

    /// Whether the upstream answered at all.
    pub fn reached_upstream(&self) -> bool {
        !matches!(self, OutcomeKind::Timeout | OutcomeKind::ConnectionFailure)
    }

    /// Whether the outcome indicates an unhealthy upstream. Client errors
    /// are the caller's fault and do not count.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            OutcomeKind::Timeout | OutcomeKind::ConnectionFailure | OutcomeKind::ServerError
        )
    }
}

/// Outcome of a logical upstream call together with its measurements.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamCallResult {
    pub outcome: UpstreamOutcome,
    /// Wall time across all attempts.
    pub latency: Duration,
    /// 1, or 2 when a read was retried. 0 when an open circuit refused the call.
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

impl UpstreamCallResult {
    pub fn new(outcome: UpstreamOutcome, latency: Duration, attempts: u32) -> Self {
        Self {
            outcome,
            latency,
            attempts,
            completed_at: Utc::now(),
        }
    }

    pub fn latency_ms(&self) -> u64 {
        u64::try_from(self.latency.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Where a successful read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServedFrom {
    /// Cache entry younger than its TTL.
    Fresh,
    /// Cache entry past its TTL served because the upstream failed.
    Stale,
    /// Just fetched from the upstream.
    Upstream,
}

impl ServedFrom {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServedFrom::Fresh => "fresh",
            ServedFrom::Stale => "stale",
            ServedFrom::Upstream => "upstream",
        }
    }
}
