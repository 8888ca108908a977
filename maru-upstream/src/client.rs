//! Upstream client: per-attempt timeout, one retry for reads, outcome
//! classification and per-class circuit breaking.

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::classify::{classify_response, classify_transport_error};
use crate::http::HttpTransport;
use crate::request::{CallKind, UpstreamCall};
use crate::transport::UpstreamTransport;
use dashmap::DashMap;
use maru_core::constants::{DEFAULT_RETRY_BACKOFF_MS, MAX_READ_ATTEMPTS};
use maru_core::{
    CircuitBreakerSettings, ConfigError, GatewayConfig, UpstreamCallResult, UpstreamOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Reason reported when a breaker refuses a call.
pub const CIRCUIT_OPEN_REASON: &str = "circuit open";

/// Client for the trading system.
///
/// Never fails: every call ends in an [`UpstreamCallResult`] whose outcome
/// the caller decides how to surface.
pub struct UpstreamClient {
    transport: Arc<dyn UpstreamTransport>,
    retry_backoff: Duration,
    breaker_settings: CircuitBreakerSettings,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl UpstreamClient {
    pub fn new(transport: Arc<dyn UpstreamTransport>) -> Self {
        Self {
            transport,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            breaker_settings: CircuitBreakerSettings::default(),
            breakers: DashMap::new(),
        }
    }

    /// HTTP client configured from the gateway configuration.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Client over any transport, with retry and breaker settings taken
    /// from `config`.
    pub fn with_transport(transport: Arc<dyn UpstreamTransport>, config: &GatewayConfig) -> Self {
        Self::new(transport)
            .with_retry_backoff(config.retry_backoff())
            .with_circuit_breaker(config.circuit_breaker.clone())
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_circuit_breaker(mut self, settings: CircuitBreakerSettings) -> Self {
        self.breaker_settings = settings;
        self.breakers.clear();
        self
    }

    /// Perform one logical call.
    ///
    /// Reads are retried once, after the backoff, when the first attempt
    /// timed out or could not connect. Mutations and calls answered with
    /// an HTTP error are never retried. `attempts` is 0 when the class's
    /// circuit is open and the call was refused.
    pub async fn call(&self, call: UpstreamCall) -> UpstreamCallResult {
        let started = Instant::now();
        let breaker = self.breaker_for(&call.class);

        if let Some(breaker) = &breaker {
            if !breaker.is_allowed() {
                tracing::warn!(
                    class = %call.class,
                    key = %call.key,
                    "Circuit open, refusing upstream call"
                );
                return UpstreamCallResult::new(
                    UpstreamOutcome::ConnectionFailure {
                        reason: CIRCUIT_OPEN_REASON.to_string(),
                    },
                    started.elapsed(),
                    0,
                );
            }
        }

        let max_attempts = match call.kind {
            CallKind::Read => MAX_READ_ATTEMPTS,
            CallKind::Mutation => 1,
        };

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            let outcome = self.attempt(&call).await;
            if attempts < max_attempts && outcome.is_retryable() {
                tracing::info!(
                    class = %call.class,
                    key = %call.key,
                    attempt = attempts,
                    outcome = outcome.kind().as_str(),
                    "Retrying upstream read"
                );
                tokio::time::sleep(self.retry_backoff).await;
                continue;
            }
            break outcome;
        };

        if let Some(breaker) = &breaker {
            if outcome.kind().is_failure() {
                breaker.record_failure();
            } else {
                breaker.record_success();
            }
        }

        let result = UpstreamCallResult::new(outcome, started.elapsed(), attempts);
        match &result.outcome {
            UpstreamOutcome::Success(_) => tracing::debug!(
                class = %call.class,
                key = %call.key,
                latency_ms = result.latency_ms(),
                attempts,
                "Upstream call succeeded"
            ),
            other => tracing::warn!(
                class = %call.class,
                key = %call.key,
                method = call.request.method.as_str(),
                path = %call.request.path,
                request_id = %call.request.request_id,
                latency_ms = result.latency_ms(),
                attempts,
                outcome = other.kind().as_str(),
                "Upstream call failed"
            ),
        }
        result
    }

    async fn attempt(&self, call: &UpstreamCall) -> UpstreamOutcome {
        match tokio::time::timeout(call.timeout, self.transport.send(&call.request)).await {
            Err(_) => UpstreamOutcome::Timeout,
            Ok(Err(e)) => classify_transport_error(e),
            Ok(Ok(response)) => classify_response(response),
        }
    }

    fn breaker_for(&self, class: &str) -> Option<Arc<CircuitBreaker>> {
        if !self.breaker_settings.enabled {
            return None;
        }
        if let Some(existing) = self.breakers.get(class) {
            return Some(Arc::clone(existing.value()));
        }
        let breaker = self
            .breakers
            .entry(class.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(&self.breaker_settings)));
        Some(Arc::clone(breaker.value()))
    }

    /// State of the breaker for `class`, if one has been created.
    pub fn circuit_state(&self, class: &str) -> Option<CircuitState> {
        self.breakers.get(class).map(|b| b.state())
    }

    /// Close every breaker.
    pub fn reset_circuits(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("transport", &self.transport.name())
            .field("retry_backoff", &self.retry_backoff)
            .field("breakers", &self.breakers.len())
            .finish()
    }
}
