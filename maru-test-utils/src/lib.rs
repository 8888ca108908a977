//! MARU Test Utilities
//!
//! Shared test infrastructure for the MARU workspace:
//! - A scripted upstream transport with per-path response queues
//! - Proptest generators for gateway types
//! - Fixtures for configurations and policies
//! - Assertions over gateway errors

pub use maru_core::{
    CachePolicy, CachePolicyRegistry, CircuitBreakerSettings, GatewayConfig, GatewayError,
    GatewayResult, OutcomeKind, ResourceClass, ServedFrom, UpstreamOutcome,
};
pub use maru_upstream::{RawResponse, TransportError, UpstreamRequest, UpstreamTransport};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

// ============================================================================
// SCRIPTED TRANSPORT
// ============================================================================

/// What a scripted step answers with.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// HTTP status with a JSON body.
    Json(u16, Value),
    /// HTTP status with raw bytes.
    Raw(u16, Vec<u8>),
    /// Connection refused.
    Refused,
}

/// One scripted answer, optionally delayed.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub reply: Reply,
    pub delay: Duration,
}

impl Step {
    /// 200 with a JSON body.
    pub fn ok(body: Value) -> Self {
        Self::status(200, body)
    }

    pub fn status(code: u16, body: Value) -> Self {
        Self {
            reply: Reply::Json(code, body),
            delay: Duration::ZERO,
        }
    }

    /// Status with an empty body.
    pub fn empty(code: u16) -> Self {
        Self::raw(code, Vec::new())
    }

    pub fn raw(code: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            reply: Reply::Raw(code, body.into()),
            delay: Duration::ZERO,
        }
    }

    pub fn refused() -> Self {
        Self {
            reply: Reply::Refused,
            delay: Duration::ZERO,
        }
    }

    /// Never answers within any realistic timeout.
    pub fn hang() -> Self {
        Self::ok(Value::Null).after(Duration::from_secs(3_600))
    }

    /// Answer only after `delay`.
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct Script {
    routes: HashMap<String, VecDeque<Step>>,
    calls: HashMap<String, usize>,
    active: HashMap<String, usize>,
    peak: HashMap<String, usize>,
    requests: Vec<UpstreamRequest>,
}

/// In-memory [`UpstreamTransport`] answering from per-path queues.
///
/// Steps are consumed in order; the last step for a path repeats. Paths
/// with no script answer 404. Calls are counted when they arrive, before
/// any scripted delay, so concurrent callers are visible immediately.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `step` for `path` (builder form).
    pub fn with(self, path: &str, step: Step) -> Self {
        self.push(path, step);
        self
    }

    /// Queue `step` for `path`.
    pub fn push(&self, path: &str, step: Step) {
        self.lock()
            .routes
            .entry(path.to_string())
            .or_default()
            .push_back(step);
    }

    /// Replace everything queued for `path` with `step`.
    pub fn set(&self, path: &str, step: Step) {
        let mut script = self.lock();
        let queue = script.routes.entry(path.to_string()).or_default();
        queue.clear();
        queue.push_back(step);
    }

    /// Calls received for `path`.
    pub fn calls(&self, path: &str) -> usize {
        self.lock().calls.get(path).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Calls for `path` currently waiting out their scripted delay.
    pub fn in_progress(&self, path: &str) -> usize {
        self.lock().active.get(path).copied().unwrap_or(0)
    }

    /// Most calls for `path` ever in progress at the same time.
    pub fn peak_concurrency(&self, path: &str) -> usize {
        self.lock().peak.get(path).copied().unwrap_or(0)
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_step(&self, request: &UpstreamRequest) -> Option<Step> {
        let mut script = self.lock();
        *script.calls.entry(request.path.clone()).or_insert(0) += 1;
        let active = script.active.entry(request.path.clone()).or_insert(0);
        *active += 1;
        let running = *active;
        let peak = script.peak.entry(request.path.clone()).or_insert(0);
        *peak = (*peak).max(running);
        script.requests.push(request.clone());

        let queue = script.routes.get_mut(&request.path)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

/// Marks a call finished when dropped, including when its caller times out.
struct ActiveCall<'a> {
    transport: &'a ScriptedTransport,
    path: &'a str,
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        if let Some(active) = self.transport.lock().active.get_mut(self.path) {
            *active = active.saturating_sub(1);
        }
    }
}

#[async_trait]
impl UpstreamTransport for ScriptedTransport {
    async fn send(&self, request: &UpstreamRequest) -> Result<RawResponse, TransportError> {
        let step = self.next_step(request);
        let _active = ActiveCall {
            transport: self,
            path: &request.path,
        };
        let Some(step) = step else {
            return Ok(RawResponse::json(
                404,
                &json!({ "message": format!("No route scripted for {}", request.path) }),
            ));
        };

        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        match step.reply {
            Reply::Json(code, body) => Ok(RawResponse::json(code, &body)),
            Reply::Raw(code, body) => Ok(RawResponse::new(code, body)),
            Reply::Refused => Err(TransportError::Connect("connection refused".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for gateway types.

    use super::*;
    use proptest::prelude::*;

    /// A valid resource class name.
    pub fn arb_resource_class() -> impl Strategy<Value = ResourceClass> {
        "[a-z][a-z0-9-]{0,23}".prop_filter_map("valid class name", |name| {
            ResourceClass::new(name).ok()
        })
    }

    /// A request key as page controllers build them, e.g. `accounts:42`.
    pub fn arb_request_key() -> impl Strategy<Value = String> {
        "[a-z]{1,10}(:[A-Za-z0-9_-]{1,12}){0,3}"
    }

    /// TTL between 1ms and one hour.
    pub fn arb_ttl() -> impl Strategy<Value = Duration> {
        (1u64..3_600_000).prop_map(Duration::from_millis)
    }

    pub fn arb_client_status() -> impl Strategy<Value = u16> {
        400u16..500
    }

    pub fn arb_server_status() -> impl Strategy<Value = u16> {
        500u16..600
    }

    /// Any non-success outcome.
    pub fn arb_failure_outcome() -> impl Strategy<Value = UpstreamOutcome> {
        prop_oneof![
            Just(UpstreamOutcome::Timeout),
            "[a-z ]{1,20}".prop_map(|reason| UpstreamOutcome::ConnectionFailure { reason }),
            (arb_client_status(), "[A-Za-z ]{0,30}")
                .prop_map(|(code, message)| UpstreamOutcome::ClientError { code, message }),
            (arb_server_status(), "[A-Za-z ]{0,30}")
                .prop_map(|(code, message)| UpstreamOutcome::ServerError { code, message }),
        ]
    }

    /// Small JSON payloads shaped like trading API resources.
    pub fn arb_payload() -> impl Strategy<Value = Value> {
        ("[A-Z]{3}-[A-Z]{3}", 0i64..1_000_000, any::<bool>()).prop_map(
            |(symbol, quantity, active)| {
                json!({ "symbol": symbol, "quantity": quantity, "active": active })
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built configurations and policies for common scenarios.

    use super::*;

    /// Configuration with short timeouts and backoff, breaker disabled.
    pub fn test_config() -> GatewayConfig {
        GatewayConfig {
            default_timeout_ms: 1_000,
            connect_timeout_ms: 500,
            retry_backoff_ms: 50,
            circuit_breaker: CircuitBreakerSettings {
                enabled: false,
                ..CircuitBreakerSettings::default()
            },
            ..GatewayConfig::default()
        }
    }

    /// Policy for `class` with the given TTL and timeout, stale serving on.
    pub fn policy(class: &str, ttl: Duration, timeout: Duration) -> CachePolicy {
        CachePolicy::new(class_of(class), ttl, timeout).with_stale_on_failure(true)
    }

    /// Registry holding only `policies`.
    pub fn registry(policies: impl IntoIterator<Item = CachePolicy>) -> CachePolicyRegistry {
        let mut registry = CachePolicyRegistry::new();
        for policy in policies {
            registry.upsert(policy);
        }
        registry
    }

    /// A resource class that must be valid.
    #[track_caller]
    pub fn class_of(name: &str) -> ResourceClass {
        match ResourceClass::new(name) {
            Ok(class) => class,
            Err(e) => panic!("invalid fixture class {name}: {e}"),
        }
    }

    pub fn account(id: u64) -> Value {
        json!({ "id": id, "name": format!("account-{id}"), "exchange": "BINANCE", "active": true })
    }

    pub fn health_up() -> Value {
        json!({ "status": "UP" })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over gateway results.

    use super::*;

    #[track_caller]
    pub fn assert_timeout<T: std::fmt::Debug>(result: &GatewayResult<T>) {
        match result {
            Err(GatewayError::UpstreamTimeout { .. }) => {}
            other => panic!("Expected UpstreamTimeout, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_connection_failure<T: std::fmt::Debug>(result: &GatewayResult<T>) {
        match result {
            Err(GatewayError::UpstreamConnectionFailure { .. }) => {}
            other => panic!("Expected UpstreamConnectionFailure, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_client_error<T: std::fmt::Debug>(result: &GatewayResult<T>, expected: u16) {
        match result {
            Err(GatewayError::UpstreamClientError { code, .. }) => {
                assert_eq!(*code, expected, "Wrong client error status");
            }
            other => panic!("Expected UpstreamClientError({}), got: {:?}", expected, other),
        }
    }

    #[track_caller]
    pub fn assert_server_error<T: std::fmt::Debug>(result: &GatewayResult<T>, expected: u16) {
        match result {
            Err(GatewayError::UpstreamServerError { code, .. }) => {
                assert_eq!(*code, expected, "Wrong server error status");
            }
            other => panic!("Expected UpstreamServerError({}), got: {:?}", expected, other),
        }
    }

    #[track_caller]
    pub fn assert_unknown_class<T: std::fmt::Debug>(result: &GatewayResult<T>, expected: &str) {
        match result {
            Err(GatewayError::UnknownResourceClass { class }) => {
                assert_eq!(class, expected, "Wrong class in UnknownResourceClass");
            }
            other => panic!("Expected UnknownResourceClass({}), got: {:?}", expected, other),
        }
    }
}
