//! The gateway facade page controllers call.

use crate::fetched::Fetched;
use crate::health::{FetchDisposition, HealthMonitor};
use crate::metrics::GatewayMetrics;
use crate::options::{FetchOptions, InvalidationTarget, Mutation};
use maru_cache::{CacheKey, CacheStats, CacheStore, FlightError, SingleFlight};
use maru_core::constants::{classes, UNREGISTERED_LABEL};
use maru_core::{
    CachePolicy, CachePolicyRegistry, GatewayConfig, GatewayError, GatewayResult,
    HealthSnapshot, ServedFrom, UpstreamCallResult, UpstreamOutcome,
};
use maru_upstream::{UpstreamCall, UpstreamClient, UpstreamRequest, UpstreamTransport};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Shared, immutable upstream payload.
pub type Payload = Arc<Value>;

/// Reason given to waiters whose flight died without an answer.
const ABANDONED_REASON: &str = "upstream call abandoned";

/// Read-through cache in front of the trading system.
///
/// Cheap to clone; every clone shares one cache, flight table, upstream
/// client and health monitor. Concurrent reads of one key share a single
/// upstream call. Reads that fail because the upstream is unhealthy may be
/// answered from an expired entry when the class's policy allows it.
///
/// A sequential invalidate-then-fetch from one task always misses. A fetch
/// racing another task's invalidate may still observe the entry about to be
/// removed.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    policies: CachePolicyRegistry,
    store: Arc<CacheStore<Payload>>,
    flights: SingleFlight<Arc<UpstreamCallResult>>,
    upstream: Arc<UpstreamClient>,
    health: Arc<HealthMonitor>,
    metrics: GatewayMetrics,
}

/// Assembles a [`Gateway`] from configuration and optional overrides.
pub struct GatewayBuilder {
    config: GatewayConfig,
    policies: Option<CachePolicyRegistry>,
    transport: Option<Arc<dyn UpstreamTransport>>,
}

impl GatewayBuilder {
    /// Use `policies` instead of the built-in table plus configuration.
    pub fn with_policies(mut self, policies: CachePolicyRegistry) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Talk to the upstream through `transport` instead of HTTP.
    pub fn with_transport(mut self, transport: Arc<dyn UpstreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> GatewayResult<Gateway> {
        let config = self.config;
        config.validate()?;

        let policies = match self.policies {
            Some(policies) => policies,
            None => CachePolicyRegistry::from_config(&config)?,
        };
        let upstream = match self.transport {
            Some(transport) => UpstreamClient::with_transport(transport, &config),
            None => UpstreamClient::from_config(&config)?,
        };

        tracing::info!(
            upstream = %config.upstream_base_url,
            classes = policies.len(),
            cache_max_entries = config.cache_max_entries,
            circuit_breaker = config.circuit_breaker.enabled,
            "Gateway initialized"
        );

        Ok(Gateway {
            inner: Arc::new(GatewayInner {
                store: Arc::new(CacheStore::new(config.cache_max_entries)),
                flights: SingleFlight::new(),
                upstream: Arc::new(upstream),
                health: Arc::new(HealthMonitor::new(config.health_window)),
                metrics: GatewayMetrics::new()?,
                policies,
                config,
            }),
        })
    }
}

impl Gateway {
    /// Gateway over HTTP with the built-in policies and `config` overrides.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            policies: None,
            transport: None,
        }
    }

    /// Read `key` of `class`, from cache when fresh, otherwise upstream.
    pub async fn fetch(
        &self,
        class: &str,
        key: &str,
        request: UpstreamRequest,
    ) -> GatewayResult<Fetched<Payload>> {
        self.fetch_with(class, key, request, FetchOptions::default())
            .await
    }

    /// [`fetch`](Self::fetch) with per-read options.
    ///
    /// Client errors are always returned unchanged. Timeouts, connection
    /// failures, server errors and an elapsed caller deadline are answered
    /// from an expired entry when the policy allows stale reads and one
    /// exists. An elapsed deadline does not cancel the shared upstream call.
    pub async fn fetch_with(
        &self,
        class: &str,
        key: &str,
        request: UpstreamRequest,
        options: FetchOptions,
    ) -> GatewayResult<Fetched<Payload>> {
        let inner = &self.inner;
        let policy = match inner.policies.get(class) {
            Ok(policy) => policy,
            Err(e) => {
                tracing::warn!(class = %class, key = %key, "Fetch for unknown resource class");
                self.observe_fetch(UNREGISTERED_LABEL, FetchDisposition::Error);
                return Err(e);
            }
        };

        let cache_key = CacheKey::new(&policy.resource_class, key);
        if let Some(entry) = inner.store.get(&cache_key) {
            tracing::debug!(class = %class, key = %key, "Cache hit");
            self.observe_fetch(class, FetchDisposition::Fresh);
            return Ok(Fetched::fresh(
                Arc::clone(entry.value()),
                entry.stored_at_wall(),
            ));
        }

        let deadline = options
            .deadline
            .unwrap_or_else(|| policy.read_deadline(inner.config.retry_backoff()));
        let call = UpstreamCall::read(class, key, request, policy.timeout);
        let ticket = inner.flights.join_or_lead(
            cache_key.as_str(),
            || self.run_call(call),
            self.commit_success(cache_key.clone(), policy.ttl),
        );
        let role = ticket.role();

        let error = match ticket.wait(deadline).await {
            Ok(result) => match result.outcome.to_result(class, key) {
                Ok(payload) => {
                    tracing::debug!(class = %class, key = %key, role = ?role, "Served from upstream");
                    self.observe_fetch(class, FetchDisposition::Upstream);
                    return Ok(Fetched::upstream(payload, result.completed_at));
                }
                Err(error) => error,
            },
            Err(FlightError::DeadlineElapsed) => {
                tracing::warn!(
                    class = %class,
                    key = %key,
                    deadline_ms = deadline.as_millis() as u64,
                    "Caller deadline elapsed waiting for upstream"
                );
                GatewayError::UpstreamTimeout {
                    class: class.to_string(),
                    key: key.to_string(),
                }
            }
            Err(FlightError::Abandoned) => GatewayError::UpstreamConnectionFailure {
                class: class.to_string(),
                reason: ABANDONED_REASON.to_string(),
            },
        };

        self.degrade(policy, &cache_key, error)
    }

    /// [`fetch`](Self::fetch), decoding the payload into `T`.
    pub async fn fetch_as<T: DeserializeOwned>(
        &self,
        class: &str,
        key: &str,
        request: UpstreamRequest,
    ) -> GatewayResult<Fetched<T>> {
        let fetched = self.fetch(class, key, request).await?;
        fetched.try_map(|payload| {
            T::deserialize(&*payload).map_err(|e| GatewayError::InvalidPayload {
                class: class.to_string(),
                reason: e.to_string(),
            })
        })
    }

    /// Ask the upstream's health endpoint, through the `health` class.
    pub async fn probe(&self) -> GatewayResult<Fetched<Payload>> {
        self.fetch(classes::HEALTH, "health", UpstreamRequest::get("/health"))
            .await
    }

    /// Drop cached entries of `class` and detach matching in-flight reads,
    /// so the next fetch of any of them goes upstream. That fetch's call
    /// starts once the detached one has finished. Never awaits and never
    /// calls the upstream. Returns the number of entries removed.
    pub fn invalidate(&self, class: &str, target: InvalidationTarget) -> GatewayResult<usize> {
        let policy = self.registered(class)?;
        Ok(self.invalidate_policy(policy, &target))
    }

    /// Invalidate every class whose policy lists `op`.
    pub fn invalidate_for(&self, op: &str) -> usize {
        self.inner
            .policies
            .iter()
            .filter(|policy| policy.is_invalidated_by(op))
            .map(|policy| self.invalidate_policy(policy, &InvalidationTarget::All))
            .sum()
    }

    /// Perform an upstream write, then invalidate what it made obsolete.
    ///
    /// Writes are never retried. On failure the cache is left untouched
    /// and the error is returned; a write is never answered from cache.
    /// Health, metrics and the circuit breaker track the write under its
    /// op name when some policy lists the op, otherwise under
    /// [`UNREGISTERED_LABEL`].
    pub async fn mutate(&self, mutation: Mutation) -> GatewayResult<Payload> {
        let Mutation {
            op,
            request,
            timeout,
            extra_targets,
        } = mutation;

        for (class, _) in &extra_targets {
            self.registered(class)?;
        }

        let op_name = op.as_str();
        let label = if self.inner.policies.knows_op(op_name) {
            op_name
        } else {
            tracing::debug!(op = %op, "Mutation op listed by no policy");
            UNREGISTERED_LABEL
        };
        let target = format!("{} {}", request.method.as_str(), request.path);
        let timeout = timeout.unwrap_or_else(|| self.inner.config.default_timeout());
        let result = self
            .run_call(UpstreamCall::mutation(label, target.as_str(), request, timeout))
            .await;

        let payload = match result.outcome.to_result(op_name, &target) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(op = %op, target = %target, error = %e, "Mutation failed");
                return Err(e);
            }
        };

        let mut removed = self.invalidate_for(op_name);
        for (class, target) in &extra_targets {
            removed += self.invalidate(class, target.clone())?;
        }

        tracing::info!(op = %op, target = %target, removed, "Mutation applied");
        Ok(payload)
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        self.inner.health.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.store.stats()
    }

    /// Metrics, with the cache-size gauge brought up to date.
    pub fn metrics(&self) -> &GatewayMetrics {
        self.inner.metrics.set_cache_entries(self.inner.store.len());
        &self.inner.metrics
    }

    pub fn policies(&self) -> &CachePolicyRegistry {
        &self.inner.policies
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Upstream reads currently in flight and joinable. Reads detached by
    /// an invalidation are not counted.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }

    /// Drop every cached entry of every class.
    pub fn clear(&self) -> usize {
        self.inner
            .policies
            .iter()
            .map(|policy| self.invalidate_policy(policy, &InvalidationTarget::All))
            .sum()
    }

    /// Policy of an invalidation target class. Unknown classes are counted
    /// under [`UNREGISTERED_LABEL`].
    fn registered(&self, class: &str) -> GatewayResult<&CachePolicy> {
        self.inner.policies.get(class).inspect_err(|_| {
            tracing::warn!(class = %class, "Invalidation for unknown resource class");
            self.inner.health.record_rejected_invalidation(UNREGISTERED_LABEL);
        })
    }

    fn invalidate_policy(&self, policy: &CachePolicy, target: &InvalidationTarget) -> usize {
        let inner = &self.inner;
        let class = policy.resource_class.as_str();

        // Flights first: a detached flight can no longer commit, so nothing
        // removed below can be re-inserted by a read started earlier.
        let removed = match target {
            InvalidationTarget::Key(key) => {
                let cache_key = CacheKey::new(&policy.resource_class, key);
                inner.flights.detach(cache_key.as_str());
                usize::from(inner.store.invalidate(&cache_key))
            }
            InvalidationTarget::Prefix(prefix) => {
                let prefix = CacheKey::prefix(&policy.resource_class, prefix);
                inner.flights.detach_prefix(&prefix);
                inner.store.invalidate_prefix(&prefix)
            }
            InvalidationTarget::All => {
                let prefix = CacheKey::class_prefix(&policy.resource_class);
                inner.flights.detach_prefix(&prefix);
                inner.store.invalidate_prefix(&prefix)
            }
        };

        inner.health.record_invalidation(class, removed);
        inner.metrics.record_invalidation(class, removed);
        tracing::debug!(class = %class, target = ?target, removed, "Invalidated cache entries");
        removed
    }

    /// Future performing `call` and recording it exactly once.
    fn run_call(
        &self,
        call: UpstreamCall,
    ) -> impl Future<Output = Arc<UpstreamCallResult>> + Send + 'static {
        let upstream = Arc::clone(&self.inner.upstream);
        let health = Arc::clone(&self.inner.health);
        let metrics = self.inner.metrics.clone();

        async move {
            let class = call.class.clone();
            let result = upstream.call(call).await;
            health.record_call(&class, &result);
            metrics.record_upstream_call(&class, &result);
            Arc::new(result)
        }
    }

    /// Flight commit hook: cache successful reads only.
    fn commit_success(
        &self,
        cache_key: CacheKey,
        ttl: Duration,
    ) -> impl FnOnce(&Arc<UpstreamCallResult>) + Send + 'static {
        let store = Arc::clone(&self.inner.store);
        move |result: &Arc<UpstreamCallResult>| {
            if let UpstreamOutcome::Success(payload) = &result.outcome {
                store.put(&cache_key, Arc::clone(payload), ttl);
            }
        }
    }

    fn degrade(
        &self,
        policy: &CachePolicy,
        cache_key: &CacheKey,
        error: GatewayError,
    ) -> GatewayResult<Fetched<Payload>> {
        let class = policy.resource_class.as_str();

        if policy.stale_on_failure && error.is_stale_eligible() {
            if let Some(entry) = self.inner.store.get_including_stale(cache_key) {
                let payload = Arc::clone(entry.value());
                if entry.is_fresh() {
                    // Refreshed by another read meanwhile.
                    self.observe_fetch(class, FetchDisposition::Fresh);
                    return Ok(Fetched::fresh(payload, entry.stored_at_wall()));
                }

                tracing::warn!(
                    class = %class,
                    key = %cache_key.key(),
                    age_ms = entry.age().as_millis() as u64,
                    error = %error,
                    "Serving stale entry after upstream failure"
                );
                self.observe_fetch(class, FetchDisposition::Stale);
                return Ok(Fetched::stale(payload, entry.stored_at_wall(), error));
            }
        }

        tracing::warn!(
            class = %class,
            key = %cache_key.key(),
            error = %error,
            "Fetch failed"
        );
        self.observe_fetch(class, FetchDisposition::Error);
        Err(error)
    }

    fn observe_fetch(&self, class: &str, disposition: FetchDisposition) {
        self.inner.health.record_fetch(class, disposition);
        match disposition {
            FetchDisposition::Fresh => self.inner.metrics.record_fetch(class, ServedFrom::Fresh),
            FetchDisposition::Stale => self.inner.metrics.record_fetch(class, ServedFrom::Stale),
            FetchDisposition::Upstream => {
                self.inner.metrics.record_fetch(class, ServedFrom::Upstream)
            }
            FetchDisposition::Error => self.inner.metrics.record_fetch_error(class),
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("upstream", &self.inner.config.upstream_base_url)
            .field("classes", &self.inner.policies.len())
            .field("cached", &self.inner.store.len())
            .field("in_flight", &self.inner.flights.in_flight())
            .finish()
    }
}
