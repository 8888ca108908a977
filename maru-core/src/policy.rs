//! Cache policies per resource class.
//!
//! Every resource class read through the gateway has exactly one
//! [`CachePolicy`]. The registry starts from the dashboard's built-in
//! table and applies per-resource overrides from [`GatewayConfig`].

use crate::config::GatewayConfig;
use crate::constants::{classes, ops, MAX_READ_ATTEMPTS};
use crate::error::{ConfigError, ConfigResult, GatewayError, GatewayResult};
use crate::identity::{MutationOp, ResourceClass};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

// ============================================================================
// CACHE POLICY
// ============================================================================

/// Caching rules for one resource class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub resource_class: ResourceClass,
    /// How long an entry stays fresh.
    pub ttl: Duration,
    /// Per-attempt upstream timeout.
    pub timeout: Duration,
    /// Serve an expired entry when the upstream is unhealthy.
    pub stale_on_failure: bool,
    /// Mutations after which every entry of this class is invalidated.
    pub invalidated_by: BTreeSet<MutationOp>,
}

impl CachePolicy {
    pub fn new(resource_class: ResourceClass, ttl: Duration, timeout: Duration) -> Self {
        Self {
            resource_class,
            ttl,
            timeout,
            stale_on_failure: false,
            invalidated_by: BTreeSet::new(),
        }
    }

    pub fn with_stale_on_failure(mut self, enabled: bool) -> Self {
        self.stale_on_failure = enabled;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a mutation that invalidates this class.
    pub fn invalidated_by(mut self, op: impl Into<MutationOp>) -> Self {
        self.invalidated_by.insert(op.into());
        self
    }

    pub fn is_invalidated_by(&self, op: &str) -> bool {
        self.invalidated_by.contains(op)
    }

    /// Default caller deadline for a read: long enough for the first
    /// attempt, the backoff and the single retry.
    pub fn read_deadline(&self, retry_backoff: Duration) -> Duration {
        self.timeout
            .saturating_mul(MAX_READ_ATTEMPTS)
            .saturating_add(retry_backoff)
    }
}

// ============================================================================
// BUILT-IN POLICIES
// ============================================================================

struct BuiltinPolicy {
    class: &'static str,
    ttl: Duration,
    /// `None` uses the configured default timeout.
    timeout: Option<Duration>,
    stale_on_failure: bool,
    invalidated_by: &'static [&'static str],
}

const SECS_30: Duration = Duration::from_secs(30);
const MINS_5: Duration = Duration::from_secs(5 * 60);
const MINS_30: Duration = Duration::from_secs(30 * 60);

const BUILTIN_POLICIES: &[BuiltinPolicy] = &[
    // Health must reflect reality; a stale "UP" would hide an outage.
    BuiltinPolicy {
        class: classes::HEALTH,
        ttl: SECS_30,
        timeout: Some(Duration::from_secs(2)),
        stale_on_failure: false,
        invalidated_by: &[],
    },
    BuiltinPolicy {
        class: classes::KILL_SWITCH,
        ttl: SECS_30,
        timeout: None,
        stale_on_failure: false,
        invalidated_by: &[ops::KILL_SWITCH_TOGGLE],
    },
    BuiltinPolicy {
        class: classes::RISK_RULES,
        ttl: SECS_30,
        timeout: None,
        stale_on_failure: false,
        invalidated_by: &[
            ops::RISK_RULE_CREATE,
            ops::RISK_RULE_UPDATE,
            ops::RISK_RULE_DELETE,
            ops::ACCOUNT_RISK_LIMITS,
            ops::KILL_SWITCH_TOGGLE,
        ],
    },
    BuiltinPolicy {
        class: classes::ACCOUNTS,
        ttl: MINS_5,
        timeout: None,
        stale_on_failure: true,
        invalidated_by: &[
            ops::ACCOUNT_CREATE,
            ops::ACCOUNT_UPDATE,
            ops::ACCOUNT_DELETE,
            ops::ACCOUNT_STATUS,
            ops::ACCOUNT_PERMISSIONS,
            ops::ACCOUNT_RISK_LIMITS,
        ],
    },
    BuiltinPolicy {
        class: classes::STRATEGIES,
        ttl: MINS_5,
        timeout: None,
        stale_on_failure: true,
        invalidated_by: &[
            ops::STRATEGY_CREATE,
            ops::STRATEGY_UPDATE,
            ops::STRATEGY_DELETE,
            ops::STRATEGY_STATUS,
        ],
    },
    BuiltinPolicy {
        class: classes::INSTRUMENTS,
        ttl: MINS_30,
        timeout: None,
        stale_on_failure: true,
        invalidated_by: &[ops::INSTRUMENT_STATUS],
    },
    BuiltinPolicy {
        class: classes::ORDERS,
        ttl: Duration::from_secs(10),
        timeout: None,
        stale_on_failure: true,
        invalidated_by: &[ops::ORDER_CANCEL, ops::ORDER_MODIFY, ops::KILL_SWITCH_TOGGLE],
    },
    BuiltinPolicy {
        class: classes::POSITIONS,
        ttl: Duration::from_secs(10),
        timeout: None,
        stale_on_failure: true,
        invalidated_by: &[ops::ORDER_CANCEL, ops::ORDER_MODIFY],
    },
    BuiltinPolicy {
        class: classes::BALANCES,
        ttl: SECS_30,
        timeout: None,
        stale_on_failure: true,
        invalidated_by: &[ops::ACCOUNT_CREATE, ops::ACCOUNT_DELETE],
    },
    BuiltinPolicy {
        class: classes::EXECUTION_HISTORY,
        ttl: MINS_5,
        timeout: Some(Duration::from_secs(30)),
        stale_on_failure: true,
        invalidated_by: &[],
    },
    BuiltinPolicy {
        class: classes::PERFORMANCE,
        ttl: MINS_5,
        timeout: Some(Duration::from_secs(30)),
        stale_on_failure: true,
        invalidated_by: &[],
    },
    BuiltinPolicy {
        class: classes::MARKET_DATA,
        ttl: SECS_30,
        timeout: None,
        stale_on_failure: true,
        invalidated_by: &[
            ops::MARKET_DATA_SUBSCRIBE,
            ops::MARKET_DATA_UNSUBSCRIBE,
            ops::INSTRUMENT_STATUS,
        ],
    },
];

// ============================================================================
// REGISTRY
// ============================================================================

/// Mapping from resource class to its single policy.
#[derive(Debug, Clone, Default)]
pub struct CachePolicyRegistry {
    policies: HashMap<ResourceClass, CachePolicy>,
}

impl CachePolicyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The dashboard's built-in policies. Classes without an explicit
    /// timeout use `default_timeout`.
    pub fn builtin(default_timeout: Duration) -> Self {
        let policies = BUILTIN_POLICIES
            .iter()
            .map(|builtin| {
                let class = ResourceClass(builtin.class.to_string());
                let policy = CachePolicy {
                    resource_class: class.clone(),
                    ttl: builtin.ttl,
                    timeout: builtin.timeout.unwrap_or(default_timeout),
                    stale_on_failure: builtin.stale_on_failure,
                    invalidated_by: builtin
                        .invalidated_by
                        .iter()
                        .map(|op| MutationOp::new(*op))
                        .collect(),
                };
                (class, policy)
            })
            .collect();
        Self { policies }
    }

    /// Built-in policies with the configuration's per-resource overrides.
    ///
    /// A class that only appears in the configuration is registered with
    /// the default timeout and no stale-serving unless configured, and it
    /// must have a TTL.
    pub fn from_config(config: &GatewayConfig) -> ConfigResult<Self> {
        let mut registry = Self::builtin(config.default_timeout());

        let mentioned: BTreeSet<&String> = config
            .per_resource_ttl_ms
            .keys()
            .chain(config.per_resource_timeout_ms.keys())
            .chain(config.stale_on_failure.keys())
            .collect();

        for name in mentioned {
            let class = ResourceClass::new(name.as_str())?;
            let ttl = config.per_resource_ttl_ms.get(name).copied();
            let timeout = config.per_resource_timeout_ms.get(name).copied();
            let stale = config.stale_on_failure.get(name).copied();

            let mut policy = match registry.policies.remove(class.as_str()) {
                Some(existing) => existing,
                None => {
                    let ttl_ms = ttl.ok_or_else(|| ConfigError::MissingRequired {
                        field: format!("per_resource_ttl_ms.{}", name),
                    })?;
                    CachePolicy::new(
                        class.clone(),
                        Duration::from_millis(ttl_ms),
                        config.default_timeout(),
                    )
                }
            };

            if let Some(ms) = ttl {
                policy.ttl = Duration::from_millis(ms);
            }
            if let Some(ms) = timeout {
                policy.timeout = Duration::from_millis(ms);
            }
            if let Some(enabled) = stale {
                policy.stale_on_failure = enabled;
            }
            registry.policies.insert(class, policy);
        }

        Ok(registry)
    }

    /// Add a policy. A second policy for the same class is rejected.
    pub fn register(&mut self, policy: CachePolicy) -> ConfigResult<()> {
        if self.policies.contains_key(policy.resource_class.as_str()) {
            return Err(ConfigError::DuplicatePolicy {
                class: policy.resource_class.to_string(),
            });
        }
        self.policies.insert(policy.resource_class.clone(), policy);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_policy(mut self, policy: CachePolicy) -> ConfigResult<Self> {
        self.register(policy)?;
        Ok(self)
    }

    /// Replace or insert a policy.
    pub fn upsert(&mut self, policy: CachePolicy) {
        self.policies.insert(policy.resource_class.clone(), policy);
    }

    /// Look up the policy for a class; unknown classes are an error.
    pub fn get(&self, class: &str) -> GatewayResult<&CachePolicy> {
        self.policies
            .get(class)
            .ok_or_else(|| GatewayError::UnknownResourceClass {
                class: class.to_string(),
            })
    }

    pub fn contains(&self, class: &str) -> bool {
        self.policies.contains_key(class)
    }

    /// Whether any policy lists `op`.
    pub fn knows_op(&self, op: &str) -> bool {
        self.policies.values().any(|policy| policy.is_invalidated_by(op))
    }

    /// Classes whose policy lists `op`, in name order.
    pub fn classes_invalidated_by(&self, op: &str) -> Vec<&ResourceClass> {
        let mut classes: Vec<&ResourceClass> = self
            .policies
            .values()
            .filter(|policy| policy.is_invalidated_by(op))
            .map(|policy| &policy.resource_class)
            .collect();
        classes.sort();
        classes
    }

    pub fn iter(&self) -> impl Iterator<Item = &CachePolicy> {
        self.policies.values()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str) -> ResourceClass {
        ResourceClass::new(name).unwrap()
    }

    #[test]
    fn test_builtin_covers_dashboard_classes() {
        let registry = CachePolicyRegistry::builtin(Duration::from_secs(10));
        assert_eq!(registry.len(), BUILTIN_POLICIES.len());

        let health = registry.get(classes::HEALTH).unwrap();
        assert_eq!(health.timeout, Duration::from_secs(2));
        assert!(!health.stale_on_failure);

        let accounts = registry.get(classes::ACCOUNTS).unwrap();
        assert_eq!(accounts.ttl, Duration::from_secs(300));
        assert_eq!(accounts.timeout, Duration::from_secs(10));
        assert!(accounts.stale_on_failure);

        let instruments = registry.get(classes::INSTRUMENTS).unwrap();
        assert_eq!(instruments.ttl, Duration::from_secs(1800));

        let history = registry.get(classes::EXECUTION_HISTORY).unwrap();
        assert_eq!(history.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_safety_critical_classes_never_serve_stale() {
        let registry = CachePolicyRegistry::builtin(Duration::from_secs(10));
        for name in [classes::HEALTH, classes::KILL_SWITCH, classes::RISK_RULES] {
            assert!(!registry.get(name).unwrap().stale_on_failure, "{name}");
        }
    }

    #[test]
    fn test_unknown_class_is_error() {
        let registry = CachePolicyRegistry::builtin(Duration::from_secs(10));
        let err = registry.get("watchlists").unwrap_err();
        assert_eq!(
            err,
            GatewayError::UnknownResourceClass {
                class: "watchlists".to_string()
            }
        );
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = CachePolicyRegistry::new();
        let policy = CachePolicy::new(
            class("watchlists"),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        registry.register(policy.clone()).unwrap();
        let err = registry.register(policy).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePolicy { ref class } if class == "watchlists"));
    }

    #[test]
    fn test_classes_invalidated_by() {
        let registry = CachePolicyRegistry::builtin(Duration::from_secs(10));

        let affected: Vec<&str> = registry
            .classes_invalidated_by(ops::ACCOUNT_UPDATE)
            .into_iter()
            .map(ResourceClass::as_str)
            .collect();
        assert_eq!(affected, vec![classes::ACCOUNTS]);

        let affected: Vec<&str> = registry
            .classes_invalidated_by(ops::KILL_SWITCH_TOGGLE)
            .into_iter()
            .map(ResourceClass::as_str)
            .collect();
        assert_eq!(
            affected,
            vec![classes::KILL_SWITCH, classes::ORDERS, classes::RISK_RULES]
        );

        assert!(registry.classes_invalidated_by("nothing.here").is_empty());
    }

    #[test]
    fn test_knows_op() {
        let registry = CachePolicyRegistry::builtin(Duration::from_secs(10));
        assert!(registry.knows_op(ops::ACCOUNT_UPDATE));
        assert!(registry.knows_op(ops::KILL_SWITCH_TOGGLE));
        assert!(!registry.knows_op("nothing.here"));
        assert!(!CachePolicyRegistry::new().knows_op(ops::ACCOUNT_UPDATE));
    }

    #[test]
    fn test_from_config_applies_overrides() {
        let config = GatewayConfig::default()
            .with_ttl(classes::ACCOUNTS, Duration::from_secs(60))
            .with_stale_on_failure(classes::ACCOUNTS, false)
            .with_timeout(classes::INSTRUMENTS, Duration::from_secs(3));
        let registry = CachePolicyRegistry::from_config(&config).unwrap();

        let accounts = registry.get(classes::ACCOUNTS).unwrap();
        assert_eq!(accounts.ttl, Duration::from_secs(60));
        assert!(!accounts.stale_on_failure);
        assert!(accounts.is_invalidated_by(ops::ACCOUNT_UPDATE));

        let instruments = registry.get(classes::INSTRUMENTS).unwrap();
        assert_eq!(instruments.timeout, Duration::from_secs(3));
        assert_eq!(instruments.ttl, Duration::from_secs(1800));
    }

    #[test]
    fn test_from_config_new_class_requires_ttl() {
        let config = GatewayConfig::default().with_stale_on_failure("watchlists", true);
        let err = CachePolicyRegistry::from_config(&config).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "per_resource_ttl_ms.watchlists".to_string()
            }
        );

        let config = config.with_ttl("watchlists", Duration::from_secs(15));
        let registry = CachePolicyRegistry::from_config(&config).unwrap();
        let watchlists = registry.get("watchlists").unwrap();
        assert_eq!(watchlists.ttl, Duration::from_secs(15));
        assert_eq!(watchlists.timeout, config.default_timeout());
        assert!(watchlists.stale_on_failure);
    }

    #[test]
    fn test_from_config_rejects_invalid_class_name() {
        let config = GatewayConfig::default().with_ttl("bad|name", Duration::from_secs(1));
        assert!(matches!(
            CachePolicyRegistry::from_config(&config),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_read_deadline_covers_retry() {
        let policy = CachePolicy::new(
            class("accounts"),
            Duration::from_secs(60),
            Duration::from_secs(2),
        );
        assert_eq!(
            policy.read_deadline(Duration::from_millis(500)),
            Duration::from_millis(4_500)
        );
    }
}
