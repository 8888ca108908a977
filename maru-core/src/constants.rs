//! Gateway-wide constants.
//!
//! Resource class names, mutation operation names and default tuning
//! values live here so controllers, policies and tests agree on them.

// ============================================================================
// KEYS
// ============================================================================

/// Separator between the resource class and the identifying key inside a
/// scoped cache key. Resource class names may not contain it.
pub const KEY_SEPARATOR: char = '|';

/// Health, metrics and circuit-breaker label for requests naming a class
/// or mutation the policy registry does not know. It contains
/// [`KEY_SEPARATOR`], so no resource class can take it.
pub const UNREGISTERED_LABEL: &str = "|unregistered";

// ============================================================================
// UPSTREAM DEFAULTS
// ============================================================================

/// Base URL of the trading system when nothing is configured.
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "http://localhost:8099";

/// Per-attempt timeout for classes without an explicit one.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// TCP connect timeout for the HTTP transport.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Wait before the single retry of an idempotent read.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

/// Idle connections kept per upstream host.
pub const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 50;

/// Maximum number of attempts for an idempotent read (one retry).
pub const MAX_READ_ATTEMPTS: u32 = 2;

/// Upstream error messages longer than this are truncated.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 100;

// ============================================================================
// CACHE / HEALTH DEFAULTS
// ============================================================================

/// Entries held by the cache store before the oldest is evicted.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1_000;

/// Upstream call samples kept per resource class.
pub const DEFAULT_HEALTH_WINDOW: usize = 100;

// ============================================================================
// CIRCUIT BREAKER DEFAULTS
// ============================================================================

pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_BREAKER_SUCCESS_THRESHOLD: u32 = 3;
pub const DEFAULT_BREAKER_OPEN_DURATION_MS: u64 = 60_000;

// ============================================================================
// RESOURCE CLASSES
// ============================================================================

/// Names of the resource classes the dashboard reads.
pub mod classes {
    pub const HEALTH: &str = "health";
    pub const KILL_SWITCH: &str = "kill-switch";
    pub const RISK_RULES: &str = "risk-rules";
    pub const ACCOUNTS: &str = "accounts";
    pub const STRATEGIES: &str = "strategies";
    pub const INSTRUMENTS: &str = "instruments";
    pub const ORDERS: &str = "orders";
    pub const POSITIONS: &str = "positions";
    pub const BALANCES: &str = "balances";
    pub const EXECUTION_HISTORY: &str = "execution-history";
    pub const PERFORMANCE: &str = "performance";
    pub const MARKET_DATA: &str = "market-data";
}

// ============================================================================
// MUTATION OPERATIONS
// ============================================================================

/// Names of the upstream writes that trigger cache invalidation.
pub mod ops {
    pub const ACCOUNT_CREATE: &str = "account.create";
    pub const ACCOUNT_UPDATE: &str = "account.update";
    pub const ACCOUNT_DELETE: &str = "account.delete";
    pub const ACCOUNT_STATUS: &str = "account.status";
    pub const ACCOUNT_PERMISSIONS: &str = "account.permissions";
    pub const ACCOUNT_RISK_LIMITS: &str = "account.risk-limits";

    pub const STRATEGY_CREATE: &str = "strategy.create";
    pub const STRATEGY_UPDATE: &str = "strategy.update";
    pub const STRATEGY_DELETE: &str = "strategy.delete";
    pub const STRATEGY_STATUS: &str = "strategy.status";

    pub const INSTRUMENT_STATUS: &str = "instrument.status";

    pub const KILL_SWITCH_TOGGLE: &str = "kill-switch.toggle";

    pub const RISK_RULE_CREATE: &str = "risk-rule.create";
    pub const RISK_RULE_UPDATE: &str = "risk-rule.update";
    pub const RISK_RULE_DELETE: &str = "risk-rule.delete";

    pub const ORDER_CANCEL: &str = "order.cancel";
    pub const ORDER_MODIFY: &str = "order.modify";

    pub const MARKET_DATA_SUBSCRIBE: &str = "market-data.subscribe";
    pub const MARKET_DATA_UNSUBSCRIBE: &str = "market-data.unsubscribe";
}
