//! MARU Gateway - Resilient caching gateway
//!
//! The one entry point page controllers use to read from and write to the
//! trading system. Reads go through a TTL cache with single-flight
//! de-duplication and fall back to stale entries when the upstream is
//! unhealthy; writes invalidate what they make obsolete.
//!
//! ```no_run
//! use maru_gateway::{Gateway, GatewayConfig, InvalidationTarget, UpstreamRequest};
//!
//! # async fn example() -> maru_gateway::GatewayResult<()> {
//! let gateway = Gateway::new(GatewayConfig::from_env())?;
//!
//! let accounts = gateway
//!     .fetch("accounts", "accounts:list", UpstreamRequest::get("/api/v1/admin/accounts"))
//!     .await?;
//! if accounts.is_stale() {
//!     // render a staleness banner
//! }
//!
//! gateway.invalidate("accounts", InvalidationTarget::All)?;
//! # Ok(())
//! # }
//! ```

pub mod fetched;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod options;
pub mod telemetry;

pub use fetched::Fetched;
pub use gateway::{Gateway, GatewayBuilder, Payload};
pub use health::{FetchDisposition, HealthMonitor};
pub use metrics::GatewayMetrics;
pub use options::{FetchOptions, InvalidationTarget, Mutation};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};

pub use maru_cache::CacheStats;
pub use maru_core::{
    GatewayConfig, GatewayError, GatewayResult, HealthSnapshot, HealthStatus, MutationOp,
    ServedFrom,
};
pub use maru_upstream::{Method, UpstreamRequest, UpstreamTransport};
