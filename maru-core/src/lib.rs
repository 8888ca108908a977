//! MARU Core - Gateway Types
//!
//! Resource classes, cache policies, upstream outcomes, configuration and
//! the error taxonomy shared by every gateway crate. This crate performs no
//! I/O apart from reading configuration files.

pub mod config;
pub mod constants;
pub mod error;
pub mod health;
pub mod identity;
pub mod outcome;
pub mod policy;

pub use config::{CircuitBreakerSettings, GatewayConfig};
pub use error::{ConfigError, ConfigResult, GatewayError, GatewayResult};
pub use health::{FetchCounts, HealthSnapshot, HealthStatus, LastError, ResourceHealth};
pub use identity::{MutationOp, ResourceClass};
pub use outcome::{OutcomeKind, ServedFrom, UpstreamCallResult, UpstreamOutcome};
pub use policy::{CachePolicy, CachePolicyRegistry};
