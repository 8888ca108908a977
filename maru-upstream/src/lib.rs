//! MARU Upstream - Trading API client
//!
//! Everything that talks to the trading system: request descriptions, the
//! [`UpstreamTransport`] seam with its reqwest implementation, outcome
//! classification, and the [`UpstreamClient`] that applies per-resource
//! timeouts, the single read retry and per-class circuit breakers.

pub mod breaker;
pub mod classify;
pub mod client;
pub mod http;
pub mod request;
pub mod transport;

pub use breaker::{CircuitBreaker, CircuitState};
pub use classify::{classify_response, classify_transport_error, extract_error_message};
pub use client::{UpstreamClient, CIRCUIT_OPEN_REASON};
pub use http::HttpTransport;
pub use request::{CallKind, Method, UpstreamCall, UpstreamRequest};
pub use transport::{RawResponse, TransportError, UpstreamTransport};
