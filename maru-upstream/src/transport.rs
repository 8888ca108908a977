//! The seam between the client and the wire.

use crate::request::UpstreamRequest;
use async_trait::async_trait;
use thiserror::Error;

/// Status and body of an upstream answer, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// JSON response with the given status.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status, body.to_string())
    }
}

/// Failure below HTTP: nothing usable came back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Other(String),
}

/// Sends requests to the trading system.
///
/// Implementations only move bytes; timeouts, retries and classification
/// are applied by [`UpstreamClient`](crate::UpstreamClient).
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn send(&self, request: &UpstreamRequest) -> Result<RawResponse, TransportError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "upstream"
    }
}
