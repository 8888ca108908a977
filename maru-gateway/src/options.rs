//! Arguments to gateway operations.

use maru_core::MutationOp;
use maru_upstream::UpstreamRequest;
use std::time::Duration;

/// Per-read overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// How long the caller waits for an upstream answer. Defaults to the
    /// class's read deadline (two attempts plus the retry backoff).
    pub deadline: Option<Duration>,
}

impl FetchOptions {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }
}

/// Which entries of a resource class to drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationTarget {
    /// Exactly one request key.
    Key(String),
    /// Every request key starting with the prefix.
    Prefix(String),
    /// The whole class.
    All,
}

impl InvalidationTarget {
    pub fn key(key: impl Into<String>) -> Self {
        Self::Key(key.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }
}

/// An upstream write and the cache entries it makes obsolete.
///
/// On success the gateway invalidates every class whose policy lists `op`,
/// plus the explicit extra targets.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub op: MutationOp,
    pub request: UpstreamRequest,
    /// Per-attempt timeout; the configured default when `None`.
    pub timeout: Option<Duration>,
    pub extra_targets: Vec<(String, InvalidationTarget)>,
}

impl Mutation {
    pub fn new(op: impl Into<MutationOp>, request: UpstreamRequest) -> Self {
        Self {
            op: op.into(),
            request,
            timeout: None,
            extra_targets: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Also invalidate `target` of `class` once the write succeeds.
    pub fn also_invalidate(mut self, class: impl Into<String>, target: InvalidationTarget) -> Self {
        self.extra_targets.push((class.into(), target));
        self
    }
}
