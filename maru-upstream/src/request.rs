//! Upstream request descriptions.

use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// HTTP method of an upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

/// One request against the trading API, relative to the base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Sent as `x-request-id` for correlation with upstream logs.
    pub request_id: Uuid,
}

impl UpstreamRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            request_id: Uuid::now_v7(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Patch, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Append a query parameter. Empty values are skipped.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.query.push((name.into(), value));
        }
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Whether a call may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Idempotent read; retried once on timeout or connection failure.
    Read,
    /// Write; never retried.
    Mutation,
}

/// A logical upstream call as issued by the gateway.
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub class: String,
    pub key: String,
    pub request: UpstreamRequest,
    pub kind: CallKind,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl UpstreamCall {
    pub fn read(
        class: impl Into<String>,
        key: impl Into<String>,
        request: UpstreamRequest,
        timeout: Duration,
    ) -> Self {
        Self {
            class: class.into(),
            key: key.into(),
            request,
            kind: CallKind::Read,
            timeout,
        }
    }

    pub fn mutation(
        class: impl Into<String>,
        key: impl Into<String>,
        request: UpstreamRequest,
        timeout: Duration,
    ) -> Self {
        Self {
            class: class.into(),
            key: key.into(),
            request,
            kind: CallKind::Mutation,
            timeout,
        }
    }
}
