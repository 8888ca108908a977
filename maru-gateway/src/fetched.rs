//! Read results with provenance.

use chrono::{DateTime, Utc};
use maru_core::{GatewayError, ServedFrom};
use std::time::Duration;

/// Result of a gateway read, carrying where it was served from.
///
/// A stale read is a success: the value is what the last good upstream
/// answer said, and `stale_reason` is the failure that prevented a refresh.
/// Pages should render it with a staleness banner.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    value: T,
    served_from: ServedFrom,
    /// When the value was obtained from the upstream.
    fetched_at: DateTime<Utc>,
    stale_reason: Option<GatewayError>,
}

impl<T> Fetched<T> {
    /// A cache entry younger than its TTL.
    pub fn fresh(value: T, fetched_at: DateTime<Utc>) -> Self {
        Self {
            value,
            served_from: ServedFrom::Fresh,
            fetched_at,
            stale_reason: None,
        }
    }

    /// An expired entry served because the upstream failed with `reason`.
    pub fn stale(value: T, fetched_at: DateTime<Utc>, reason: GatewayError) -> Self {
        Self {
            value,
            served_from: ServedFrom::Stale,
            fetched_at,
            stale_reason: Some(reason),
        }
    }

    /// A value the upstream just returned.
    pub fn upstream(value: T, fetched_at: DateTime<Utc>) -> Self {
        Self {
            value,
            served_from: ServedFrom::Upstream,
            fetched_at,
            stale_reason: None,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn served_from(&self) -> ServedFrom {
        self.served_from
    }

    pub fn is_stale(&self) -> bool {
        self.served_from == ServedFrom::Stale
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Age of the value relative to now.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.fetched_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// The failure that caused a stale read.
    pub fn stale_reason(&self) -> Option<&GatewayError> {
        self.stale_reason.as_ref()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Fetched<U> {
        Fetched {
            value: f(self.value),
            served_from: self.served_from,
            fetched_at: self.fetched_at,
            stale_reason: self.stale_reason,
        }
    }

    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Fetched<U>, E> {
        Ok(Fetched {
            value: f(self.value)?,
            served_from: self.served_from,
            fetched_at: self.fetched_at,
            stale_reason: self.stale_reason,
        })
    }
}
