//! Cache entries and their freshness.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Freshness of an entry at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Age is below the TTL.
    Fresh,
    /// Age reached the TTL. Still stale-servable.
    Expired,
}

/// A cached value with the instant it was stored and its TTL.
///
/// Age is measured on the monotonic clock; the wall-clock timestamp is
/// only carried for display.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    stored_at_wall: DateTime<Utc>,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self::stored_at(value, ttl, Instant::now())
    }

    /// Entry stored at a given instant.
    pub fn stored_at(value: V, ttl: Duration, stored_at: Instant) -> Self {
        Self {
            value,
            stored_at,
            stored_at_wall: Utc::now(),
            ttl,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stored_instant(&self) -> Instant {
        self.stored_at
    }

    pub fn stored_at_wall(&self) -> DateTime<Utc> {
        self.stored_at_wall
    }

    /// Instant the entry stops being fresh, or `None` when the TTL runs
    /// past what the clock can represent.
    pub fn expires_at(&self) -> Option<Instant> {
        self.stored_at.checked_add(self.ttl)
    }

    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }

    pub fn age(&self) -> Duration {
        self.age_at(Instant::now())
    }

    /// `Fresh` strictly before `stored_at + ttl`, `Expired` from then on.
    pub fn state_at(&self, now: Instant) -> EntryState {
        if self.age_at(now) < self.ttl {
            EntryState::Fresh
        } else {
            EntryState::Expired
        }
    }

    pub fn state(&self) -> EntryState {
        self.state_at(Instant::now())
    }

    pub fn is_fresh(&self) -> bool {
        self.state() == EntryState::Fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_state_boundary() {
        let t0 = Instant::now();
        let entry = CacheEntry::stored_at("v", Duration::from_secs(30), t0);

        assert_eq!(entry.state_at(t0), EntryState::Fresh);
        assert_eq!(
            entry.state_at(t0 + Duration::from_millis(29_999)),
            EntryState::Fresh
        );
        assert_eq!(entry.state_at(t0 + Duration::from_secs(30)), EntryState::Expired);
        assert_eq!(entry.expires_at(), Some(t0 + Duration::from_secs(30)));
    }

    #[test]
    fn test_unbounded_ttl_does_not_overflow() {
        let t0 = Instant::now();
        let entry = CacheEntry::stored_at("v", Duration::MAX, t0);
        assert_eq!(entry.expires_at(), None);
        assert_eq!(
            entry.state_at(t0 + Duration::from_secs(86_400 * 365)),
            EntryState::Fresh
        );
    }

    #[test]
    fn test_zero_ttl_is_never_fresh() {
        let t0 = Instant::now();
        let entry = CacheEntry::stored_at(1u32, Duration::ZERO, t0);
        assert_eq!(entry.state_at(t0), EntryState::Expired);
    }

    #[test]
    fn test_age_before_store_is_zero() {
        let t0 = Instant::now() + Duration::from_secs(5);
        let entry = CacheEntry::stored_at(1u32, Duration::from_secs(1), t0);
        assert_eq!(entry.age_at(Instant::now()), Duration::ZERO);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Never fresh at or past the TTL, always fresh before it.
        #[test]
        fn prop_fresh_iff_age_below_ttl(ttl_ms in 0u64..100_000, elapsed_ms in 0u64..200_000) {
            let t0 = Instant::now();
            let ttl = Duration::from_millis(ttl_ms);
            let entry = CacheEntry::stored_at((), ttl, t0);
            let state = entry.state_at(t0 + Duration::from_millis(elapsed_ms));

            if elapsed_ms < ttl_ms {
                prop_assert_eq!(state, EntryState::Fresh);
            } else {
                prop_assert_eq!(state, EntryState::Expired);
            }
        }
    }
}
