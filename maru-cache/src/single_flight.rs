//! Single-flight deduplication of concurrent upstream reads.
//!
//! At most one upstream call per key is in progress at any time. The first
//! caller to miss becomes the leader and spawns the call as an independent
//! task; later callers for the same key join as waiters. Every ticket of a
//! flight observes the identical result. A caller giving up on its deadline
//! does not cancel the call: the task runs to completion, commits (e.g.
//! populates the cache) and serves the remaining waiters.
//!
//! Invalidation detaches a flight: it keeps answering the tickets it
//! already issued but no longer accepts joiners and never commits. The
//! next miss on that key starts a new flight whose call is held back until
//! the detached one finishes, so calls for one key never overlap.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Why a ticket produced no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlightError {
    #[error("deadline elapsed before the shared upstream call completed")]
    DeadlineElapsed,

    #[error("shared upstream call ended without a result")]
    Abandoned,
}

/// How a caller joined a flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightRole {
    /// Started the upstream call.
    Leader,
    /// Joined a call already in progress.
    Waiter,
}

struct InFlight<T> {
    id: u64,
    result: watch::Receiver<Option<T>>,
    waiters: Arc<AtomicUsize>,
    detached: bool,
}

type FlightTable<T> = Arc<DashMap<String, InFlight<T>>>;

/// Table of in-progress upstream reads keyed by scoped cache key.
pub struct SingleFlight<T> {
    flights: FlightTable<T>,
    next_id: AtomicU64,
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<T> std::fmt::Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.flights.len())
            .finish()
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight for `key`, or start one.
    ///
    /// The check-then-register runs under the key's shard lock, so two
    /// callers can never both become leader. Only the leader invokes
    /// `make_call`; its future is spawned on the current runtime. A
    /// detached flight still registered for `key` is replaced, and the new
    /// call only starts once the detached one has finished. When the call
    /// completes, `commit` runs under the same lock if the flight is still
    /// registered and attached, then the flight is removed and the result
    /// published to every ticket.
    pub fn join_or_lead<F, Fut, C>(&self, key: &str, make_call: F, commit: C) -> FlightTicket<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        C: FnOnce(&T) + Send + 'static,
    {
        let (rx, waiters, launch) = match self.flights.entry(key.to_string()) {
            Entry::Occupied(occupied) if !occupied.get().detached => {
                let flight = occupied.get();
                flight.waiters.fetch_add(1, Ordering::SeqCst);
                (flight.result.clone(), Arc::clone(&flight.waiters), None)
            }
            Entry::Occupied(mut occupied) => {
                let predecessor = occupied.get().result.clone();
                let (flight, tx) = self.register();
                let rx = flight.result.clone();
                let waiters = Arc::clone(&flight.waiters);
                let id = flight.id;
                occupied.insert(flight);
                (rx, waiters, Some((id, tx, Some(predecessor))))
            }
            Entry::Vacant(vacant) => {
                let (flight, tx) = self.register();
                let rx = flight.result.clone();
                let waiters = Arc::clone(&flight.waiters);
                let id = flight.id;
                vacant.insert(flight);
                (rx, waiters, Some((id, tx, None)))
            }
        };

        let role = match launch {
            Some((id, tx, predecessor)) => {
                tracing::debug!(
                    key = %key,
                    flight_id = id,
                    queued = predecessor.is_some(),
                    "Starting upstream flight"
                );
                let call = make_call();
                let guard = CompletionGuard {
                    flights: Arc::clone(&self.flights),
                    key: key.to_string(),
                    id,
                    completed: false,
                };
                tokio::spawn(async move {
                    if let Some(mut previous) = predecessor {
                        // Err means the detached call died; either way it is over.
                        let _ = previous.wait_for(Option::is_some).await;
                    }
                    let result = call.await;
                    guard.complete(commit, &result);
                    tx.send_replace(Some(result));
                });
                FlightRole::Leader
            }
            None => {
                tracing::debug!(key = %key, "Joining upstream flight");
                FlightRole::Waiter
            }
        };

        FlightTicket { role, rx, waiters }
    }

    /// Detach the flight for `key`. Its call keeps running and still
    /// answers its tickets, but it takes no new joiners and will not
    /// commit. Returns whether an attached flight was registered.
    pub fn detach(&self, key: &str) -> bool {
        match self.flights.get_mut(key) {
            Some(mut flight) if !flight.detached => {
                flight.detached = true;
                true
            }
            _ => false,
        }
    }

    /// Detach every flight whose key starts with `prefix`.
    pub fn detach_prefix(&self, prefix: &str) -> usize {
        let mut detached = 0usize;
        for mut flight in self.flights.iter_mut() {
            if !flight.detached && flight.key().starts_with(prefix) {
                flight.detached = true;
                detached += 1;
            }
        }
        detached
    }

    /// Number of attached flights, the ones a miss would join.
    pub fn in_flight(&self) -> usize {
        self.flights.iter().filter(|flight| !flight.detached).count()
    }

    /// Whether a miss on `key` would join an existing flight.
    pub fn contains(&self, key: &str) -> bool {
        self.flights
            .get(key)
            .is_some_and(|flight| !flight.detached)
    }

    /// Live tickets (leader included) of the attached flight for `key`.
    pub fn waiters(&self, key: &str) -> Option<usize> {
        self.flights
            .get(key)
            .filter(|flight| !flight.detached)
            .map(|flight| flight.waiters.load(Ordering::SeqCst))
    }

    fn register(&self) -> (InFlight<T>, watch::Sender<Option<T>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        let flight = InFlight {
            id,
            result: rx,
            waiters: Arc::new(AtomicUsize::new(1)),
            detached: false,
        };
        (flight, tx)
    }
}

/// Removes the flight when the call task finishes, whether it produced a
/// result or unwound.
struct CompletionGuard<T> {
    flights: FlightTable<T>,
    key: String,
    id: u64,
    completed: bool,
}

impl<T> CompletionGuard<T> {
    fn complete<C: FnOnce(&T)>(mut self, commit: C, result: &T) {
        self.completed = true;
        if let Entry::Occupied(current) = self.flights.entry(self.key.clone()) {
            if current.get().id == self.id {
                let attached = !current.get().detached;
                if attached {
                    commit(result);
                }
                current.remove();
                if attached {
                    return;
                }
            }
        }
        tracing::debug!(
            key = %self.key,
            flight_id = self.id,
            "Flight detached before completion, skipping commit"
        );
    }
}

impl<T> Drop for CompletionGuard<T> {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!(
                key = %self.key,
                flight_id = self.id,
                "Upstream flight ended without a result"
            );
            self.flights
                .remove_if(&self.key, |_, flight| flight.id == self.id);
        }
    }
}

/// A caller's handle on a flight.
pub struct FlightTicket<T> {
    role: FlightRole,
    rx: watch::Receiver<Option<T>>,
    waiters: Arc<AtomicUsize>,
}

impl<T: Clone> FlightTicket<T> {
    pub fn role(&self) -> FlightRole {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == FlightRole::Leader
    }

    /// Wait for the shared result for at most `deadline`.
    pub async fn wait(mut self, deadline: Duration) -> Result<T, FlightError> {
        let rx = &mut self.rx;
        let waited = tokio::time::timeout(deadline, async move {
            let current = rx
                .wait_for(Option::is_some)
                .await
                .map_err(|_| FlightError::Abandoned)?;
            (*current).clone().ok_or(FlightError::Abandoned)
        })
        .await;

        match waited {
            Ok(result) => result,
            Err(_) => Err(FlightError::DeadlineElapsed),
        }
    }
}

impl<T> Drop for FlightTicket<T> {
    fn drop(&mut self) {
        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T> std::fmt::Debug for FlightTicket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightTicket")
            .field("role", &self.role)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_call() {
        let flights: Arc<SingleFlight<u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let mut release_rx = Some(release_rx);

        let mut tickets = Vec::new();
        for _ in 0..10 {
            let calls = Arc::clone(&calls);
            let release = release_rx.take();
            tickets.push(flights.join_or_lead(
                "accounts|accounts:list",
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if let Some(release) = release {
                        let _ = release.await;
                    }
                    42
                },
                |_| {},
            ));
        }

        assert_eq!(tickets.iter().filter(|t| t.is_leader()).count(), 1);
        assert_eq!(flights.waiters("accounts|accounts:list"), Some(10));

        release_tx.send(()).unwrap();
        for ticket in tickets {
            assert_eq!(ticket.wait(Duration::from_secs(5)).await, Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_share() {
        let flights: SingleFlight<&'static str> = SingleFlight::new();
        let a = flights.join_or_lead("accounts|a", || async { "a" }, |_| {});
        let b = flights.join_or_lead("accounts|b", || async { "b" }, |_| {});
        assert!(a.is_leader());
        assert!(b.is_leader());
        assert_eq!(a.wait(Duration::from_secs(1)).await, Ok("a"));
        assert_eq!(b.wait(Duration::from_secs(1)).await, Ok("b"));
    }

    #[tokio::test]
    async fn test_commit_runs_once_before_result_is_published() {
        let flights: SingleFlight<u32> = SingleFlight::new();
        let committed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&committed);

        let ticket = flights.join_or_lead(
            "instruments|BTC-USD",
            || async { 7 },
            move |value| sink.lock().unwrap().push(*value),
        );
        assert_eq!(ticket.wait(Duration::from_secs(1)).await, Ok(7));
        assert_eq!(*committed.lock().unwrap(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_deadline_does_not_cancel_call() {
        let flights: SingleFlight<u32> = SingleFlight::new();
        let committed = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&committed);

        let leader = flights.join_or_lead(
            "execution-history|today",
            || async {
                tokio::time::sleep(Duration::from_millis(2_000)).await;
                9
            },
            move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            },
        );
        let waiter = flights.join_or_lead(
            "execution-history|today",
            || async { 0 },
            |_| {},
        );
        assert_eq!(waiter.role(), FlightRole::Waiter);

        let started = tokio::time::Instant::now();
        assert_eq!(
            waiter.wait(Duration::from_millis(200)).await,
            Err(FlightError::DeadlineElapsed)
        );
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(started.elapsed() < Duration::from_millis(2_000));
        assert_eq!(committed.load(Ordering::SeqCst), 0);

        assert_eq!(leader.wait(Duration::from_secs(5)).await, Ok(9));
        assert_eq!(committed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detached_flight_answers_but_does_not_commit() {
        let flights: SingleFlight<u32> = SingleFlight::new();
        let committed = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&committed);
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let first = flights.join_or_lead(
            "accounts|accounts:list",
            || async move {
                let _ = release_rx.await;
                1
            },
            move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert!(flights.detach("accounts|accounts:list"));
        assert!(!flights.contains("accounts|accounts:list"));

        let second = flights.join_or_lead("accounts|accounts:list", || async { 2 }, |_| {});
        assert!(second.is_leader());

        release_tx.send(()).unwrap();
        assert_eq!(first.wait(Duration::from_secs(1)).await, Ok(1));
        assert_eq!(second.wait(Duration::from_secs(1)).await, Ok(2));
        assert_eq!(committed.load(Ordering::SeqCst), 0);
        assert!(flights.flights.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_after_detach_waits_for_detached_call() {
        let flights: SingleFlight<u32> = SingleFlight::new();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let call = |value: u32| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            move || async move {
                let running = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(running, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1_000)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                value
            }
        };

        let started = tokio::time::Instant::now();
        let first = flights.join_or_lead("accounts|accounts:list", call(1), |_| {});
        tokio::task::yield_now().await;

        assert!(flights.detach("accounts|accounts:list"));
        assert!(!flights.detach("accounts|accounts:list"));
        let second = flights.join_or_lead("accounts|accounts:list", call(2), |_| {});
        assert!(second.is_leader());
        assert!(flights.contains("accounts|accounts:list"));

        assert_eq!(first.wait(Duration::from_secs(5)).await, Ok(1));
        assert_eq!(second.wait(Duration::from_secs(5)).await, Ok(2));
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= Duration::from_millis(2_000));
        assert_eq!(flights.in_flight(), 0);
        assert!(flights.flights.is_empty());
    }

    #[tokio::test]
    async fn test_detached_flight_takes_no_joiners() {
        let flights: SingleFlight<u32> = SingleFlight::new();
        let first = flights.join_or_lead(
            "orders|orders:open",
            || std::future::pending::<u32>(),
            |_| {},
        );
        flights.detach("orders|orders:open");
        assert_eq!(flights.waiters("orders|orders:open"), None);
        assert_eq!(flights.in_flight(), 0);

        let second = flights.join_or_lead("orders|orders:open", || async { 3 }, |_| {});
        assert!(first.is_leader());
        assert!(second.is_leader());
        assert_eq!(flights.waiters("orders|orders:open"), Some(1));
    }

    #[tokio::test]
    async fn test_detach_prefix() {
        let flights: SingleFlight<u32> = SingleFlight::new();
        let _tickets: Vec<_> = ["accounts|a", "accounts|b", "strategies|a"]
            .into_iter()
            .map(|key| flights.join_or_lead(key, || std::future::pending::<u32>(), |_| {}))
            .collect();

        assert_eq!(flights.detach_prefix("accounts|"), 2);
        assert!(flights.contains("strategies|a"));
        assert_eq!(flights.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_panicking_call_abandons_flight() {
        let flights: SingleFlight<u32> = SingleFlight::new();
        let ticket = flights.join_or_lead(
            "health|health",
            || async { panic!("transport bug") },
            |_| {},
        );
        assert_eq!(
            ticket.wait(Duration::from_secs(1)).await,
            Err(FlightError::Abandoned)
        );
        // The next caller starts a fresh flight.
        tokio::task::yield_now().await;
        assert!(!flights.contains("health|health"));
        let next = flights.join_or_lead("health|health", || async { 1 }, |_| {});
        assert!(next.is_leader());
        assert_eq!(next.wait(Duration::from_secs(1)).await, Ok(1));
    }

    #[tokio::test]
    async fn test_dropped_ticket_decrements_waiters() {
        let flights: SingleFlight<u32> = SingleFlight::new();
        let leader = flights.join_or_lead(
            "orders|open",
            || std::future::pending::<u32>(),
            |_| {},
        );
        let waiter = flights.join_or_lead("orders|open", || async { 0 }, |_| {});
        assert_eq!(flights.waiters("orders|open"), Some(2));
        drop(waiter);
        assert_eq!(flights.waiters("orders|open"), Some(1));
        drop(leader);
        assert_eq!(flights.waiters("orders|open"), Some(0));
    }
}
