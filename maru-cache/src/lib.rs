//! MARU Cache - TTL store and single-flight coordination
//!
//! The in-memory [`CacheStore`] keyed by resource-class-scoped
//! [`CacheKey`]s, and the [`SingleFlight`] table that collapses concurrent
//! misses on one key into a single upstream call.

pub mod entry;
pub mod key;
pub mod single_flight;
pub mod stats;
pub mod store;

pub use entry::{CacheEntry, EntryState};
pub use key::CacheKey;
pub use single_flight::{FlightError, FlightRole, FlightTicket, SingleFlight};
pub use stats::CacheStats;
pub use store::CacheStore;
