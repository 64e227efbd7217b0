//! Concurrency layer for the region transaction engine
//!
//! Two primitives, both scoped per region:
//! - `Latches`: short-lived per-key mutual exclusion serializing command
//!   execution. Distinct from transactional locks; a latch lives for one
//!   command, a lock for one transaction.
//! - `ConcurrencyManager`: in-memory index of outstanding transactional
//!   locks, consulted by readers before touching the backend.
//!
//! A latch acquisition always precedes any lock-table mutation for the same
//! key, which totally orders concurrent mutating commands per key.

#![warn(clippy::all)]

pub mod latch;
pub mod lock_table;

pub use latch::{Latch, LatchGuard, Latches};
pub use lock_table::{ConcurrencyManager, LockEntry};
