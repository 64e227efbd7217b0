//! MVCC transaction protocol for RangeKV
//!
//! Percolator-style multi-phase commit over a raw column-family backend:
//!
//! - `CF_DATA`: `mvcc_key(user_key) ++ ts_suffix(start_ts)` -> value
//! - `CF_LOCK`: `mvcc_key(user_key)` -> `LockRecord`
//! - `CF_WRITE`: `mvcc_key(user_key) ++ ts_suffix(commit_ts)` -> `WriteRecord`
//!
//! The timestamp suffix is the complement of the big-endian timestamp, so a
//! key's versions sort newest first and one forward scan finds "the newest
//! version at or below ts".
//!
//! `TxnStore` implements the operations (pessimistic lock, prewrite,
//! commit, rollback, resolve, check-status, heartbeat, GC, reads); callers
//! hold the per-key latches, so two commands touching the same key never
//! interleave their check-then-write sequences.

#![warn(clippy::all)]

pub mod codec;
pub mod record;
pub mod store;

pub use record::{LockRecord, LockKind, WriteKind, WriteRecord};
pub use store::{
    GcStats, PessimisticCheck, PrewriteRequest, PrewriteResult, TxnStatus, TxnStore,
};
