//! Collaborator traits consumed by the engine
//!
//! The raft replication layer, the raw KV backend, meta persistence, and the
//! auxiliary index engines are external collaborators. Each is consumed
//! through one narrow, object-safe trait so tests can substitute doubles and
//! deployments can swap implementations without touching the engine.

use crate::error::Result;
use crate::types::{PeerId, RegionId};

/// Column family holding MVCC data versions (`user_key ++ ts_suffix`).
pub const CF_DATA: &str = "data";
/// Column family holding in-flight lock records (`user_key`).
pub const CF_LOCK: &str = "lock";
/// Column family holding committed write records (`user_key ++ ts_suffix`).
pub const CF_WRITE: &str = "write";
/// Column family holding durable region/raft meta records.
pub const CF_META: &str = "meta";

/// Raw column-family KV backend (RocksDB-like).
///
/// Single-key operations are atomic; multi-key atomicity is the transaction
/// protocol's job, built on latching plus the lock/commit protocol, never on
/// backend transactions.
///
/// Thread safety: all methods must be callable concurrently.
pub trait RawEngine: Send + Sync {
    /// Point lookup.
    ///
    /// # Errors
    /// Returns an error if the backend read fails.
    fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Write a key.
    ///
    /// # Errors
    /// Returns an error if the backend write fails.
    fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove a key. Removing an absent key is a no-op.
    ///
    /// # Errors
    /// Returns an error if the backend write fails.
    fn delete(&self, cf: &str, key: &[u8]) -> Result<()>;

    /// Ordered scan of `[start, end)`; an empty `end` means unbounded,
    /// `limit == 0` means unlimited.
    ///
    /// # Errors
    /// Returns an error if the backend read fails.
    fn scan(&self, cf: &str, start: &[u8], end: &[u8], limit: usize)
        -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Remove every key in `[start, end)`.
    ///
    /// # Errors
    /// Returns an error if the backend write fails.
    fn delete_range(&self, cf: &str, start: &[u8], end: &[u8]) -> Result<()>;
}

/// View of the replication layer: leadership queries only.
///
/// Loss of leadership mid-command surfaces as a retryable `NotLeader`
/// error on the next validation, never as silent success.
pub trait RaftRouter: Send + Sync {
    /// Whether this node currently leads the region's replication group.
    fn is_leader(&self, region_id: RegionId) -> bool;

    /// Cached leader hint for redirect responses, if known.
    fn leader_id(&self, region_id: RegionId) -> Option<PeerId>;
}

/// Durable persistence for region and raft meta records.
///
/// The registry writes durable state first and publishes the in-memory
/// change second, so a crash between the two never leaves memory ahead of
/// disk.
pub trait MetaStore: Send + Sync {
    /// Persist one record.
    ///
    /// # Errors
    /// Returns an error if the write fails; the in-memory update must then
    /// not be applied.
    fn save(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove one record. Removing an absent record is a no-op.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Load every record whose key starts with `prefix`, for startup
    /// recovery.
    ///
    /// # Errors
    /// Returns an error if the read fails.
    fn load_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

/// Readiness probe for the auxiliary (vector/document) index engines.
/// Consulted by write validators before index-affecting mutations.
pub trait IndexChecker: Send + Sync {
    /// Whether the region's index can serve.
    fn is_ready(&self, region_id: RegionId) -> bool;

    /// Whether the region's index build failed permanently.
    fn is_build_error(&self, region_id: RegionId) -> bool;
}
