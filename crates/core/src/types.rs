//! Core types for the region transaction engine
//!
//! This module defines the foundational types:
//! - RegionId / PeerId / StoreId: numeric identifiers assigned by the cluster
//! - Ts: logical timestamp defining MVCC visibility
//! - RegionEpoch: staleness-detection pair bumped on range / membership change
//! - RegionRange: half-open byte interval owned by a region
//! - RegionState: region lifecycle state machine
//! - Mutation / Op: one line of a multi-key transaction request

use crate::codec::hex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of a region, assigned at creation and never reused
/// for a live region (deletion tombstones the id).
pub type RegionId = u64;

/// Unique identifier of a peer (one replica of a region).
pub type PeerId = u64;

/// Unique identifier of a store (one node holding many peers).
pub type StoreId = u64;

/// Logical timestamp. `start_ts` and `commit_ts` of the transaction
/// protocol are both of this type; visibility is defined purely by
/// comparison, never by wall-clock interpretation.
pub type Ts = u64;

/// Region epoch: `version` increments on every split/merge affecting the
/// range, `conf_version` on every peer-set change. Monotonic, never
/// decreases over a region's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionEpoch {
    /// Bumped by range-affecting operations (split, merge).
    pub version: u64,
    /// Bumped by membership-affecting operations (add/remove peer).
    pub conf_version: u64,
}

impl RegionEpoch {
    /// Create an epoch from its two counters.
    pub fn new(version: u64, conf_version: u64) -> Self {
        Self {
            version,
            conf_version,
        }
    }
}

// Lexicographic on (version, conf_version): a range change outranks a
// membership change at the same version.
impl Ord for RegionEpoch {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.version
            .cmp(&other.version)
            .then(self.conf_version.cmp(&other.conf_version))
    }
}

impl PartialOrd for RegionEpoch {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RegionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.version, self.conf_version)
    }
}

/// Half-open byte-string key interval `[start_key, end_key)`.
///
/// An empty `end_key` means "unbounded above"; both keys empty means the
/// whole key space. A non-empty pair with `start_key >= end_key` is invalid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionRange {
    /// Inclusive lower bound.
    pub start_key: Vec<u8>,
    /// Exclusive upper bound; empty means unbounded.
    pub end_key: Vec<u8>,
}

impl RegionRange {
    /// Create a range from its bounds.
    pub fn new(start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>) -> Self {
        Self {
            start_key: start_key.into(),
            end_key: end_key.into(),
        }
    }

    /// Whether the bounds form a legal half-open interval.
    pub fn is_valid(&self) -> bool {
        self.end_key.is_empty() || self.start_key < self.end_key
    }

    /// Half-open interval membership test, O(key length).
    pub fn contains_key(&self, key: &[u8]) -> bool {
        key >= self.start_key.as_slice() && (self.end_key.is_empty() || key < self.end_key.as_slice())
    }

    /// Whether `other` is fully contained in `self`.
    pub fn contains_range(&self, other: &RegionRange) -> bool {
        if other.start_key.as_slice() < self.start_key.as_slice() {
            return false;
        }
        if self.end_key.is_empty() {
            return true;
        }
        !other.end_key.is_empty() && other.end_key <= self.end_key
    }

    /// Whether the two ranges overlap in at least one key.
    pub fn intersects(&self, other: &RegionRange) -> bool {
        let left_open = |r: &RegionRange| r.end_key.is_empty();
        (left_open(other) || self.start_key < other.end_key)
            && (left_open(self) || other.start_key < self.end_key)
    }
}

impl fmt::Display for RegionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", hex(&self.start_key), hex(&self.end_key))
    }
}

/// Role of a peer within its region's replication group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerRole {
    /// Full voting replica.
    #[default]
    Voter,
    /// Non-voting replica catching up or serving reads.
    Learner,
}

/// One replica location of a region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// The store hosting this peer.
    pub store_id: StoreId,
    /// The peer's own id, unique within the region.
    pub peer_id: PeerId,
    /// Voting role.
    pub role: PeerRole,
}

impl Peer {
    /// Create a voter peer.
    pub fn new(store_id: StoreId, peer_id: PeerId) -> Self {
        Self {
            store_id,
            peer_id,
            role: PeerRole::Voter,
        }
    }
}

/// Region lifecycle state.
///
/// ```text
/// New -> Normal -> {Splitting, Merging} -> Normal
///                \-> Standby <-> Normal
///                 \-> Error -> Deleting -> Deleted
/// ```
///
/// Any write on a non-`Normal` region fails with `RegionNotReady`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionState {
    /// Created, bootstrap not yet complete.
    #[default]
    New,
    /// Serving reads and writes.
    Normal,
    /// Mid-split; epoch will bump when finalized.
    Splitting,
    /// Mid-merge; epoch will bump when finalized.
    Merging,
    /// Being torn down.
    Deleting,
    /// Terminal tombstone; the id is never reused.
    Deleted,
    /// Read-only replica serving stale reads.
    Standby,
    /// Unrecoverable failure, surfaced to the operator, not auto-retried.
    Error,
}

impl RegionState {
    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(self, next: RegionState) -> bool {
        use RegionState::*;
        matches!(
            (self, next),
            (New, Normal)
                | (New, Error)
                | (New, Deleting)
                | (Normal, Splitting)
                | (Normal, Merging)
                | (Normal, Standby)
                | (Normal, Deleting)
                | (Normal, Error)
                | (Splitting, Normal)
                | (Splitting, Error)
                | (Merging, Normal)
                | (Merging, Error)
                | (Standby, Normal)
                | (Standby, Deleting)
                | (Standby, Error)
                | (Error, Deleting)
                | (Deleting, Deleted)
        )
    }

    /// Alive regions are everything except `Deleting`/`Deleted`/`Error`.
    pub fn is_alive(self) -> bool {
        !matches!(
            self,
            RegionState::Deleting | RegionState::Deleted | RegionState::Error
        )
    }

    /// Only `Normal` regions accept writes.
    pub fn is_serving(self) -> bool {
        self == RegionState::Normal
    }
}

impl fmt::Display for RegionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegionState::New => "New",
            RegionState::Normal => "Normal",
            RegionState::Splitting => "Splitting",
            RegionState::Merging => "Merging",
            RegionState::Deleting => "Deleting",
            RegionState::Deleted => "Deleted",
            RegionState::Standby => "Standby",
            RegionState::Error => "Error",
        };
        f.write_str(name)
    }
}

/// Operation kind of a single transaction mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Write a value.
    Put,
    /// Remove a value.
    Delete,
    /// Lock the key without changing its value (pessimistic lock line).
    Lock,
    /// Assert the key does not exist; never writes.
    CheckNotExists,
    /// Write only if the key does not already exist.
    PutIfAbsent,
}

/// One line of a multi-key transaction request. Mutations within one
/// prewrite batch share `start_ts`, `primary_lock` and `lock_ttl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    /// What to do to the key.
    pub op: Op,
    /// The user key.
    pub key: Vec<u8>,
    /// The value for `Put`/`PutIfAbsent`; ignored otherwise.
    pub value: Vec<u8>,
}

impl Mutation {
    /// Convenience constructor for a `Put`.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            op: Op::Put,
            key: key.into(),
            value: value.into(),
        }
    }

    /// Convenience constructor for a `Delete`.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self {
            op: Op::Delete,
            key: key.into(),
            value: Vec::new(),
        }
    }

    /// Convenience constructor for a pessimistic `Lock` line.
    pub fn lock(key: impl Into<Vec<u8>>) -> Self {
        Self {
            op: Op::Lock,
            key: key.into(),
            value: Vec::new(),
        }
    }
}

/// Read isolation level of a transactional read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Readers block on (or resolve) uncommitted locks with
    /// `lock.start_ts <= read_ts`.
    #[default]
    SnapshotIsolation,
    /// Readers ignore uncommitted locks.
    ReadCommitted,
}

/// Detail of an outstanding lock, surfaced to the caller on conflict so it
/// can wait, resolve, or retry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// The transaction's primary key; its lock decides the outcome.
    pub primary_key: Vec<u8>,
    /// The locking transaction's start timestamp.
    pub start_ts: Ts,
    /// The key the conflict was observed on.
    pub key: Vec<u8>,
    /// Remaining time-to-live advertised by the lock.
    pub ttl: u64,
    /// For pessimistic locks, the timestamp the lock was taken at.
    pub for_update_ts: Ts,
    /// Minimum commit timestamp for async-commit recovery.
    pub min_commit_ts: Ts,
}

/// Per-request transaction conflict report, populated by lock checks so the
/// response can carry enough detail for resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnResultInfo {
    /// Present when a read or write ran into an outstanding lock.
    pub locked: Option<LockInfo>,
}
