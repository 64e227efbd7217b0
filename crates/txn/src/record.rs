//! Durable lock and write records
//!
//! `LockRecord` is the value in the lock column family: one per key held by
//! an in-flight transaction. `WriteRecord` is the value in the write column
//! family: one per committed (or explicitly rolled back) version, keyed by
//! commit timestamp.

use rangekv_core::error::Result;
use rangekv_core::types::{LockInfo, Op, Ts};
use serde::{Deserialize, Serialize};

/// What kind of lock a record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockKind {
    /// Taken by PessimisticLock before prewrite; carries no provisional
    /// value and does not block readers.
    Pessimistic,
    /// Prewrite of a `Put`/`PutIfAbsent`; a provisional value exists.
    Put,
    /// Prewrite of a `Delete`.
    Delete,
    /// Prewrite of a `Lock` mutation: key is locked, value untouched.
    Lock,
}

impl LockKind {
    /// The lock kind a prewrite mutation produces.
    pub fn from_op(op: Op) -> Self {
        match op {
            Op::Put | Op::PutIfAbsent => LockKind::Put,
            Op::Delete => LockKind::Delete,
            Op::Lock | Op::CheckNotExists => LockKind::Lock,
        }
    }

    /// Whether a reader at a later timestamp must treat this lock as a
    /// pending write. Pessimistic and Lock locks never change the value,
    /// so reads pass them by.
    pub fn blocks_read(self) -> bool {
        matches!(self, LockKind::Put | LockKind::Delete)
    }
}

/// One in-flight transactional lock, durable twin of the memory lock entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Lock kind.
    pub kind: LockKind,
    /// The transaction's primary key.
    pub primary_key: Vec<u8>,
    /// The transaction's start timestamp.
    pub start_ts: Ts,
    /// Advertised time-to-live.
    pub ttl: u64,
    /// For pessimistic locks, the timestamp the lock was taken at.
    pub for_update_ts: Ts,
    /// Declared transaction size (number of keys), for resolver heuristics.
    pub txn_size: u64,
    /// Async commit: smallest commit timestamp this lock permits.
    pub min_commit_ts: Ts,
    /// Async commit: whether the commit point is derived from secondaries.
    pub use_async_commit: bool,
    /// Async commit: the secondary keys, recorded on the primary only.
    pub secondaries: Vec<Vec<u8>>,
}

impl LockRecord {
    /// Serialize for the lock column family.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from the lock column family.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Conflict detail for responses, tagged with the conflicting key.
    pub fn to_lock_info(&self, key: Vec<u8>) -> LockInfo {
        LockInfo {
            primary_key: self.primary_key.clone(),
            start_ts: self.start_ts,
            key,
            ttl: self.ttl,
            for_update_ts: self.for_update_ts,
            min_commit_ts: self.min_commit_ts,
        }
    }
}

/// What kind of version a write record closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteKind {
    /// A committed value; data lives at the record's `start_ts`.
    Put,
    /// A committed deletion.
    Delete,
    /// A committed `Lock` mutation; value unchanged.
    Lock,
    /// A rollback tombstone at `start_ts`, fencing late prewrites.
    Rollback,
}

impl WriteKind {
    /// The write kind a lock converts into at commit.
    pub fn from_lock_kind(kind: LockKind) -> Self {
        match kind {
            LockKind::Put => WriteKind::Put,
            LockKind::Delete => WriteKind::Delete,
            // a committed pessimistic lock that never prewrote data
            // degenerates to a value-preserving Lock record
            LockKind::Lock | LockKind::Pessimistic => WriteKind::Lock,
        }
    }
}

/// One entry in the write column family, keyed by `commit_ts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRecord {
    /// Version kind.
    pub kind: WriteKind,
    /// The owning transaction's start timestamp (locates the data version).
    pub start_ts: Ts,
}

impl WriteRecord {
    /// Serialize for the write column family.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize from the write column family.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_kind_from_op() {
        assert_eq!(LockKind::from_op(Op::Put), LockKind::Put);
        assert_eq!(LockKind::from_op(Op::PutIfAbsent), LockKind::Put);
        assert_eq!(LockKind::from_op(Op::Delete), LockKind::Delete);
        assert_eq!(LockKind::from_op(Op::Lock), LockKind::Lock);
    }

    #[test]
    fn read_blocking_kinds() {
        assert!(LockKind::Put.blocks_read());
        assert!(LockKind::Delete.blocks_read());
        assert!(!LockKind::Pessimistic.blocks_read());
        assert!(!LockKind::Lock.blocks_read());
    }

    #[test]
    fn lock_record_round_trip() {
        let record = LockRecord {
            kind: LockKind::Put,
            primary_key: b"pk".to_vec(),
            start_ts: 10,
            ttl: 3000,
            for_update_ts: 0,
            txn_size: 2,
            min_commit_ts: 11,
            use_async_commit: true,
            secondaries: vec![b"s1".to_vec(), b"s2".to_vec()],
        };
        let restored = LockRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, record);

        let info = record.to_lock_info(b"k".to_vec());
        assert_eq!(info.start_ts, 10);
        assert_eq!(info.key, b"k");
        assert_eq!(info.primary_key, b"pk");
    }

    #[test]
    fn write_record_round_trip() {
        let record = WriteRecord {
            kind: WriteKind::Delete,
            start_ts: 42,
        };
        let restored = WriteRecord::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn commit_conversion() {
        assert_eq!(WriteKind::from_lock_kind(LockKind::Put), WriteKind::Put);
        assert_eq!(
            WriteKind::from_lock_kind(LockKind::Delete),
            WriteKind::Delete
        );
        assert_eq!(WriteKind::from_lock_kind(LockKind::Lock), WriteKind::Lock);
    }
}
