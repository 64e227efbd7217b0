//! In-memory transactional lock table
//!
//! One `ConcurrencyManager` per region indexes every outstanding pessimistic
//! or prewrite lock in the region's range, so readers can detect write-read
//! conflicts without a backend round trip. Entries are inserted only while
//! the key's latch is held, and removed on commit, rollback, or resolve.
//!
//! The table also tracks `max_ts`, the high-water mark of every timestamp
//! that passed through a conflict check; async-commit prewrites read it to
//! pick a safe `min_commit_ts`.

use dashmap::DashMap;
use rangekv_core::types::{IsolationLevel, LockInfo, Ts, TxnResultInfo};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One outstanding transactional lock, as cached in memory. The durable
/// twin lives in the backend's lock column family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    /// The locked key.
    pub key: Vec<u8>,
    /// The locking transaction's primary key.
    pub primary_key: Vec<u8>,
    /// The locking transaction's start timestamp.
    pub start_ts: Ts,
    /// Advertised time-to-live in milliseconds.
    pub ttl: u64,
    /// For pessimistic locks, the for_update timestamp; zero otherwise.
    pub for_update_ts: Ts,
    /// Minimum commit timestamp for async-commit recovery; zero otherwise.
    pub min_commit_ts: Ts,
}

impl LockEntry {
    /// Conflict detail handed back to callers.
    pub fn to_lock_info(&self) -> LockInfo {
        LockInfo {
            primary_key: self.primary_key.clone(),
            start_ts: self.start_ts,
            key: self.key.clone(),
            ttl: self.ttl,
            for_update_ts: self.for_update_ts,
            min_commit_ts: self.min_commit_ts,
        }
    }
}

/// Per-region in-memory lock index.
#[derive(Default)]
pub struct ConcurrencyManager {
    locks: DashMap<Vec<u8>, Arc<LockEntry>>,
    max_ts: AtomicU64,
}

impl ConcurrencyManager {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the lock record for `entry.key`. Caller must
    /// hold the key's latch.
    pub fn lock_key(&self, entry: Arc<LockEntry>) {
        self.locks.insert(entry.key.clone(), entry);
    }

    /// Remove lock records; removing an absent key is a no-op.
    pub fn unlock_keys<K: AsRef<[u8]>>(&self, keys: &[K]) {
        for key in keys {
            self.locks.remove(key.as_ref());
        }
    }

    /// Current lock on `key`, if any.
    pub fn get_lock(&self, key: &[u8]) -> Option<Arc<LockEntry>> {
        self.locks.get(key).map(|e| Arc::clone(e.value()))
    }

    /// Number of outstanding entries.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Raise the observed-timestamp high-water mark.
    pub fn update_max_ts(&self, ts: Ts) {
        self.max_ts.fetch_max(ts, Ordering::SeqCst);
    }

    /// The highest timestamp that passed through a conflict check.
    pub fn max_ts(&self) -> Ts {
        self.max_ts.load(Ordering::SeqCst)
    }

    /// Check a key set for conflicting locks. Returns `true` (conflict) iff
    /// under `SnapshotIsolation` some key carries a lock with
    /// `lock.start_ts <= start_ts` not listed in `resolved_locks`; fills
    /// `txn_result` with the first conflicting lock's detail. Under
    /// `ReadCommitted` the check is skipped.
    pub fn check_keys<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
        isolation_level: IsolationLevel,
        start_ts: Ts,
        resolved_locks: &[Ts],
        txn_result: &mut TxnResultInfo,
    ) -> bool {
        self.update_max_ts(start_ts);
        if isolation_level == IsolationLevel::ReadCommitted {
            return false;
        }
        for key in keys {
            if let Some(entry) = self.locks.get(key.as_ref()) {
                if Self::conflicts(entry.value(), start_ts, resolved_locks) {
                    txn_result.locked = Some(entry.to_lock_info());
                    return true;
                }
            }
        }
        false
    }

    /// Range variant of `check_keys` over `[start_key, end_key)`; an empty
    /// `end_key` means unbounded. Same conflict predicate, so a key-set
    /// check and a range check can never disagree.
    pub fn check_range(
        &self,
        start_key: &[u8],
        end_key: &[u8],
        isolation_level: IsolationLevel,
        start_ts: Ts,
        resolved_locks: &[Ts],
        txn_result: &mut TxnResultInfo,
    ) -> bool {
        self.update_max_ts(start_ts);
        if isolation_level == IsolationLevel::ReadCommitted {
            return false;
        }
        for entry in self.locks.iter() {
            let key = entry.key().as_slice();
            if key < start_key || (!end_key.is_empty() && key >= end_key) {
                continue;
            }
            if Self::conflicts(entry.value(), start_ts, resolved_locks) {
                txn_result.locked = Some(entry.to_lock_info());
                return true;
            }
        }
        false
    }

    fn conflicts(entry: &LockEntry, start_ts: Ts, resolved_locks: &[Ts]) -> bool {
        entry.start_ts <= start_ts && !resolved_locks.contains(&entry.start_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &[u8], start_ts: Ts) -> Arc<LockEntry> {
        Arc::new(LockEntry {
            key: key.to_vec(),
            primary_key: b"primary".to_vec(),
            start_ts,
            ttl: 3000,
            for_update_ts: 0,
            min_commit_ts: 0,
        })
    }

    #[test]
    fn lock_then_check_conflicts() {
        let cm = ConcurrencyManager::new();
        cm.lock_key(entry(b"a", 10));

        let mut info = TxnResultInfo::default();
        let conflict = cm.check_keys(
            &[b"a".to_vec()],
            IsolationLevel::SnapshotIsolation,
            15,
            &[],
            &mut info,
        );
        assert!(conflict);
        let locked = info.locked.unwrap();
        assert_eq!(locked.start_ts, 10);
        assert_eq!(locked.primary_key, b"primary");
    }

    #[test]
    fn newer_lock_does_not_block_older_reader() {
        let cm = ConcurrencyManager::new();
        cm.lock_key(entry(b"a", 20));

        let mut info = TxnResultInfo::default();
        let conflict = cm.check_keys(
            &[b"a".to_vec()],
            IsolationLevel::SnapshotIsolation,
            15,
            &[],
            &mut info,
        );
        assert!(!conflict);
        assert!(info.locked.is_none());
    }

    #[test]
    fn resolved_locks_are_bypassed() {
        let cm = ConcurrencyManager::new();
        cm.lock_key(entry(b"a", 10));

        let mut info = TxnResultInfo::default();
        let conflict = cm.check_keys(
            &[b"a".to_vec()],
            IsolationLevel::SnapshotIsolation,
            15,
            &[10],
            &mut info,
        );
        assert!(!conflict);
    }

    #[test]
    fn read_committed_skips_check() {
        let cm = ConcurrencyManager::new();
        cm.lock_key(entry(b"a", 10));

        let mut info = TxnResultInfo::default();
        let conflict = cm.check_keys(
            &[b"a".to_vec()],
            IsolationLevel::ReadCommitted,
            15,
            &[],
            &mut info,
        );
        assert!(!conflict);
    }

    #[test]
    fn unlock_is_idempotent() {
        let cm = ConcurrencyManager::new();
        cm.lock_key(entry(b"a", 10));
        cm.unlock_keys(&[b"a".to_vec()]);
        cm.unlock_keys(&[b"a".to_vec(), b"missing".to_vec()]);
        assert!(cm.is_empty());
    }

    #[test]
    fn check_range_matches_check_keys() {
        let cm = ConcurrencyManager::new();
        cm.lock_key(entry(b"b", 10));
        cm.lock_key(entry(b"x", 10));

        let mut by_keys = TxnResultInfo::default();
        let mut by_range = TxnResultInfo::default();
        let keys_hit = cm.check_keys(
            &[b"b".to_vec()],
            IsolationLevel::SnapshotIsolation,
            12,
            &[],
            &mut by_keys,
        );
        // range [a, c) covers "b" but not "x"
        let range_hit = cm.check_range(
            b"a",
            b"c",
            IsolationLevel::SnapshotIsolation,
            12,
            &[],
            &mut by_range,
        );
        assert_eq!(keys_hit, range_hit);
        assert_eq!(
            by_keys.locked.unwrap().key,
            by_range.locked.unwrap().key
        );

        // range [c, w) covers neither
        let mut info = TxnResultInfo::default();
        assert!(!cm.check_range(
            b"c",
            b"w",
            IsolationLevel::SnapshotIsolation,
            12,
            &[],
            &mut info,
        ));
    }

    #[test]
    fn unbounded_range_end_scans_everything() {
        let cm = ConcurrencyManager::new();
        cm.lock_key(entry(b"zz", 10));
        let mut info = TxnResultInfo::default();
        assert!(cm.check_range(
            b"a",
            b"",
            IsolationLevel::SnapshotIsolation,
            12,
            &[],
            &mut info,
        ));
    }

    #[test]
    fn max_ts_tracks_checks_monotonically() {
        let cm = ConcurrencyManager::new();
        let mut info = TxnResultInfo::default();
        cm.check_keys(
            &[b"a".to_vec()],
            IsolationLevel::SnapshotIsolation,
            50,
            &[],
            &mut info,
        );
        cm.check_keys(
            &[b"a".to_vec()],
            IsolationLevel::SnapshotIsolation,
            20,
            &[],
            &mut info,
        );
        assert_eq!(cm.max_ts(), 50);
    }

    #[test]
    fn relock_overwrites_entry() {
        let cm = ConcurrencyManager::new();
        cm.lock_key(entry(b"a", 10));
        cm.lock_key(entry(b"a", 30));
        assert_eq!(cm.len(), 1);
        assert_eq!(cm.get_lock(b"a").unwrap().start_ts, 30);
    }
}
