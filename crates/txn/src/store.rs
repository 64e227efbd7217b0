//! Transaction protocol state machine
//!
//! Per-key lock lifecycle:
//!
//! ```text
//! UNLOCKED -> PESSIMISTIC_LOCKED (optional) -> PREWRITTEN -> COMMITTED
//!                                                         \-> ROLLED_BACK
//! ```
//!
//! Terminal states are durable write records; rollback leaves a tombstone
//! at `start_ts` fencing late prewrites. The caller serializes commands per
//! key through the region's latch table; this module assumes the latches
//! are held and never re-checks them.

use crate::codec::{decode_bytes, decode_ts_key, encode_bytes, encode_ts_key};
use crate::record::{LockKind, LockRecord, WriteKind, WriteRecord};
use rangekv_concurrency::{ConcurrencyManager, LockEntry};
use rangekv_core::codec::prefix_next;
use rangekv_core::error::{Error, Result};
use rangekv_core::traits::{RawEngine, CF_DATA, CF_LOCK, CF_WRITE};
use rangekv_core::types::{IsolationLevel, Mutation, Op, RegionRange, Ts};
use std::sync::Arc;
use tracing::{debug, info};

/// Per-mutation pessimistic expectation carried by a prewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PessimisticCheck {
    /// The key was not pessimistically locked; any foreign lock conflicts.
    Skip,
    /// The key must hold this transaction's pessimistic lock. A non-zero
    /// `expected_for_update_ts` additionally pins the lock's timestamp.
    DoCheck {
        /// Expected `for_update_ts` of the held lock; zero skips the pin.
        expected_for_update_ts: Ts,
    },
}

/// A prewrite batch. All mutations share the transaction's identity.
#[derive(Debug, Clone)]
pub struct PrewriteRequest {
    /// The mutations, one per key.
    pub mutations: Vec<Mutation>,
    /// The transaction's primary key.
    pub primary_lock: Vec<u8>,
    /// Transaction start timestamp.
    pub start_ts: Ts,
    /// Lock time-to-live.
    pub lock_ttl: u64,
    /// Declared total key count of the transaction.
    pub txn_size: u64,
    /// Commit immediately when no key conflicts (single-phase commit).
    pub try_one_pc: bool,
    /// Caller's lower bound for the commit timestamp.
    pub min_commit_ts: Ts,
    /// Upper bound above which async commit / 1PC falls back to 2PC;
    /// zero disables the bound.
    pub max_commit_ts: Ts,
    /// Per-mutation pessimistic expectations; missing entries mean `Skip`.
    pub pessimistic_checks: Vec<PessimisticCheck>,
    /// The pessimistic transaction's for_update timestamp; zero when
    /// optimistic.
    pub for_update_ts: Ts,
    /// Derive the commit point from secondaries instead of a second phase.
    pub use_async_commit: bool,
    /// Secondary keys, recorded on the primary lock for recovery.
    pub secondaries: Vec<Vec<u8>>,
}

impl PrewriteRequest {
    /// A plain optimistic 2PC prewrite.
    pub fn optimistic(
        mutations: Vec<Mutation>,
        primary_lock: Vec<u8>,
        start_ts: Ts,
        lock_ttl: u64,
    ) -> Self {
        let txn_size = mutations.len() as u64;
        Self {
            mutations,
            primary_lock,
            start_ts,
            lock_ttl,
            txn_size,
            try_one_pc: false,
            min_commit_ts: 0,
            max_commit_ts: 0,
            pessimistic_checks: Vec::new(),
            for_update_ts: 0,
            use_async_commit: false,
            secondaries: Vec::new(),
        }
    }
}

/// Outcome of a prewrite batch.
#[derive(Debug, Default)]
pub struct PrewriteResult {
    /// Per-key failures; an empty list means every mutation prewrote.
    pub key_errors: Vec<Error>,
    /// Async commit: the commit timestamp floor; zero when 2PC applies.
    pub min_commit_ts: Ts,
    /// Single-phase commit timestamp; zero when no 1PC happened.
    pub one_pc_commit_ts: Ts,
}

/// Answer of `check_txn_status` on a primary lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnStatus {
    /// The lock is alive; resolver should back off.
    Locked {
        /// Remaining advertised time-to-live.
        ttl: u64,
        /// Commit timestamp floor for async-commit recovery.
        min_commit_ts: Ts,
    },
    /// The transaction committed.
    Committed {
        /// Its commit timestamp.
        commit_ts: Ts,
    },
    /// The transaction was rolled back (possibly by this very call, on TTL
    /// expiry).
    RolledBack,
}

/// Counters reported by one GC sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    /// Distinct user keys visited.
    pub keys_scanned: usize,
    /// MVCC versions (write records) removed.
    pub versions_removed: usize,
}

/// The transaction protocol executor over one raw backend.
pub struct TxnStore<E: RawEngine> {
    engine: Arc<E>,
}

impl<E: RawEngine> TxnStore<E> {
    /// Wrap a backend.
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    /// The underlying backend.
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    // ------------------------------------------------------------------
    // Backend primitives
    // ------------------------------------------------------------------

    fn load_lock(&self, key: &[u8]) -> Result<Option<LockRecord>> {
        match self.engine.get(CF_LOCK, &encode_bytes(key))? {
            Some(bytes) => Ok(Some(LockRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_lock(&self, cm: &ConcurrencyManager, key: &[u8], lock: &LockRecord) -> Result<()> {
        self.engine
            .put(CF_LOCK, &encode_bytes(key), &lock.to_bytes()?)?;
        cm.lock_key(Arc::new(LockEntry {
            key: key.to_vec(),
            primary_key: lock.primary_key.clone(),
            start_ts: lock.start_ts,
            ttl: lock.ttl,
            for_update_ts: lock.for_update_ts,
            min_commit_ts: lock.min_commit_ts,
        }));
        Ok(())
    }

    fn delete_lock(&self, cm: &ConcurrencyManager, key: &[u8]) -> Result<()> {
        self.engine.delete(CF_LOCK, &encode_bytes(key))?;
        cm.unlock_keys(&[key]);
        Ok(())
    }

    /// Newest write record with `commit_ts <= ts`.
    fn seek_write(&self, key: &[u8], ts: Ts) -> Result<Option<(Ts, WriteRecord)>> {
        let start = encode_ts_key(key, ts);
        let end = prefix_next(&encode_bytes(key));
        let kvs = self.engine.scan(CF_WRITE, &start, &end, 1)?;
        match kvs.into_iter().next() {
            Some((k, v)) => {
                let (_, commit_ts) = decode_ts_key(&k)?;
                Ok(Some((commit_ts, WriteRecord::from_bytes(&v)?)))
            }
            None => Ok(None),
        }
    }

    /// The write record this transaction left on `key`, if any. Scans
    /// newest-first and stops once records predate the transaction.
    fn get_txn_commit_record(&self, key: &[u8], start_ts: Ts) -> Result<Option<(Ts, WriteRecord)>> {
        let start = encode_ts_key(key, Ts::MAX);
        let end = prefix_next(&encode_bytes(key));
        for (k, v) in self.engine.scan(CF_WRITE, &start, &end, 0)? {
            let (_, commit_ts) = decode_ts_key(&k)?;
            if commit_ts < start_ts {
                break;
            }
            let record = WriteRecord::from_bytes(&v)?;
            if record.start_ts == start_ts {
                return Ok(Some((commit_ts, record)));
            }
        }
        Ok(None)
    }

    fn data_value(&self, key: &[u8], start_ts: Ts) -> Result<Option<Vec<u8>>> {
        self.engine.get(CF_DATA, &encode_ts_key(key, start_ts))
    }

    /// Committed value visible at `read_ts`, ignoring locks.
    fn get_committed(&self, key: &[u8], read_ts: Ts) -> Result<Option<Vec<u8>>> {
        let mut ts = read_ts;
        loop {
            let Some((commit_ts, write)) = self.seek_write(key, ts)? else {
                return Ok(None);
            };
            match write.kind {
                WriteKind::Put => return self.data_value(key, write.start_ts),
                WriteKind::Delete => return Ok(None),
                WriteKind::Lock | WriteKind::Rollback => {
                    if commit_ts == 0 {
                        return Ok(None);
                    }
                    ts = commit_ts - 1;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // PessimisticLock
    // ------------------------------------------------------------------

    /// Install pessimistic locks for a batch of `Lock` mutations. Outcomes
    /// are per key: a conflict on one key leaves sibling locks in place for
    /// the caller to keep or roll back.
    #[allow(clippy::too_many_arguments)]
    pub fn pessimistic_lock(
        &self,
        cm: &ConcurrencyManager,
        mutations: &[Mutation],
        primary_lock: &[u8],
        start_ts: Ts,
        lock_ttl: u64,
        for_update_ts: Ts,
        return_values: bool,
    ) -> Result<Vec<Result<Option<Vec<u8>>>>> {
        cm.update_max_ts(for_update_ts);
        let mut results = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            if mutation.op != Op::Lock {
                results.push(Err(Error::InvalidArgument(
                    "pessimistic lock mutation op must be Lock".into(),
                )));
                continue;
            }
            results.push(self.pessimistic_lock_key(
                cm,
                &mutation.key,
                primary_lock,
                start_ts,
                lock_ttl,
                for_update_ts,
                return_values,
            ));
        }
        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    fn pessimistic_lock_key(
        &self,
        cm: &ConcurrencyManager,
        key: &[u8],
        primary_lock: &[u8],
        start_ts: Ts,
        lock_ttl: u64,
        for_update_ts: Ts,
        return_values: bool,
    ) -> Result<Option<Vec<u8>>> {
        if let Some(mut lock) = self.load_lock(key)? {
            if lock.start_ts != start_ts {
                return Err(Error::LockConflict(lock.to_lock_info(key.to_vec())));
            }
            // idempotent re-lock: ttl and for_update_ts only move forward
            lock.ttl = lock.ttl.max(lock_ttl);
            lock.for_update_ts = lock.for_update_ts.max(for_update_ts);
            self.put_lock(cm, key, &lock)?;
        } else {
            if let Some((commit_ts, write)) = self.seek_write(key, Ts::MAX)? {
                if commit_ts > for_update_ts {
                    return Err(Error::WriteConflict {
                        start_ts,
                        conflict_start_ts: write.start_ts,
                        conflict_commit_ts: commit_ts,
                        key: key.to_vec(),
                    });
                }
            }
            if let Some((commit_ts, write)) = self.get_txn_commit_record(key, start_ts)? {
                // the transaction already ended on this key
                return match write.kind {
                    WriteKind::Rollback => Err(Error::WriteConflict {
                        start_ts,
                        conflict_start_ts: start_ts,
                        conflict_commit_ts: commit_ts,
                        key: key.to_vec(),
                    }),
                    _ => Err(Error::TxnAlreadyCommitted {
                        start_ts,
                        commit_ts,
                        key: key.to_vec(),
                    }),
                };
            }
            let lock = LockRecord {
                kind: LockKind::Pessimistic,
                primary_key: primary_lock.to_vec(),
                start_ts,
                ttl: lock_ttl,
                for_update_ts,
                txn_size: 0,
                min_commit_ts: 0,
                use_async_commit: false,
                secondaries: Vec::new(),
            };
            self.put_lock(cm, key, &lock)?;
        }
        if return_values {
            self.get_committed(key, for_update_ts)
        } else {
            Ok(None)
        }
    }

    /// Remove this transaction's pessimistic locks. Idempotent; locks
    /// already converted by prewrite are left alone.
    pub fn pessimistic_rollback(
        &self,
        cm: &ConcurrencyManager,
        keys: &[Vec<u8>],
        start_ts: Ts,
        for_update_ts: Ts,
    ) -> Result<()> {
        for key in keys {
            if let Some(lock) = self.load_lock(key)? {
                if lock.kind == LockKind::Pessimistic
                    && lock.start_ts == start_ts
                    && lock.for_update_ts <= for_update_ts
                {
                    self.delete_lock(cm, key)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Prewrite
    // ------------------------------------------------------------------

    /// Prewrite a batch. Key failures are reported per key; successfully
    /// prewritten siblings stay locked so the coordinator can decide.
    pub fn prewrite(&self, cm: &ConcurrencyManager, req: &PrewriteRequest) -> Result<PrewriteResult> {
        cm.update_max_ts(req.start_ts);

        // Async commit picks the commit floor up front; an overshoot of
        // max_commit_ts downgrades the whole batch to 2PC.
        let mut use_async_commit = req.use_async_commit;
        let mut async_min_commit_ts = 0;
        if use_async_commit {
            async_min_commit_ts = (req.start_ts + 1)
                .max(req.min_commit_ts)
                .max(cm.max_ts() + 1);
            if req.max_commit_ts > 0 && async_min_commit_ts > req.max_commit_ts {
                debug!(
                    start_ts = req.start_ts,
                    min_commit_ts = async_min_commit_ts,
                    max_commit_ts = req.max_commit_ts,
                    "async commit overshoots max_commit_ts, falling back to 2pc"
                );
                use_async_commit = false;
                async_min_commit_ts = 0;
            }
        }

        let mut result = PrewriteResult::default();
        for (idx, mutation) in req.mutations.iter().enumerate() {
            let check = req
                .pessimistic_checks
                .get(idx)
                .copied()
                .unwrap_or(PessimisticCheck::Skip);
            if let Err(e) =
                self.prewrite_key(cm, req, mutation, check, use_async_commit, async_min_commit_ts)
            {
                result.key_errors.push(e);
            }
        }
        if !result.key_errors.is_empty() {
            return Ok(result);
        }
        result.min_commit_ts = async_min_commit_ts;

        if req.try_one_pc {
            let commit_ts = (req.start_ts + 1)
                .max(req.min_commit_ts)
                .max(cm.max_ts() + 1);
            if req.max_commit_ts > 0 && commit_ts > req.max_commit_ts {
                // leave the locks for a regular second phase
                return Ok(result);
            }
            for mutation in &req.mutations {
                if mutation.op == Op::CheckNotExists {
                    continue;
                }
                self.commit_key(cm, &mutation.key, req.start_ts, commit_ts)?;
            }
            result.one_pc_commit_ts = commit_ts;
            result.min_commit_ts = 0;
        }
        Ok(result)
    }

    fn prewrite_key(
        &self,
        cm: &ConcurrencyManager,
        req: &PrewriteRequest,
        mutation: &Mutation,
        check: PessimisticCheck,
        use_async_commit: bool,
        async_min_commit_ts: Ts,
    ) -> Result<()> {
        let key = mutation.key.as_slice();
        match check {
            PessimisticCheck::DoCheck {
                expected_for_update_ts,
            } => match self.load_lock(key)? {
                Some(lock) if lock.start_ts == req.start_ts => {
                    if expected_for_update_ts != 0 && lock.for_update_ts != expected_for_update_ts {
                        return Err(Error::TxnNotFound {
                            start_ts: req.start_ts,
                            key: key.to_vec(),
                        });
                    }
                }
                Some(lock) => {
                    return Err(Error::LockConflict(lock.to_lock_info(key.to_vec())));
                }
                None => {
                    return Err(Error::TxnNotFound {
                        start_ts: req.start_ts,
                        key: key.to_vec(),
                    });
                }
            },
            PessimisticCheck::Skip => {
                if let Some(lock) = self.load_lock(key)? {
                    if lock.start_ts != req.start_ts {
                        return Err(Error::LockConflict(lock.to_lock_info(key.to_vec())));
                    }
                    // retry of our own prewrite: fall through and rewrite
                } else if let Some((commit_ts, write)) = self.seek_write(key, Ts::MAX)? {
                    if commit_ts == req.start_ts && write.kind == WriteKind::Rollback {
                        // the transaction was already rolled back here
                        return Err(Error::WriteConflict {
                            start_ts: req.start_ts,
                            conflict_start_ts: write.start_ts,
                            conflict_commit_ts: commit_ts,
                            key: key.to_vec(),
                        });
                    }
                    if commit_ts > req.start_ts {
                        if write.start_ts == req.start_ts && write.kind != WriteKind::Rollback {
                            // duplicate prewrite after our own commit
                            return Ok(());
                        }
                        return Err(Error::WriteConflict {
                            start_ts: req.start_ts,
                            conflict_start_ts: write.start_ts,
                            conflict_commit_ts: commit_ts,
                            key: key.to_vec(),
                        });
                    }
                }
            }
        }

        if matches!(mutation.op, Op::CheckNotExists | Op::PutIfAbsent)
            && self.get_committed(key, Ts::MAX)?.is_some()
        {
            return Err(Error::KeyExists { key: key.to_vec() });
        }
        if mutation.op == Op::CheckNotExists {
            // assert-only: no lock, no data
            return Ok(());
        }

        if matches!(mutation.op, Op::Put | Op::PutIfAbsent) {
            self.engine
                .put(CF_DATA, &encode_ts_key(key, req.start_ts), &mutation.value)?;
        }

        let is_primary = key == req.primary_lock.as_slice();
        let lock = LockRecord {
            kind: LockKind::from_op(mutation.op),
            primary_key: req.primary_lock.clone(),
            start_ts: req.start_ts,
            ttl: req.lock_ttl,
            for_update_ts: req.for_update_ts,
            txn_size: req.txn_size,
            min_commit_ts: if use_async_commit {
                async_min_commit_ts
            } else {
                0
            },
            use_async_commit,
            secondaries: if use_async_commit && is_primary {
                req.secondaries.clone()
            } else {
                Vec::new()
            },
        };
        self.put_lock(cm, key, &lock)
    }

    // ------------------------------------------------------------------
    // Commit / Rollback
    // ------------------------------------------------------------------

    /// Convert prewritten locks into committed versions at `commit_ts`.
    /// Duplicate commits are idempotent successes.
    pub fn commit(
        &self,
        cm: &ConcurrencyManager,
        keys: &[Vec<u8>],
        start_ts: Ts,
        commit_ts: Ts,
    ) -> Result<()> {
        if commit_ts <= start_ts {
            return Err(Error::InvalidArgument(format!(
                "commit_ts {commit_ts} must exceed start_ts {start_ts}"
            )));
        }
        for key in keys {
            self.commit_key(cm, key, start_ts, commit_ts)?;
        }
        Ok(())
    }

    fn commit_key(
        &self,
        cm: &ConcurrencyManager,
        key: &[u8],
        start_ts: Ts,
        commit_ts: Ts,
    ) -> Result<()> {
        match self.load_lock(key)? {
            Some(lock) if lock.start_ts == start_ts => {
                if lock.kind == LockKind::Pessimistic {
                    // never prewritten; nothing to commit. Drop the stray
                    // lock and report the transaction as missing here.
                    self.delete_lock(cm, key)?;
                    return Err(Error::TxnNotFound {
                        start_ts,
                        key: key.to_vec(),
                    });
                }
                let write = WriteRecord {
                    kind: WriteKind::from_lock_kind(lock.kind),
                    start_ts,
                };
                self.engine
                    .put(CF_WRITE, &encode_ts_key(key, commit_ts), &write.to_bytes()?)?;
                self.delete_lock(cm, key)?;
                Ok(())
            }
            _ => match self.get_txn_commit_record(key, start_ts)? {
                Some((_, write)) if write.kind != WriteKind::Rollback => Ok(()),
                _ => Err(Error::TxnNotFound {
                    start_ts,
                    key: key.to_vec(),
                }),
            },
        }
    }

    /// Roll back a transaction on the given keys. Fails hard if any key
    /// already committed; leaves a rollback tombstone either way.
    pub fn batch_rollback(
        &self,
        cm: &ConcurrencyManager,
        keys: &[Vec<u8>],
        start_ts: Ts,
    ) -> Result<()> {
        for key in keys {
            self.rollback_key(cm, key, start_ts)?;
        }
        Ok(())
    }

    fn rollback_key(&self, cm: &ConcurrencyManager, key: &[u8], start_ts: Ts) -> Result<()> {
        if let Some((commit_ts, write)) = self.get_txn_commit_record(key, start_ts)? {
            return match write.kind {
                WriteKind::Rollback => Ok(()),
                _ => Err(Error::TxnAlreadyCommitted {
                    start_ts,
                    commit_ts,
                    key: key.to_vec(),
                }),
            };
        }
        if let Some(lock) = self.load_lock(key)? {
            if lock.start_ts == start_ts {
                if lock.kind.blocks_read() {
                    self.engine
                        .delete(CF_DATA, &encode_ts_key(key, start_ts))?;
                }
                self.delete_lock(cm, key)?;
            }
        }
        let tombstone = WriteRecord {
            kind: WriteKind::Rollback,
            start_ts,
        };
        self.engine
            .put(CF_WRITE, &encode_ts_key(key, start_ts), &tombstone.to_bytes()?)
    }

    // ------------------------------------------------------------------
    // ResolveLock / CheckTxnStatus / Heartbeat
    // ------------------------------------------------------------------

    /// Bulk-commit (`commit_ts > 0`) or bulk-rollback (`commit_ts == 0`)
    /// every lock of `start_ts`, scoped to `keys` or, when empty, to the
    /// whole region range. Returns the number of locks resolved.
    pub fn resolve_lock(
        &self,
        cm: &ConcurrencyManager,
        start_ts: Ts,
        commit_ts: Ts,
        keys: &[Vec<u8>],
        region_range: &RegionRange,
    ) -> Result<usize> {
        if commit_ts > 0 && commit_ts <= start_ts {
            return Err(Error::InvalidArgument(format!(
                "resolve commit_ts {commit_ts} must exceed start_ts {start_ts}"
            )));
        }
        let targets: Vec<Vec<u8>> = if keys.is_empty() {
            self.scan_locks(region_range, start_ts)?
        } else {
            keys.to_vec()
        };
        let mut resolved = 0;
        for key in &targets {
            let Some(lock) = self.load_lock(key)? else {
                continue;
            };
            if lock.start_ts != start_ts {
                continue;
            }
            if commit_ts > 0 {
                self.commit_key(cm, key, start_ts, commit_ts)?;
            } else {
                self.rollback_key(cm, key, start_ts)?;
            }
            resolved += 1;
        }
        info!(start_ts, commit_ts, resolved, "resolved locks");
        Ok(resolved)
    }

    fn scan_locks(&self, range: &RegionRange, start_ts: Ts) -> Result<Vec<Vec<u8>>> {
        let start = encode_bytes(&range.start_key);
        let end = if range.end_key.is_empty() {
            Vec::new()
        } else {
            encode_bytes(&range.end_key)
        };
        let mut keys = Vec::new();
        for (k, v) in self.engine.scan(CF_LOCK, &start, &end, 0)? {
            let lock = LockRecord::from_bytes(&v)?;
            if lock.start_ts == start_ts {
                keys.push(decode_bytes(&k)?);
            }
        }
        Ok(keys)
    }

    /// Inspect (and possibly settle) the primary lock of a transaction.
    ///
    /// An expired lock is unilaterally rolled back, with the tombstone
    /// recorded so secondary resolution stays consistent. A live lock may
    /// have its `min_commit_ts` pushed past the calling reader. When no
    /// lock and no outcome exists, `rollback_if_not_exist` decides between
    /// writing the rollback tombstone and reporting `TxnNotFound`.
    #[allow(clippy::too_many_arguments)]
    pub fn check_txn_status(
        &self,
        cm: &ConcurrencyManager,
        primary_key: &[u8],
        lock_ts: Ts,
        caller_start_ts: Ts,
        current_ts: Ts,
        rollback_if_not_exist: bool,
    ) -> Result<TxnStatus> {
        cm.update_max_ts(caller_start_ts);
        if let Some(mut lock) = self.load_lock(primary_key)? {
            if lock.start_ts == lock_ts {
                if lock_ts.saturating_add(lock.ttl) < current_ts {
                    info!(lock_ts, ttl = lock.ttl, current_ts, "primary lock expired, rolling back");
                    self.rollback_key(cm, primary_key, lock_ts)?;
                    return Ok(TxnStatus::RolledBack);
                }
                // push the commit floor past the waiting reader so it can
                // proceed without waiting out the TTL
                if caller_start_ts >= lock.min_commit_ts {
                    lock.min_commit_ts = caller_start_ts + 1;
                    self.put_lock(cm, primary_key, &lock)?;
                }
                return Ok(TxnStatus::Locked {
                    ttl: lock.ttl,
                    min_commit_ts: lock.min_commit_ts,
                });
            }
        }
        match self.get_txn_commit_record(primary_key, lock_ts)? {
            Some((_, write)) if write.kind == WriteKind::Rollback => Ok(TxnStatus::RolledBack),
            Some((commit_ts, _)) => Ok(TxnStatus::Committed { commit_ts }),
            None if rollback_if_not_exist => {
                self.rollback_key(cm, primary_key, lock_ts)?;
                Ok(TxnStatus::RolledBack)
            }
            None => Err(Error::TxnNotFound {
                start_ts: lock_ts,
                key: primary_key.to_vec(),
            }),
        }
    }

    /// Extend the primary lock's TTL to `max(current, advise_ttl)`.
    /// Returns the effective TTL. Never creates a lock.
    pub fn heartbeat(
        &self,
        cm: &ConcurrencyManager,
        primary_key: &[u8],
        start_ts: Ts,
        advise_ttl: u64,
    ) -> Result<u64> {
        let Some(mut lock) = self.load_lock(primary_key)? else {
            return Err(Error::TxnNotFound {
                start_ts,
                key: primary_key.to_vec(),
            });
        };
        if lock.start_ts != start_ts {
            return Err(Error::TxnNotFound {
                start_ts,
                key: primary_key.to_vec(),
            });
        }
        if advise_ttl > lock.ttl {
            lock.ttl = advise_ttl;
            self.put_lock(cm, primary_key, &lock)?;
        }
        Ok(lock.ttl)
    }

    // ------------------------------------------------------------------
    // GC
    // ------------------------------------------------------------------

    /// Reclaim versions strictly older than `safe_point` that are
    /// superseded by a newer committed version, plus rollback/lock marks
    /// at or below it.
    pub fn gc(&self, region_range: &RegionRange, safe_point: Ts) -> Result<GcStats> {
        let start = encode_bytes(&region_range.start_key);
        let end = if region_range.end_key.is_empty() {
            Vec::new()
        } else {
            encode_bytes(&region_range.end_key)
        };

        let mut stats = GcStats::default();
        let mut doomed_writes: Vec<Vec<u8>> = Vec::new();
        let mut doomed_data: Vec<Vec<u8>> = Vec::new();

        let mut current_key: Option<Vec<u8>> = None;
        let mut found_visible = false;
        for (k, v) in self.engine.scan(CF_WRITE, &start, &end, 0)? {
            let (user_key, commit_ts) = decode_ts_key(&k)?;
            if current_key.as_ref() != Some(&user_key) {
                current_key = Some(user_key.clone());
                found_visible = false;
                stats.keys_scanned += 1;
            }
            if commit_ts > safe_point {
                continue;
            }
            let write = WriteRecord::from_bytes(&v)?;
            if found_visible {
                // superseded by a newer version at or below the safe point
                doomed_writes.push(k);
                if write.kind == WriteKind::Put {
                    doomed_data.push(encode_ts_key(&user_key, write.start_ts));
                }
                stats.versions_removed += 1;
                continue;
            }
            match write.kind {
                WriteKind::Put => {
                    // the visible version at the safe point stays
                    found_visible = true;
                }
                WriteKind::Delete => {
                    // nothing visible remains; the delete and everything
                    // under it can go
                    found_visible = true;
                    doomed_writes.push(k);
                    stats.versions_removed += 1;
                }
                WriteKind::Lock | WriteKind::Rollback => {
                    doomed_writes.push(k);
                    stats.versions_removed += 1;
                }
            }
        }

        // remove data first, then the write records pointing at it
        for key in doomed_data {
            self.engine.delete(CF_DATA, &key)?;
        }
        for key in doomed_writes {
            self.engine.delete(CF_WRITE, &key)?;
        }
        info!(
            safe_point,
            keys = stats.keys_scanned,
            removed = stats.versions_removed,
            "gc sweep finished"
        );
        Ok(stats)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Snapshot read of one key at `read_ts`. Under snapshot isolation a
    /// blocking lock (not in `resolved_locks`) surfaces as `LockConflict`.
    pub fn get(
        &self,
        key: &[u8],
        read_ts: Ts,
        isolation_level: IsolationLevel,
        resolved_locks: &[Ts],
    ) -> Result<Option<Vec<u8>>> {
        if isolation_level == IsolationLevel::SnapshotIsolation {
            if let Some(lock) = self.load_lock(key)? {
                if lock.kind.blocks_read()
                    && lock.start_ts <= read_ts
                    && !resolved_locks.contains(&lock.start_ts)
                {
                    return Err(Error::LockConflict(lock.to_lock_info(key.to_vec())));
                }
            }
        }
        self.get_committed(key, read_ts)
    }

    /// Snapshot read of many keys; absent keys are omitted.
    pub fn batch_get(
        &self,
        keys: &[Vec<u8>],
        read_ts: Ts,
        isolation_level: IsolationLevel,
        resolved_locks: &[Ts],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for key in keys {
            if let Some(value) = self.get(key, read_ts, isolation_level, resolved_locks)? {
                out.push((key.clone(), value));
            }
        }
        Ok(out)
    }

    /// Ordered snapshot scan over `[range.start_key, range.end_key)` at
    /// `read_ts`, returning at most `limit` pairs (zero = unlimited).
    pub fn scan(
        &self,
        range: &RegionRange,
        read_ts: Ts,
        limit: usize,
        isolation_level: IsolationLevel,
        resolved_locks: &[Ts],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let start = encode_bytes(&range.start_key);
        let end = if range.end_key.is_empty() {
            Vec::new()
        } else {
            encode_bytes(&range.end_key)
        };

        if isolation_level == IsolationLevel::SnapshotIsolation {
            for (k, v) in self.engine.scan(CF_LOCK, &start, &end, 0)? {
                let lock = LockRecord::from_bytes(&v)?;
                if lock.kind.blocks_read()
                    && lock.start_ts <= read_ts
                    && !resolved_locks.contains(&lock.start_ts)
                {
                    return Err(Error::LockConflict(lock.to_lock_info(decode_bytes(&k)?)));
                }
            }
        }

        let mut out = Vec::new();
        let mut settled_key: Option<Vec<u8>> = None;
        for (k, v) in self.engine.scan(CF_WRITE, &start, &end, 0)? {
            if limit > 0 && out.len() >= limit {
                break;
            }
            let (user_key, commit_ts) = decode_ts_key(&k)?;
            if settled_key.as_ref() == Some(&user_key) {
                continue;
            }
            if commit_ts > read_ts {
                continue;
            }
            let write = WriteRecord::from_bytes(&v)?;
            match write.kind {
                WriteKind::Put => {
                    let value = self.data_value(&user_key, write.start_ts)?.ok_or_else(|| {
                        Error::Internal(format!(
                            "missing data version for committed write at ts {}",
                            write.start_ts
                        ))
                    })?;
                    out.push((user_key.clone(), value));
                    settled_key = Some(user_key);
                }
                WriteKind::Delete => {
                    settled_key = Some(user_key);
                }
                WriteKind::Lock | WriteKind::Rollback => {
                    // not a decisive version; keep walking older entries
                }
            }
        }
        Ok(out)
    }
}
