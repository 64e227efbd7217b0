//! Region descriptor
//!
//! The mutable core of a region (definition, epoch, flags, state) is an
//! immutable snapshot behind `RwLock<Arc<_>>`: readers clone the Arc and see
//! a frozen, internally consistent view — a range update can never be
//! observed without its matching epoch bump. Writers rebuild the snapshot
//! under one short critical section and publish it atomically.
//!
//! Timestamp high-water marks and serving statistics sit beside the
//! snapshot as monotonic atomics; they are advisory, not part of the
//! consistency contract.

use parking_lot::RwLock;
use rangekv_core::codec::encode_range;
use rangekv_core::error::{Error, Result};
use rangekv_core::traits::MetaStore;
use rangekv_core::types::{
    IsolationLevel, Peer, PeerId, RegionEpoch, RegionId, RegionRange, RegionState, Ts,
    TxnResultInfo,
};
use rangekv_concurrency::{ConcurrencyManager, LockEntry, Latches};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// The durable definition of a region, as assigned by the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDefinition {
    /// Immutable region id.
    pub region_id: RegionId,
    /// Human-readable name for logs and metrics.
    pub name: String,
    /// Owned key interval, user key space.
    pub range: RegionRange,
    /// Current epoch.
    pub epoch: RegionEpoch,
    /// Replica locations.
    pub peers: Vec<Peer>,
}

/// The snapshot-published mutable core. Everything here is covered by the
/// descriptor's single write lock and serialized into the meta record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RegionInner {
    pub(crate) definition: RegionDefinition,
    pub(crate) state: RegionState,
    pub(crate) state_history: Vec<RegionState>,
    pub(crate) disable_change: bool,
    pub(crate) temporary_disable_change: bool,
    pub(crate) parent_id: RegionId,
    pub(crate) last_change_job_id: u64,
}

/// Serving statistics: idle/hot detection, not correctness.
#[derive(Debug, Default)]
pub struct RegionStats {
    serving_request_count: AtomicI64,
    last_serving_time_s: AtomicI64,
}

/// Per-region metadata descriptor plus the region's two concurrency tables.
pub struct Region {
    region_id: RegionId,
    inner: RwLock<Arc<RegionInner>>,

    leader_id: AtomicU64,
    raw_applied_max_ts: AtomicU64,
    txn_access_max_ts: AtomicU64,
    stats: RegionStats,

    latches: Latches,
    concurrency: ConcurrencyManager,
}

impl Region {
    /// Create a region in `New` state from its definition.
    pub fn new(definition: RegionDefinition) -> Arc<Self> {
        let region_id = definition.region_id;
        Arc::new(Self {
            region_id,
            inner: RwLock::new(Arc::new(RegionInner {
                definition,
                state: RegionState::New,
                state_history: vec![RegionState::New],
                disable_change: false,
                temporary_disable_change: false,
                parent_id: 0,
                last_change_job_id: 0,
            })),
            leader_id: AtomicU64::new(0),
            raw_applied_max_ts: AtomicU64::new(0),
            txn_access_max_ts: AtomicU64::new(0),
            stats: RegionStats::default(),
            latches: Latches::default(),
            concurrency: ConcurrencyManager::new(),
        })
    }

    /// The immutable region id.
    pub fn id(&self) -> RegionId {
        self.region_id
    }

    /// The region's name.
    pub fn name(&self) -> String {
        self.inner.read().definition.name.clone()
    }

    fn snapshot(&self) -> Arc<RegionInner> {
        Arc::clone(&self.inner.read())
    }

    /// The owned range; `encoded` selects the internal key space.
    pub fn range(&self, encoded: bool) -> RegionRange {
        let snap = self.snapshot();
        if encoded {
            encode_range(&snap.definition.range)
        } else {
            snap.definition.range.clone()
        }
    }

    /// The current epoch.
    pub fn epoch(&self) -> RegionEpoch {
        self.snapshot().definition.epoch
    }

    /// Epoch and range as one consistent pair.
    pub fn epoch_and_range(&self) -> (RegionEpoch, RegionRange) {
        let snap = self.snapshot();
        (snap.definition.epoch, snap.definition.range.clone())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RegionState {
        self.snapshot().state
    }

    /// Every state the region has passed through, oldest first.
    pub fn state_history(&self) -> Vec<RegionState> {
        self.snapshot().state_history.clone()
    }

    /// Replica set.
    pub fn peers(&self) -> Vec<Peer> {
        self.snapshot().definition.peers.clone()
    }

    /// Whether split/merge is administratively suppressed.
    pub fn disable_change(&self) -> bool {
        let snap = self.snapshot();
        snap.disable_change || snap.temporary_disable_change
    }

    /// The region this one split from, zero if none.
    pub fn parent_id(&self) -> RegionId {
        self.snapshot().parent_id
    }

    /// Id of the last administrative change job applied.
    pub fn last_change_job_id(&self) -> u64 {
        self.snapshot().last_change_job_id
    }

    /// Half-open membership test against the user-space range.
    pub fn check_key_in_range(&self, key: &[u8]) -> bool {
        self.snapshot().definition.range.contains_key(key)
    }

    /// First key outside the range, if any.
    pub fn check_keys_in_range<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<()> {
        let snap = self.snapshot();
        for key in keys {
            if !snap.definition.range.contains_key(key.as_ref()) {
                return Err(Error::KeyNotInRegion {
                    key: key.as_ref().to_vec(),
                    region_id: self.region_id,
                });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutation: copy-on-write snapshot swap. `update` is in-memory only;
    // `update_durable` persists the new snapshot before publishing it, so
    // durable state never trails the published state.
    // ------------------------------------------------------------------

    pub(crate) fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut RegionInner) -> Result<()>,
    {
        let mut guard = self.inner.write();
        let mut next = (**guard).clone();
        f(&mut next)?;
        *guard = Arc::new(next);
        Ok(())
    }

    pub(crate) fn update_durable<F>(
        &self,
        meta_store: &dyn MetaStore,
        meta_key: &[u8],
        f: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut RegionInner) -> Result<()>,
    {
        let mut guard = self.inner.write();
        let mut next = (**guard).clone();
        f(&mut next)?;
        let bytes = bincode::serialize(&next)?;
        meta_store.save(meta_key, &bytes)?;
        *guard = Arc::new(next);
        Ok(())
    }

    /// Transition the lifecycle state, validating legality.
    pub fn set_state(&self, new_state: RegionState) -> Result<()> {
        self.update(|inner| apply_state(inner, new_state))
    }

    /// Set a new epoch version together with the matching range, as one
    /// atomic pair. The version must not regress.
    pub fn set_epoch_version_and_range(&self, version: u64, range: RegionRange) -> Result<()> {
        self.update(|inner| apply_epoch_version_and_range(inner, version, range))
    }

    /// Bump the membership half of the epoch. Must not regress.
    pub fn set_epoch_conf_version(&self, conf_version: u64) -> Result<()> {
        self.update(|inner| apply_epoch_conf_version(inner, conf_version))
    }

    /// Replace the peer set.
    pub fn set_peers(&self, peers: Vec<Peer>) {
        let _ = self.update(|inner| {
            inner.definition.peers = peers;
            Ok(())
        });
    }

    /// Suppress or allow split/merge.
    pub fn set_disable_change(&self, disable: bool) {
        let _ = self.update(|inner| {
            inner.disable_change = disable;
            Ok(())
        });
    }

    /// Temporarily suppress split/merge (e.g. mid-recovery).
    pub fn set_temporary_disable_change(&self, disable: bool) {
        let _ = self.update(|inner| {
            inner.temporary_disable_change = disable;
            Ok(())
        });
    }

    /// Record the split parent.
    pub fn set_parent_id(&self, parent_id: RegionId) {
        let _ = self.update(|inner| {
            inner.parent_id = parent_id;
            Ok(())
        });
    }

    /// Record the last administrative job applied.
    pub fn set_last_change_job_id(&self, job_id: u64) {
        let _ = self.update(|inner| {
            inner.last_change_job_id = job_id;
            Ok(())
        });
    }

    // ------------------------------------------------------------------
    // Leadership and timestamp high-water marks
    // ------------------------------------------------------------------

    /// Cached leader peer id, zero if unknown.
    pub fn leader_id(&self) -> PeerId {
        self.leader_id.load(Ordering::Acquire)
    }

    /// Refresh the cached leader.
    pub fn set_leader_id(&self, leader_id: PeerId) {
        self.leader_id.store(leader_id, Ordering::Release);
    }

    /// Highest timestamp applied through the raw path.
    pub fn raw_applied_max_ts(&self) -> Ts {
        self.raw_applied_max_ts.load(Ordering::Acquire)
    }

    /// Raise the raw-path high-water mark; never decreases.
    pub fn set_raw_applied_max_ts(&self, ts: Ts) {
        self.raw_applied_max_ts.fetch_max(ts, Ordering::AcqRel);
    }

    /// Highest timestamp observed on the transaction path.
    pub fn txn_access_max_ts(&self) -> Ts {
        self.txn_access_max_ts.load(Ordering::Acquire)
    }

    /// Raise the transaction-path high-water mark; never decreases.
    pub fn set_txn_access_max_ts(&self, ts: Ts) {
        self.txn_access_max_ts.fetch_max(ts, Ordering::AcqRel);
    }

    // ------------------------------------------------------------------
    // Serving statistics
    // ------------------------------------------------------------------

    /// Commands currently executing against this region.
    pub fn serving_request_count(&self) -> i64 {
        self.stats.serving_request_count.load(Ordering::Relaxed)
    }

    /// Bracket a command: increment on entry.
    pub fn inc_serving_request_count(&self) {
        self.stats
            .serving_request_count
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Bracket a command: decrement on exit.
    pub fn dec_serving_request_count(&self) {
        self.stats
            .serving_request_count
            .fetch_sub(1, Ordering::Relaxed);
    }

    /// Unix seconds of the last served request.
    pub fn last_serving_time(&self) -> i64 {
        self.stats.last_serving_time_s.load(Ordering::Relaxed)
    }

    /// Stamp the serving clock.
    pub fn update_last_serving_time(&self) {
        self.stats
            .last_serving_time_s
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Concurrency tables
    // ------------------------------------------------------------------

    /// The region's latch table.
    pub fn latches(&self) -> &Latches {
        &self.latches
    }

    /// The region's in-memory lock table.
    pub fn concurrency_manager(&self) -> &ConcurrencyManager {
        &self.concurrency
    }

    /// Install a memory lock entry. Caller must hold the key's latch.
    pub fn lock_key(&self, entry: Arc<LockEntry>) {
        self.concurrency.lock_key(entry);
    }

    /// Drop memory lock entries; idempotent.
    pub fn unlock_keys<K: AsRef<[u8]>>(&self, keys: &[K]) {
        self.concurrency.unlock_keys(keys);
    }

    /// Conflict-check a key set against outstanding memory locks.
    pub fn check_keys<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
        isolation_level: IsolationLevel,
        start_ts: Ts,
        resolved_locks: &[Ts],
        txn_result: &mut TxnResultInfo,
    ) -> bool {
        self.concurrency
            .check_keys(keys, isolation_level, start_ts, resolved_locks, txn_result)
    }

    /// Conflict-check a key range against outstanding memory locks.
    #[allow(clippy::too_many_arguments)]
    pub fn check_range(
        &self,
        start_key: &[u8],
        end_key: &[u8],
        isolation_level: IsolationLevel,
        start_ts: Ts,
        resolved_locks: &[Ts],
        txn_result: &mut TxnResultInfo,
    ) -> bool {
        self.concurrency.check_range(
            start_key,
            end_key,
            isolation_level,
            start_ts,
            resolved_locks,
            txn_result,
        )
    }

    // ------------------------------------------------------------------
    // Meta record (de)serialization
    // ------------------------------------------------------------------

    /// Serialize the durable core for the meta store.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&*self.snapshot())?)
    }

    /// Rebuild a region from its meta record. The latch table and the
    /// memory lock table start empty; lock state is recovered by replaying
    /// the backend's lock column family, not from the meta record.
    pub fn deserialize(bytes: &[u8]) -> Result<Arc<Self>> {
        let inner: RegionInner = bincode::deserialize(bytes)?;
        let region = Self::new(inner.definition.clone());
        {
            let mut guard = region.inner.write();
            *guard = Arc::new(inner);
        }
        Ok(region)
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snap = self.snapshot();
        f.debug_struct("Region")
            .field("region_id", &self.region_id)
            .field("state", &snap.state)
            .field("epoch", &snap.definition.epoch)
            .field("range", &snap.definition.range)
            .finish()
    }
}

pub(crate) fn apply_state(inner: &mut RegionInner, new_state: RegionState) -> Result<()> {
    if !inner.state.can_transition_to(new_state) {
        return Err(Error::InvalidArgument(format!(
            "illegal region state transition {} -> {}",
            inner.state, new_state
        )));
    }
    inner.state = new_state;
    inner.state_history.push(new_state);
    Ok(())
}

pub(crate) fn apply_epoch_version_and_range(
    inner: &mut RegionInner,
    version: u64,
    range: RegionRange,
) -> Result<()> {
    if !range.is_valid() {
        return Err(Error::InvalidArgument("backwards range".into()));
    }
    if version < inner.definition.epoch.version {
        return Err(Error::InvalidArgument(format!(
            "epoch version regression {} -> {}",
            inner.definition.epoch.version, version
        )));
    }
    inner.definition.epoch.version = version;
    inner.definition.range = range;
    Ok(())
}

pub(crate) fn apply_epoch_conf_version(inner: &mut RegionInner, conf_version: u64) -> Result<()> {
    if conf_version < inner.definition.epoch.conf_version {
        return Err(Error::InvalidArgument(format!(
            "epoch conf_version regression {} -> {}",
            inner.definition.epoch.conf_version, conf_version
        )));
    }
    inner.definition.epoch.conf_version = conf_version;
    Ok(())
}
