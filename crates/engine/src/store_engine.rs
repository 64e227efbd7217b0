//! The store engine: command flow over one raw backend
//!
//! Write command lifecycle:
//!
//! 1. resolve the region from the registry (stale ids fail fast)
//! 2. stamp the region's transaction-timestamp high-water mark
//! 3. validate: epoch, state, leadership, cluster read-only flag, index
//!    readiness, keys-in-range, argument shape
//! 4. acquire the region's latches for every touched key (scoped guard)
//! 5. execute the protocol operation against the backend
//! 6. guard releases the latches; serving statistics are stamped
//!
//! Reads skip the latches and instead consult the region's memory lock
//! table before touching the backend.

use crate::validate;
use rangekv_core::error::{Error, Result};
use rangekv_core::traits::{IndexChecker, RaftRouter, RawEngine};
use rangekv_core::types::{
    IsolationLevel, Mutation, Op, RegionEpoch, RegionId, RegionRange, Ts, TxnResultInfo,
};
use rangekv_executor::PoolPair;
use rangekv_meta::{GcSafePointManager, Region, RegionRegistry, DEFAULT_KEYSPACE};
use rangekv_txn::{GcStats, PrewriteRequest, PrewriteResult, TxnStatus, TxnStore};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Engine sizing knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker threads per pool.
    pub workers: usize,
    /// Pending commands admitted per pool before `RequestFull`.
    pub queue_capacity: usize,
    /// Largest mutation / key batch accepted in one request.
    pub max_batch_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            max_batch_count: 1024,
        }
    }
}

/// Routing and isolation context carried by every request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The addressed region.
    pub region_id: RegionId,
    /// The caller's routing epoch; must match exactly.
    pub region_epoch: RegionEpoch,
    /// Read isolation level.
    pub isolation_level: IsolationLevel,
    /// Transactions the caller already resolved; their locks are ignored.
    pub resolved_locks: Vec<Ts>,
}

impl RequestContext {
    /// Context with snapshot isolation and no resolved locks.
    pub fn new(region_id: RegionId, region_epoch: RegionEpoch) -> Self {
        Self {
            region_id,
            region_epoch,
            isolation_level: IsolationLevel::SnapshotIsolation,
            resolved_locks: Vec::new(),
        }
    }
}

// Serving-statistics bracket around one command.
struct ServingGuard<'a> {
    region: &'a Region,
}

impl<'a> ServingGuard<'a> {
    fn new(region: &'a Region) -> Self {
        region.inc_serving_request_count();
        Self { region }
    }
}

impl Drop for ServingGuard<'_> {
    fn drop(&mut self) {
        self.region.dec_serving_request_count();
        self.region.update_last_serving_time();
    }
}

/// The region transaction engine.
pub struct StoreEngine<E: RawEngine> {
    registry: Arc<RegionRegistry>,
    raft: Arc<dyn RaftRouter>,
    index: Arc<dyn IndexChecker>,
    txn: TxnStore<E>,
    pools: PoolPair,
    gc_safe_points: GcSafePointManager,
    cluster_read_only: AtomicBool,
    next_cid: AtomicU64,
    config: EngineConfig,
}

impl<E: RawEngine> StoreEngine<E> {
    /// Wire the engine together. All collaborators are injected; tests
    /// build a fresh instance per case.
    pub fn new(
        engine: Arc<E>,
        registry: Arc<RegionRegistry>,
        raft: Arc<dyn RaftRouter>,
        index: Arc<dyn IndexChecker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            raft,
            index,
            txn: TxnStore::new(engine),
            pools: PoolPair::new(config.workers, config.queue_capacity),
            gc_safe_points: GcSafePointManager::new(),
            cluster_read_only: AtomicBool::new(false),
            next_cid: AtomicU64::new(1),
            config,
        }
    }

    /// The region registry.
    pub fn registry(&self) -> &Arc<RegionRegistry> {
        &self.registry
    }

    /// The GC safe-point bookkeeping.
    pub fn gc_safe_points(&self) -> &GcSafePointManager {
        &self.gc_safe_points
    }

    /// Flip the cluster-wide write refusal flag.
    pub fn set_cluster_read_only(&self, read_only: bool) {
        self.cluster_read_only.store(read_only, Ordering::Release);
    }

    /// Whether writes are refused cluster-wide.
    pub fn is_cluster_read_only(&self) -> bool {
        self.cluster_read_only.load(Ordering::Acquire)
    }

    fn validate_cluster_writable(&self) -> Result<()> {
        if self.is_cluster_read_only() {
            return Err(Error::ClusterReadOnly);
        }
        Ok(())
    }

    fn resolve_region(&self, ctx: &RequestContext) -> Result<Arc<Region>> {
        self.registry
            .get_region(ctx.region_id)
            .ok_or(Error::RegionNotFound {
                region_id: ctx.region_id,
            })
    }

    fn validate_batch_size(&self, len: usize) -> Result<()> {
        if len > self.config.max_batch_count {
            return Err(Error::InvalidArgument(format!(
                "batch size {len} exceeds max {}",
                self.config.max_batch_count
            )));
        }
        Ok(())
    }

    // Shared write-path preamble: everything before latching.
    fn admit_write<K: AsRef<[u8]>>(
        &self,
        ctx: &RequestContext,
        start_ts: Ts,
        keys: &[K],
    ) -> Result<Arc<Region>> {
        let region = self.resolve_region(ctx)?;
        region.set_txn_access_max_ts(start_ts);
        validate::validate_region_epoch(ctx.region_epoch, &region)?;
        validate::validate_region_serving(&region)?;
        validate::validate_leader(&*self.raft, &region)?;
        self.validate_cluster_writable()?;
        validate::validate_index_ready(&*self.index, &region)?;
        validate::validate_keys(keys)?;
        self.validate_batch_size(keys.len())?;
        validate::validate_keys_in_region(&region, keys)?;
        Ok(region)
    }

    // Maintenance preamble: lock resolution and TTL upkeep must keep
    // working while the cluster is read-only or an index rebuilds.
    fn admit_maintenance<K: AsRef<[u8]>>(
        &self,
        ctx: &RequestContext,
        start_ts: Ts,
        keys: &[K],
    ) -> Result<Arc<Region>> {
        let region = self.resolve_region(ctx)?;
        region.set_txn_access_max_ts(start_ts);
        validate::validate_region_epoch(ctx.region_epoch, &region)?;
        validate::validate_region_serving(&region)?;
        validate::validate_leader(&*self.raft, &region)?;
        if !keys.is_empty() {
            validate::validate_keys(keys)?;
            validate::validate_keys_in_region(&region, keys)?;
        }
        Ok(region)
    }

    // Shared read-path preamble.
    fn admit_read<K: AsRef<[u8]>>(
        &self,
        ctx: &RequestContext,
        start_ts: Ts,
        keys: &[K],
    ) -> Result<Arc<Region>> {
        let region = self.resolve_region(ctx)?;
        region.set_txn_access_max_ts(start_ts);
        validate::validate_region_epoch(ctx.region_epoch, &region)?;
        validate::validate_region_readable(&region)?;
        if !keys.is_empty() {
            validate::validate_keys_in_region(&region, keys)?;
        }
        Ok(region)
    }

    fn next_cid(&self) -> u64 {
        self.next_cid.fetch_add(1, Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Snapshot read of one key.
    pub fn txn_get(
        &self,
        ctx: &RequestContext,
        key: &[u8],
        start_ts: Ts,
    ) -> Result<Option<Vec<u8>>> {
        validate::validate_ts(start_ts, "start_ts")?;
        validate::validate_key(key)?;
        let region = self.admit_read(ctx, start_ts, &[key])?;
        let _serving = ServingGuard::new(&region);

        let mut txn_result = TxnResultInfo::default();
        if region.check_keys(
            &[key],
            ctx.isolation_level,
            start_ts,
            &ctx.resolved_locks,
            &mut txn_result,
        ) {
            return Err(lock_conflict(txn_result));
        }
        self.txn
            .get(key, start_ts, ctx.isolation_level, &ctx.resolved_locks)
    }

    /// Snapshot read of many keys; absent keys are omitted.
    pub fn txn_batch_get(
        &self,
        ctx: &RequestContext,
        keys: &[Vec<u8>],
        start_ts: Ts,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        validate::validate_ts(start_ts, "start_ts")?;
        validate::validate_keys(keys)?;
        self.validate_batch_size(keys.len())?;
        let region = self.admit_read(ctx, start_ts, keys)?;
        let _serving = ServingGuard::new(&region);

        let mut txn_result = TxnResultInfo::default();
        if region.check_keys(
            keys,
            ctx.isolation_level,
            start_ts,
            &ctx.resolved_locks,
            &mut txn_result,
        ) {
            return Err(lock_conflict(txn_result));
        }
        self.txn
            .batch_get(keys, start_ts, ctx.isolation_level, &ctx.resolved_locks)
    }

    /// Ordered snapshot scan inside the region's range. Two limits may
    /// arrive (the request's own and the stream frame's); the effective
    /// limit is the smaller non-zero one, zero meaning unset.
    #[allow(clippy::too_many_arguments)]
    pub fn txn_scan(
        &self,
        ctx: &RequestContext,
        range: &RegionRange,
        start_ts: Ts,
        limit: usize,
        stream_limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        validate::validate_ts(start_ts, "start_ts")?;
        if !range.is_valid() {
            return Err(Error::InvalidArgument("backwards scan range".into()));
        }
        let region = self.admit_read::<Vec<u8>>(ctx, start_ts, &[])?;
        let _serving = ServingGuard::new(&region);

        // clamp to the region's own range
        let region_range = region.range(false);
        if !region_range.contains_range(range) {
            return Err(Error::KeyNotInRegion {
                key: range.start_key.clone(),
                region_id: region.id(),
            });
        }

        let mut txn_result = TxnResultInfo::default();
        if region.check_range(
            &range.start_key,
            &range.end_key,
            ctx.isolation_level,
            start_ts,
            &ctx.resolved_locks,
            &mut txn_result,
        ) {
            return Err(lock_conflict(txn_result));
        }

        let effective_limit = match (limit, stream_limit) {
            (0, s) => s,
            (l, 0) => l,
            (l, s) => l.min(s),
        };
        self.txn.scan(
            range,
            start_ts,
            effective_limit,
            ctx.isolation_level,
            &ctx.resolved_locks,
        )
    }

    // ------------------------------------------------------------------
    // Transaction protocol
    // ------------------------------------------------------------------

    /// Install pessimistic locks; per-mutation outcomes.
    #[allow(clippy::too_many_arguments)]
    pub fn txn_pessimistic_lock(
        &self,
        ctx: &RequestContext,
        mutations: &[Mutation],
        primary_lock: &[u8],
        start_ts: Ts,
        lock_ttl: u64,
        for_update_ts: Ts,
        return_values: bool,
    ) -> Result<Vec<Result<Option<Vec<u8>>>>> {
        validate_mutations(mutations)?;
        validate::validate_key(primary_lock)?;
        validate::validate_ts(start_ts, "start_ts")?;
        validate::validate_ts(lock_ttl, "lock_ttl")?;
        validate::validate_ts(for_update_ts, "for_update_ts")?;
        for mutation in mutations {
            if mutation.op != Op::Lock {
                return Err(Error::InvalidArgument("op is not Lock".into()));
            }
        }
        let keys = mutation_keys(mutations);
        let region = self.admit_write(ctx, start_ts, &keys)?;
        let _serving = ServingGuard::new(&region);
        let _latches = region.latches().lock_guard(&keys, self.next_cid());

        self.txn.pessimistic_lock(
            region.concurrency_manager(),
            mutations,
            primary_lock,
            start_ts,
            lock_ttl,
            for_update_ts,
            return_values,
        )
    }

    /// Release pessimistic locks that never prewrote.
    pub fn txn_pessimistic_rollback(
        &self,
        ctx: &RequestContext,
        keys: &[Vec<u8>],
        start_ts: Ts,
        for_update_ts: Ts,
    ) -> Result<()> {
        validate::validate_ts(start_ts, "start_ts")?;
        validate::validate_ts(for_update_ts, "for_update_ts")?;
        let region = self.admit_write(ctx, start_ts, keys)?;
        let _serving = ServingGuard::new(&region);
        let _latches = region.latches().lock_guard(keys, self.next_cid());

        self.txn
            .pessimistic_rollback(region.concurrency_manager(), keys, start_ts, for_update_ts)
    }

    /// Prewrite a batch of mutations.
    pub fn txn_prewrite(
        &self,
        ctx: &RequestContext,
        req: &PrewriteRequest,
    ) -> Result<PrewriteResult> {
        validate_mutations(&req.mutations)?;
        validate::validate_key(&req.primary_lock)?;
        validate::validate_ts(req.start_ts, "start_ts")?;
        validate::validate_ts(req.lock_ttl, "lock_ttl")?;
        validate::validate_ts(req.txn_size, "txn_size")?;
        let keys = mutation_keys(&req.mutations);
        let region = self.admit_write(ctx, req.start_ts, &keys)?;
        let _serving = ServingGuard::new(&region);
        let _latches = region.latches().lock_guard(&keys, self.next_cid());

        self.txn.prewrite(region.concurrency_manager(), req)
    }

    /// Commit prewritten keys at `commit_ts`.
    pub fn txn_commit(
        &self,
        ctx: &RequestContext,
        keys: &[Vec<u8>],
        start_ts: Ts,
        commit_ts: Ts,
    ) -> Result<()> {
        validate::validate_ts(start_ts, "start_ts")?;
        validate::validate_ts(commit_ts, "commit_ts")?;
        if commit_ts <= start_ts {
            return Err(Error::InvalidArgument(
                "commit_ts must exceed start_ts".into(),
            ));
        }
        let region = self.admit_write(ctx, start_ts, keys)?;
        let _serving = ServingGuard::new(&region);
        let _latches = region.latches().lock_guard(keys, self.next_cid());

        self.txn
            .commit(region.concurrency_manager(), keys, start_ts, commit_ts)
    }

    /// Roll back a transaction on the given keys.
    pub fn txn_batch_rollback(
        &self,
        ctx: &RequestContext,
        keys: &[Vec<u8>],
        start_ts: Ts,
    ) -> Result<()> {
        validate::validate_ts(start_ts, "start_ts")?;
        let region = self.admit_write(ctx, start_ts, keys)?;
        let _serving = ServingGuard::new(&region);
        let _latches = region.latches().lock_guard(keys, self.next_cid());

        self.txn
            .batch_rollback(region.concurrency_manager(), keys, start_ts)
    }

    /// Bulk-settle a transaction's locks once its outcome is known.
    pub fn txn_resolve_lock(
        &self,
        ctx: &RequestContext,
        start_ts: Ts,
        commit_ts: Ts,
        keys: &[Vec<u8>],
    ) -> Result<usize> {
        validate::validate_ts(start_ts, "start_ts")?;
        if commit_ts > 0 && commit_ts <= start_ts {
            return Err(Error::InvalidArgument(
                "resolve commit_ts must exceed start_ts or be 0".into(),
            ));
        }
        let region = self.admit_maintenance(ctx, start_ts, keys)?;
        let _serving = ServingGuard::new(&region);
        // scoped resolves latch their keys; a region-wide resolve walks the
        // lock column family instead
        let _latches = (!keys.is_empty())
            .then(|| region.latches().lock_guard(keys, self.next_cid()));

        self.txn.resolve_lock(
            region.concurrency_manager(),
            start_ts,
            commit_ts,
            keys,
            &region.range(false),
        )
    }

    /// Inspect (and possibly settle) a primary lock.
    pub fn txn_check_status(
        &self,
        ctx: &RequestContext,
        primary_key: &[u8],
        lock_ts: Ts,
        caller_start_ts: Ts,
        current_ts: Ts,
    ) -> Result<TxnStatus> {
        validate::validate_key(primary_key)?;
        validate::validate_ts(lock_ts, "lock_ts")?;
        validate::validate_ts(current_ts, "current_ts")?;
        let region = self.admit_maintenance(ctx, lock_ts, &[primary_key])?;
        let _serving = ServingGuard::new(&region);
        let _latches = region
            .latches()
            .lock_guard(&[primary_key], self.next_cid());

        self.txn.check_txn_status(
            region.concurrency_manager(),
            primary_key,
            lock_ts,
            caller_start_ts,
            current_ts,
            true,
        )
    }

    /// Extend a primary lock's TTL; never shrinks it.
    pub fn txn_heartbeat(
        &self,
        ctx: &RequestContext,
        primary_key: &[u8],
        start_ts: Ts,
        advise_ttl: u64,
    ) -> Result<u64> {
        validate::validate_key(primary_key)?;
        validate::validate_ts(start_ts, "start_ts")?;
        validate::validate_ts(advise_ttl, "advise_ttl")?;
        let region = self.admit_maintenance(ctx, start_ts, &[primary_key])?;
        let _serving = ServingGuard::new(&region);
        let _latches = region
            .latches()
            .lock_guard(&[primary_key], self.next_cid());

        self.txn.heartbeat(
            region.concurrency_manager(),
            primary_key,
            start_ts,
            advise_ttl,
        )
    }

    /// Reclaim MVCC garbage below the safe point for this region. The safe
    /// point only moves forward; a stale request degrades to the current
    /// one.
    pub fn txn_gc(&self, ctx: &RequestContext, safe_point: Ts) -> Result<GcStats> {
        validate::validate_ts(safe_point, "safe_point")?;
        let region = self.resolve_region(ctx)?;
        validate::validate_region_epoch(ctx.region_epoch, &region)?;
        validate::validate_region_serving(&region)?;
        validate::validate_leader(&*self.raft, &region)?;
        let _serving = ServingGuard::new(&region);

        let effective = self
            .gc_safe_points
            .update_safe_point(DEFAULT_KEYSPACE, safe_point);
        debug!(region_id = region.id(), safe_point = effective, "gc requested");
        self.txn.gc(&region.range(false), effective)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Queue a read command; `RequestFull` when the read pool is saturated.
    pub fn submit_read<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pools
            .read
            .try_execute(task)
            .map_err(|e| Error::RequestFull(e.pool))
    }

    /// Queue a write command; `RequestFull` when the write pool is
    /// saturated.
    pub fn submit_write<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pools
            .write
            .try_execute(task)
            .map_err(|e| Error::RequestFull(e.pool))
    }
}

fn mutation_keys(mutations: &[Mutation]) -> Vec<Vec<u8>> {
    mutations.iter().map(|m| m.key.clone()).collect()
}

fn validate_mutations(mutations: &[Mutation]) -> Result<()> {
    if mutations.is_empty() {
        return Err(Error::InvalidArgument("mutations is empty".into()));
    }
    for mutation in mutations {
        if mutation.key.is_empty() {
            return Err(Error::InvalidArgument("key is empty".into()));
        }
    }
    Ok(())
}

fn lock_conflict(txn_result: TxnResultInfo) -> Error {
    match txn_result.locked {
        Some(info) => Error::LockConflict(info),
        None => Error::Internal("lock check reported conflict without detail".into()),
    }
}
