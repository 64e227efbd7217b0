//! Full command-flow exercises: registry resolution, validation, latching,
//! memory-lock checks and the transaction protocol behind one facade.

use rangekv_core::error::{Error, ErrorCode};
use rangekv_core::types::{
    IsolationLevel, Mutation, Peer, RegionEpoch, RegionRange, RegionState, Ts,
};
use rangekv_engine::{EngineConfig, RequestContext, StoreEngine};
use rangekv_meta::{EngineMetaStore, Region, RegionDefinition, RegionRegistry};
use rangekv_storage::testing::{MockIndexChecker, MockRaftRouter};
use rangekv_storage::MemEngine;
use rangekv_txn::PrewriteRequest;
use std::sync::Arc;

struct Harness {
    engine: StoreEngine<MemEngine>,
    router: Arc<MockRaftRouter>,
    index: Arc<MockIndexChecker>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let backend = Arc::new(MemEngine::new());
        let meta_store = Arc::new(EngineMetaStore::new(Arc::clone(&backend)));
        let registry = Arc::new(RegionRegistry::new(meta_store));
        let router = Arc::new(MockRaftRouter::new());
        let index = Arc::new(MockIndexChecker::new());

        let region = Region::new(RegionDefinition {
            region_id: 1,
            name: "region-1".into(),
            range: RegionRange::new(b"a".to_vec(), b"z".to_vec()),
            epoch: RegionEpoch::new(1, 1),
            peers: vec![Peer::new(1, 101)],
        });
        region.set_state(RegionState::Normal).unwrap();
        registry.add_region(region).unwrap();

        let engine = StoreEngine::new(
            backend,
            registry,
            Arc::clone(&router) as Arc<dyn rangekv_core::traits::RaftRouter>,
            Arc::clone(&index) as Arc<dyn rangekv_core::traits::IndexChecker>,
            config,
        );
        Self {
            engine,
            router,
            index,
        }
    }

    fn ctx(&self) -> RequestContext {
        RequestContext::new(1, RegionEpoch::new(1, 1))
    }

    fn region(&self) -> Arc<Region> {
        self.engine.registry().get_region(1).unwrap()
    }

    fn put(&self, key: &[u8], value: &[u8], start_ts: Ts, commit_ts: Ts) {
        let ctx = self.ctx();
        let req = PrewriteRequest::optimistic(
            vec![Mutation::put(key.to_vec(), value.to_vec())],
            key.to_vec(),
            start_ts,
            3000,
        );
        let result = self.engine.txn_prewrite(&ctx, &req).unwrap();
        assert!(result.key_errors.is_empty(), "{:?}", result.key_errors);
        self.engine
            .txn_commit(&ctx, &[key.to_vec()], start_ts, commit_ts)
            .unwrap();
    }
}

#[test]
fn full_transaction_flow() {
    let h = Harness::new();
    h.put(b"k", b"v1", 10, 11);
    assert_eq!(
        h.engine.txn_get(&h.ctx(), b"k", 12).unwrap().unwrap(),
        b"v1"
    );
    assert_eq!(h.engine.txn_get(&h.ctx(), b"k", 10).unwrap(), None);
}

#[test]
fn epoch_stale_fails_without_mutating() {
    let h = Harness::new();
    let mut stale = h.ctx();
    stale.region_epoch = RegionEpoch::new(0, 1);

    let req = PrewriteRequest::optimistic(
        vec![Mutation::put(b"k".to_vec(), b"v".to_vec())],
        b"k".to_vec(),
        10,
        3000,
    );
    let err = h.engine.txn_prewrite(&stale, &req).unwrap_err();
    assert_eq!(err.code(), ErrorCode::EpochStale);
    assert!(err.is_retryable());

    // no lock, no provisional state
    assert!(h.region().concurrency_manager().is_empty());
    assert_eq!(h.engine.txn_get(&h.ctx(), b"k", 100).unwrap(), None);
}

#[test]
fn post_split_epoch_bump_invalidates_old_routing() {
    let h = Harness::new();
    h.engine
        .registry()
        .update_epoch_version_and_range(1, 2, RegionRange::new(b"a".to_vec(), b"m".to_vec()))
        .unwrap();

    // old epoch: stale
    let err = h.engine.txn_get(&h.ctx(), b"b", 10).unwrap_err();
    assert_eq!(err.code(), ErrorCode::EpochStale);

    // refreshed epoch works
    let ctx = RequestContext::new(1, RegionEpoch::new(2, 1));
    assert_eq!(h.engine.txn_get(&ctx, b"b", 10).unwrap(), None);
}

#[test]
fn not_leader_carries_hint_and_refreshes_cache() {
    let h = Harness::new();
    h.router.demote(1, Some(202));

    let req = PrewriteRequest::optimistic(
        vec![Mutation::put(b"k".to_vec(), b"v".to_vec())],
        b"k".to_vec(),
        10,
        3000,
    );
    let err = h.engine.txn_prewrite(&h.ctx(), &req).unwrap_err();
    match err {
        Error::NotLeader {
            region_id,
            leader_id,
        } => {
            assert_eq!(region_id, 1);
            assert_eq!(leader_id, Some(202));
        }
        other => panic!("expected NotLeader, got {other:?}"),
    }
    assert_eq!(h.region().leader_id(), 202);

    h.router.promote(1);
    assert!(h.engine.txn_prewrite(&h.ctx(), &req).is_ok());
}

#[test]
fn unknown_region_fails_fast() {
    let h = Harness::new();
    let ctx = RequestContext::new(42, RegionEpoch::new(1, 1));
    let err = h.engine.txn_get(&ctx, b"k", 10).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RegionNotFound);
}

#[test]
fn deleted_region_tombstone_fails_fast() {
    let h = Harness::new();
    h.engine.registry().delete_region(1).unwrap();
    let err = h.engine.txn_get(&h.ctx(), b"k", 10).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RegionNotFound);
}

#[test]
fn mid_split_region_is_not_ready() {
    let h = Harness::new();
    h.engine
        .registry()
        .update_state(1, RegionState::Splitting)
        .unwrap();

    let req = PrewriteRequest::optimistic(
        vec![Mutation::put(b"k".to_vec(), b"v".to_vec())],
        b"k".to_vec(),
        10,
        3000,
    );
    let err = h.engine.txn_prewrite(&h.ctx(), &req).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RegionNotReady);
    assert!(err.is_retryable());
}

#[test]
fn standby_serves_reads_but_rejects_writes() {
    let h = Harness::new();
    h.put(b"k", b"v1", 10, 11);
    h.engine
        .registry()
        .update_state(1, RegionState::Standby)
        .unwrap();

    assert_eq!(
        h.engine.txn_get(&h.ctx(), b"k", 12).unwrap().unwrap(),
        b"v1"
    );
    let req = PrewriteRequest::optimistic(
        vec![Mutation::put(b"k".to_vec(), b"v2".to_vec())],
        b"k".to_vec(),
        20,
        3000,
    );
    assert_eq!(
        h.engine.txn_prewrite(&h.ctx(), &req).unwrap_err().code(),
        ErrorCode::RegionNotReady
    );
}

#[test]
fn cluster_read_only_refuses_writes() {
    let h = Harness::new();
    h.engine.set_cluster_read_only(true);

    let req = PrewriteRequest::optimistic(
        vec![Mutation::put(b"k".to_vec(), b"v".to_vec())],
        b"k".to_vec(),
        10,
        3000,
    );
    assert_eq!(
        h.engine.txn_prewrite(&h.ctx(), &req).unwrap_err().code(),
        ErrorCode::ClusterReadOnly
    );

    h.engine.set_cluster_read_only(false);
    assert!(h.engine.txn_prewrite(&h.ctx(), &req).is_ok());
}

#[test]
fn index_readiness_gates_writes() {
    let h = Harness::new();
    let req = PrewriteRequest::optimistic(
        vec![Mutation::put(b"k".to_vec(), b"v".to_vec())],
        b"k".to_vec(),
        10,
        3000,
    );

    h.index.set_ready(false);
    assert_eq!(
        h.engine.txn_prewrite(&h.ctx(), &req).unwrap_err().code(),
        ErrorCode::IndexNotReady
    );

    h.index.set_build_error(true);
    assert_eq!(
        h.engine.txn_prewrite(&h.ctx(), &req).unwrap_err().code(),
        ErrorCode::IndexBuildError
    );
}

#[test]
fn keys_outside_range_are_rejected() {
    let h = Harness::new();
    // region owns [a, z); "zz" is outside
    let req = PrewriteRequest::optimistic(
        vec![Mutation::put(b"zz".to_vec(), b"v".to_vec())],
        b"zz".to_vec(),
        10,
        3000,
    );
    assert_eq!(
        h.engine.txn_prewrite(&h.ctx(), &req).unwrap_err().code(),
        ErrorCode::KeyNotInRegion
    );
}

#[test]
fn malformed_requests_are_rejected_before_any_state_change() {
    let h = Harness::new();
    let ctx = h.ctx();

    // empty mutations
    let req = PrewriteRequest::optimistic(Vec::new(), b"k".to_vec(), 10, 3000);
    assert_eq!(
        h.engine.txn_prewrite(&ctx, &req).unwrap_err().code(),
        ErrorCode::InvalidArgument
    );

    // zero ttl
    let req = PrewriteRequest::optimistic(
        vec![Mutation::put(b"k".to_vec(), b"v".to_vec())],
        b"k".to_vec(),
        10,
        0,
    );
    assert_eq!(
        h.engine.txn_prewrite(&ctx, &req).unwrap_err().code(),
        ErrorCode::InvalidArgument
    );

    // zero start_ts
    let req = PrewriteRequest::optimistic(
        vec![Mutation::put(b"k".to_vec(), b"v".to_vec())],
        b"k".to_vec(),
        0,
        3000,
    );
    assert_eq!(
        h.engine.txn_prewrite(&ctx, &req).unwrap_err().code(),
        ErrorCode::InvalidArgument
    );

    // commit_ts not after start_ts
    assert_eq!(
        h.engine
            .txn_commit(&ctx, &[b"k".to_vec()], 10, 10)
            .unwrap_err()
            .code(),
        ErrorCode::InvalidArgument
    );

    // zero advise_ttl on heartbeat
    assert_eq!(
        h.engine
            .txn_heartbeat(&ctx, b"k", 10, 0)
            .unwrap_err()
            .code(),
        ErrorCode::InvalidArgument
    );

    assert!(h.region().concurrency_manager().is_empty());
}

#[test]
fn oversized_batch_is_rejected() {
    let h = Harness::with_config(EngineConfig {
        max_batch_count: 2,
        ..EngineConfig::default()
    });
    let mutations: Vec<Mutation> = (0..3)
        .map(|i| Mutation::put(format!("k{i}").into_bytes(), b"v".to_vec()))
        .collect();
    let req = PrewriteRequest::optimistic(mutations, b"k0".to_vec(), 10, 3000);
    assert_eq!(
        h.engine.txn_prewrite(&h.ctx(), &req).unwrap_err().code(),
        ErrorCode::InvalidArgument
    );
}

#[test]
fn reader_hits_memory_lock_before_backend() {
    let h = Harness::new();
    let req = PrewriteRequest::optimistic(
        vec![Mutation::put(b"k".to_vec(), b"v".to_vec())],
        b"k".to_vec(),
        10,
        3000,
    );
    assert!(h
        .engine
        .txn_prewrite(&h.ctx(), &req)
        .unwrap()
        .key_errors
        .is_empty());

    let err = h.engine.txn_get(&h.ctx(), b"k", 15).unwrap_err();
    match err {
        Error::LockConflict(info) => assert_eq!(info.start_ts, 10),
        other => panic!("expected LockConflict, got {other:?}"),
    }

    // a resolved-locks hint lets the read through
    let mut ctx = h.ctx();
    ctx.resolved_locks = vec![10];
    assert_eq!(h.engine.txn_get(&ctx, b"k", 15).unwrap(), None);

    // read-committed skips the check entirely
    let mut ctx = h.ctx();
    ctx.isolation_level = IsolationLevel::ReadCommitted;
    assert_eq!(h.engine.txn_get(&ctx, b"k", 15).unwrap(), None);
}

#[test]
fn scan_clamps_limits_and_respects_region_range() {
    let h = Harness::new();
    for (i, ts) in [(0u8, 10u64), (1, 12), (2, 14), (3, 16)] {
        h.put(&[b'b' + i], b"v", ts, ts + 1);
    }

    let range = RegionRange::new(b"a".to_vec(), b"y".to_vec());
    // the smaller of the two limits wins
    let kvs = h.engine.txn_scan(&h.ctx(), &range, 100, 3, 2).unwrap();
    assert_eq!(kvs.len(), 2);
    // zero means unset
    let kvs = h.engine.txn_scan(&h.ctx(), &range, 100, 0, 3).unwrap();
    assert_eq!(kvs.len(), 3);
    let kvs = h.engine.txn_scan(&h.ctx(), &range, 100, 0, 0).unwrap();
    assert_eq!(kvs.len(), 4);

    // a scan reaching outside the region is refused
    let outside = RegionRange::new(b"a".to_vec(), Vec::new());
    assert_eq!(
        h.engine
            .txn_scan(&h.ctx(), &outside, 100, 0, 0)
            .unwrap_err()
            .code(),
        ErrorCode::KeyNotInRegion
    );
}

#[test]
fn pessimistic_flow_through_engine() {
    let h = Harness::new();
    let ctx = h.ctx();

    let results = h
        .engine
        .txn_pessimistic_lock(
            &ctx,
            &[Mutation::lock(b"k".to_vec())],
            b"k",
            10,
            3000,
            10,
            false,
        )
        .unwrap();
    assert!(results[0].is_ok());

    h.engine
        .txn_pessimistic_rollback(&ctx, &[b"k".to_vec()], 10, 10)
        .unwrap();
    assert!(h.region().concurrency_manager().is_empty());
}

#[test]
fn check_status_and_heartbeat_through_engine() {
    let h = Harness::new();
    let ctx = h.ctx();
    let req = PrewriteRequest::optimistic(
        vec![Mutation::put(b"k".to_vec(), b"v".to_vec())],
        b"k".to_vec(),
        10,
        3000,
    );
    assert!(h
        .engine
        .txn_prewrite(&ctx, &req)
        .unwrap()
        .key_errors
        .is_empty());

    assert_eq!(h.engine.txn_heartbeat(&ctx, b"k", 10, 8000).unwrap(), 8000);
    assert_eq!(h.engine.txn_heartbeat(&ctx, b"k", 10, 500).unwrap(), 8000);

    let status = h.engine.txn_check_status(&ctx, b"k", 10, 50, 100).unwrap();
    assert!(matches!(
        status,
        rangekv_txn::TxnStatus::Locked { ttl: 8000, .. }
    ));
}

#[test]
fn resolve_lock_region_wide_through_engine() {
    let h = Harness::new();
    let ctx = h.ctx();
    let req = PrewriteRequest::optimistic(
        vec![
            Mutation::put(b"k1".to_vec(), b"v1".to_vec()),
            Mutation::put(b"k2".to_vec(), b"v2".to_vec()),
        ],
        b"k1".to_vec(),
        10,
        3000,
    );
    assert!(h
        .engine
        .txn_prewrite(&ctx, &req)
        .unwrap()
        .key_errors
        .is_empty());

    let resolved = h.engine.txn_resolve_lock(&ctx, 10, 11, &[]).unwrap();
    assert_eq!(resolved, 2);
    assert_eq!(
        h.engine.txn_get(&ctx, b"k1", 12).unwrap().unwrap(),
        b"v1"
    );
}

#[test]
fn gc_safe_point_is_monotonic_through_engine() {
    let h = Harness::new();
    let ctx = h.ctx();
    h.put(b"k", b"v1", 10, 11);
    h.put(b"k", b"v2", 20, 21);

    let stats = h.engine.txn_gc(&ctx, 50).unwrap();
    assert_eq!(stats.versions_removed, 1);
    assert_eq!(h.engine.gc_safe_points().safe_point(0), 50);

    // a stale safe point does not regress the resolved one
    let stats = h.engine.txn_gc(&ctx, 30).unwrap();
    assert_eq!(stats.versions_removed, 0);
    assert_eq!(h.engine.gc_safe_points().safe_point(0), 50);
}

#[test]
fn admission_control_returns_request_full() {
    let h = Harness::with_config(EngineConfig {
        workers: 1,
        queue_capacity: 1,
        ..EngineConfig::default()
    });
    let (hold_tx, hold_rx) = std::sync::mpsc::channel::<()>();

    // occupy the single worker, then fill the queue
    h.engine
        .submit_write(move || {
            let _ = hold_rx.recv();
        })
        .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(50));
    h.engine.submit_write(|| {}).unwrap();

    let err = h.engine.submit_write(|| {}).unwrap_err();
    assert_eq!(err.code(), ErrorCode::RequestFull);
    assert!(err.is_retryable());

    // reads are admitted independently
    h.engine.submit_read(|| {}).unwrap();
    hold_tx.send(()).unwrap();
}

#[test]
fn serving_statistics_bracket_commands() {
    let h = Harness::new();
    h.put(b"k", b"v1", 10, 11);
    let region = h.region();
    assert_eq!(region.serving_request_count(), 0);
    assert!(region.last_serving_time() > 0);
    assert_eq!(region.txn_access_max_ts(), 10);

    h.engine.txn_get(&h.ctx(), b"k", 42).unwrap();
    assert_eq!(region.txn_access_max_ts(), 42);
}
