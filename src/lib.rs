//! RangeKV: a region-partitioned transactional key-value engine
//!
//! The facade crate re-exports the public surface of the workspace layers:
//!
//! - [`rangekv_core`]: types, errors, collaborator traits, key codec
//! - [`rangekv_concurrency`]: per-region latches and the memory lock table
//! - [`rangekv_meta`]: region descriptors, registries, change history
//! - [`rangekv_storage`]: the in-memory reference backend
//! - [`rangekv_txn`]: the MVCC transaction protocol
//! - [`rangekv_executor`]: bounded worker pools
//! - [`rangekv_engine`]: the assembled command flow
//!
//! A node embeds [`StoreEngine`] over its backend, registers regions in the
//! [`RegionRegistry`], and dispatches inbound commands through the read and
//! write pools.

pub use rangekv_concurrency::{ConcurrencyManager, Latches, LockEntry};
pub use rangekv_core::{
    Error, ErrorCode, IsolationLevel, Mutation, Op, Peer, RegionEpoch, RegionId, RegionRange,
    RegionState, Result, Ts,
};
pub use rangekv_engine::{EngineConfig, RequestContext, StoreEngine};
pub use rangekv_executor::{PoolPair, WorkerPool};
pub use rangekv_meta::{
    EngineMetaStore, GcSafePointManager, RaftMetaRegistry, Region, RegionChangeRecorder,
    RegionDefinition, RegionRegistry,
};
pub use rangekv_storage::MemEngine;
pub use rangekv_txn::{PrewriteRequest, PrewriteResult, TxnStatus, TxnStore};
