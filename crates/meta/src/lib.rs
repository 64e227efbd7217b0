//! Region metadata layer for RangeKV
//!
//! Owns per-region metadata and epoch state:
//! - `Region`: the descriptor — range, epoch, peers, state, flags, plus the
//!   region's latch table and in-memory lock table
//! - `RegionRegistry`: concurrent map region_id -> Region with durable
//!   persistence (write the meta record first, publish in memory second)
//! - `RaftMetaRegistry`: per-region replication progress records
//! - `RegionChangeRecorder`: change-history of split/merge/peer jobs
//! - `GcSafePointManager`: resolved GC safe points per keyspace
//! - `EngineMetaStore`: `MetaStore` over a `RawEngine`'s meta column family

#![warn(clippy::all)]

pub mod meta_store;
pub mod recorder;
pub mod region;
pub mod registry;
pub mod safe_point;

pub use meta_store::EngineMetaStore;
pub use recorder::{ChangeEvent, ChangeKind, ChangeRecord, RegionChangeRecorder};
pub use region::{Region, RegionDefinition};
pub use registry::{RaftMeta, RaftMetaRegistry, RegionRegistry};
pub use safe_point::{GcSafePointManager, DEFAULT_KEYSPACE};
