//! Core types and traits for RangeKV
//!
//! This crate defines the foundational vocabulary shared by every layer:
//! - RegionId / PeerId / Ts: identifiers and logical timestamps
//! - RegionEpoch: (version, conf_version) staleness detection pair
//! - RegionRange: half-open byte-string key interval
//! - RegionState: region lifecycle state machine
//! - Mutation / Op: one line of a multi-key transaction request
//! - Error: the error taxonomy surfaced to callers
//! - Traits: collaborator seams (RawEngine, RaftRouter, MetaStore, IndexChecker)
//! - Key codec: keyspace prefixing and range arithmetic

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod traits;
pub mod types;

pub use codec::{decode_key, encode_key, hex, prefix_next};
pub use error::{Error, ErrorCode, Result};
pub use traits::{
    IndexChecker, MetaStore, RaftRouter, RawEngine, CF_DATA, CF_LOCK, CF_META, CF_WRITE,
};
pub use types::{
    IsolationLevel, LockInfo, Mutation, Op, Peer, PeerId, PeerRole, RegionEpoch, RegionId,
    RegionRange, RegionState, StoreId, Ts, TxnResultInfo,
};
