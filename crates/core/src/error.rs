//! Error types for the region transaction engine
//!
//! One `Error` enum covers the whole taxonomy surfaced to callers. Every
//! variant maps to a stable `ErrorCode` so the service layer can attach a
//! structured (code + message) error to each response. `thiserror` supplies
//! `Display` and `Error` implementations.

use crate::types::{LockInfo, PeerId, RegionEpoch, RegionId, RegionState, Ts};
use std::io;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error code carried on every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed request; retrying without change will fail again.
    InvalidArgument,
    /// The addressed region does not exist on this node.
    RegionNotFound,
    /// The request's region epoch is stale; refresh routing and retry.
    EpochStale,
    /// This peer is not the leader; retry against the leader.
    NotLeader,
    /// Region is in a state that cannot serve the request (e.g. mid-split).
    RegionNotReady,
    /// A key falls outside the region's range.
    KeyNotInRegion,
    /// A newer committed version exists; the transaction must retry.
    WriteConflict,
    /// An in-flight transaction holds a lock; retry after backoff or resolve.
    LockConflict,
    /// The transaction's lock is gone and no commit record exists.
    TxnNotFound,
    /// A key asserted absent already holds a committed value.
    KeyExists,
    /// The transaction already committed; rollback is impossible.
    TxnAlreadyCommitted,
    /// Auxiliary index is still building.
    IndexNotReady,
    /// Auxiliary index build failed; operator attention required.
    IndexBuildError,
    /// Worker queue saturated; retry with backoff.
    RequestFull,
    /// The cluster is read-only; writes are refused.
    ClusterReadOnly,
    /// Serialization failure or unexpected backend error.
    Internal,
}

/// Error taxonomy of the engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request: empty keys, non-positive limits, zero ttl or
    /// start_ts, backwards range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The addressed region is unknown (never existed or tombstoned).
    #[error("region {region_id} not found")]
    RegionNotFound {
        /// The region the request addressed.
        region_id: RegionId,
    },

    /// The request carried a stale region epoch.
    #[error("region {region_id} epoch stale: request {request}, current {current}")]
    EpochStale {
        /// The region the request addressed.
        region_id: RegionId,
        /// Epoch carried by the request.
        request: RegionEpoch,
        /// Epoch the region is currently at.
        current: RegionEpoch,
    },

    /// This peer is not the region's leader.
    #[error("region {region_id} not leader")]
    NotLeader {
        /// The region the request addressed.
        region_id: RegionId,
        /// Cached leader hint, if known.
        leader_id: Option<PeerId>,
    },

    /// The region's state cannot serve this request.
    #[error("region {region_id} not ready, state {state}")]
    RegionNotReady {
        /// The region the request addressed.
        region_id: RegionId,
        /// The state it was observed in.
        state: RegionState,
    },

    /// A request key falls outside the region's range.
    #[error("key not in region {region_id}")]
    KeyNotInRegion {
        /// The offending key.
        key: Vec<u8>,
        /// The region the request addressed.
        region_id: RegionId,
    },

    /// A committed version newer than the transaction's snapshot exists.
    #[error("write conflict: start_ts {start_ts}, conflict commit_ts {conflict_commit_ts}")]
    WriteConflict {
        /// The requesting transaction's start timestamp.
        start_ts: Ts,
        /// start_ts of the conflicting committed transaction.
        conflict_start_ts: Ts,
        /// commit_ts of the conflicting committed transaction.
        conflict_commit_ts: Ts,
        /// The key the conflict was found on.
        key: Vec<u8>,
    },

    /// An outstanding lock from another transaction blocks the operation.
    /// Retryable after backoff or lock resolution.
    #[error("lock conflict on txn {}", .0.start_ts)]
    LockConflict(LockInfo),

    /// The transaction's lock is absent and no outcome is recorded.
    #[error("txn not found: start_ts {start_ts}")]
    TxnNotFound {
        /// The transaction's start timestamp.
        start_ts: Ts,
        /// The primary or operative key inspected.
        key: Vec<u8>,
    },

    /// A `PutIfAbsent`/`CheckNotExists` probe found a committed value.
    #[error("key already exists")]
    KeyExists {
        /// The offending key.
        key: Vec<u8>,
    },

    /// Rolling back a committed transaction is forbidden.
    #[error("txn {start_ts} already committed at {commit_ts}")]
    TxnAlreadyCommitted {
        /// The transaction's start timestamp.
        start_ts: Ts,
        /// The commit timestamp found in the write column.
        commit_ts: Ts,
        /// The key the committed record was found on.
        key: Vec<u8>,
    },

    /// Auxiliary index not yet ready to serve.
    #[error("index of region {region_id} not ready, please retry")]
    IndexNotReady {
        /// The region whose index is building.
        region_id: RegionId,
    },

    /// Auxiliary index build failed.
    #[error("index of region {region_id} build error, please wait for recover")]
    IndexBuildError {
        /// The region whose index is broken.
        region_id: RegionId,
    },

    /// Worker pool queue is full; explicit backpressure signal.
    #[error("request queue full: {0}")]
    RequestFull(String),

    /// The cluster refuses writes.
    #[error("cluster is read-only")]
    ClusterReadOnly,

    /// I/O error from the backend or meta persistence.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Unexpected internal failure; not retried automatically.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The stable code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::RegionNotFound { .. } => ErrorCode::RegionNotFound,
            Error::EpochStale { .. } => ErrorCode::EpochStale,
            Error::NotLeader { .. } => ErrorCode::NotLeader,
            Error::RegionNotReady { .. } => ErrorCode::RegionNotReady,
            Error::KeyNotInRegion { .. } => ErrorCode::KeyNotInRegion,
            Error::WriteConflict { .. } => ErrorCode::WriteConflict,
            Error::LockConflict(_) => ErrorCode::LockConflict,
            Error::TxnNotFound { .. } => ErrorCode::TxnNotFound,
            Error::KeyExists { .. } => ErrorCode::KeyExists,
            Error::TxnAlreadyCommitted { .. } => ErrorCode::TxnAlreadyCommitted,
            Error::IndexNotReady { .. } => ErrorCode::IndexNotReady,
            Error::IndexBuildError { .. } => ErrorCode::IndexBuildError,
            Error::RequestFull(_) => ErrorCode::RequestFull,
            Error::ClusterReadOnly => ErrorCode::ClusterReadOnly,
            Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the caller may retry the identical request after backoff
    /// (possibly against refreshed routing).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::EpochStale
                | ErrorCode::NotLeader
                | ErrorCode::RegionNotReady
                | ErrorCode::LockConflict
                | ErrorCode::IndexNotReady
                | ErrorCode::RequestFull
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_detail() {
        let err = Error::EpochStale {
            region_id: 7,
            request: RegionEpoch::new(1, 0),
            current: RegionEpoch::new(2, 0),
        };
        let msg = err.to_string();
        assert!(msg.contains('7'));
        assert!(msg.contains("1-0"));
        assert!(msg.contains("2-0"));
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            Error::RegionNotFound { region_id: 1 }.code(),
            ErrorCode::RegionNotFound
        );
        assert_eq!(
            Error::RequestFull("write".into()).code(),
            ErrorCode::RequestFull
        );
        assert_eq!(Error::ClusterReadOnly.code(), ErrorCode::ClusterReadOnly);
        assert_eq!(
            Error::Serialization("bad".into()).code(),
            ErrorCode::Internal
        );
        assert_eq!(
            Error::Io(io::Error::new(io::ErrorKind::Other, "disk")).code(),
            ErrorCode::Internal
        );
    }

    #[test]
    fn retryability_split() {
        assert!(Error::RequestFull("read".into()).is_retryable());
        assert!(Error::LockConflict(LockInfo::default()).is_retryable());
        assert!(Error::NotLeader {
            region_id: 1,
            leader_id: Some(2)
        }
        .is_retryable());

        assert!(!Error::InvalidArgument("start_ts is 0".into()).is_retryable());
        assert!(!Error::WriteConflict {
            start_ts: 10,
            conflict_start_ts: 11,
            conflict_commit_ts: 12,
            key: b"a".to_vec(),
        }
        .is_retryable());
        assert!(!Error::Internal("boom".into()).is_retryable());
    }

    #[test]
    fn bincode_errors_become_serialization() {
        let bad: std::result::Result<u64, bincode::Error> =
            bincode::deserialize(&[0xff, 0xff, 0xff]);
        let err: Error = bad.unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(err.to_string().contains("serialization"));
    }
}
