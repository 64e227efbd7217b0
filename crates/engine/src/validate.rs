//! Request precondition checks
//!
//! Every operation validates before touching any latch or lock state, so a
//! rejected request never has partial effect. Checks are free functions
//! over the region descriptor and the collaborator traits; each returns
//! the taxonomy error the caller retries (or not) on.

use rangekv_core::error::{Error, Result};
use rangekv_core::traits::{IndexChecker, RaftRouter};
use rangekv_core::types::{RegionEpoch, RegionState};
use rangekv_meta::Region;

/// The request's routing epoch must exactly match the region's.
pub fn validate_region_epoch(request_epoch: RegionEpoch, region: &Region) -> Result<()> {
    let current = region.epoch();
    if request_epoch != current {
        return Err(Error::EpochStale {
            region_id: region.id(),
            request: request_epoch,
            current,
        });
    }
    Ok(())
}

/// Writes require a `Normal` region; anything else (mid-split, standby,
/// tearing down) is not ready.
pub fn validate_region_serving(region: &Region) -> Result<()> {
    let state = region.state();
    if !state.is_serving() {
        return Err(Error::RegionNotReady {
            region_id: region.id(),
            state,
        });
    }
    Ok(())
}

/// Reads are additionally served by `Standby` replicas.
pub fn validate_region_readable(region: &Region) -> Result<()> {
    let state = region.state();
    if state.is_serving() || state == RegionState::Standby {
        return Ok(());
    }
    Err(Error::RegionNotReady {
        region_id: region.id(),
        state,
    })
}

/// This node must lead the region's replication group.
pub fn validate_leader(raft: &dyn RaftRouter, region: &Region) -> Result<()> {
    if raft.is_leader(region.id()) {
        return Ok(());
    }
    let leader_id = raft.leader_id(region.id());
    if let Some(leader_id) = leader_id {
        region.set_leader_id(leader_id);
    }
    Err(Error::NotLeader {
        region_id: region.id(),
        leader_id,
    })
}

/// Every key must fall inside the region's range.
pub fn validate_keys_in_region<K: AsRef<[u8]>>(region: &Region, keys: &[K]) -> Result<()> {
    region.check_keys_in_range(keys)
}

/// The auxiliary index must be able to absorb the mutation.
pub fn validate_index_ready(checker: &dyn IndexChecker, region: &Region) -> Result<()> {
    if checker.is_ready(region.id()) {
        return Ok(());
    }
    if checker.is_build_error(region.id()) {
        return Err(Error::IndexBuildError {
            region_id: region.id(),
        });
    }
    Err(Error::IndexNotReady {
        region_id: region.id(),
    })
}

/// A non-empty key argument.
pub fn validate_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidArgument("key is empty".into()));
    }
    Ok(())
}

/// A non-empty key list with no empty member.
pub fn validate_keys<K: AsRef<[u8]>>(keys: &[K]) -> Result<()> {
    if keys.is_empty() {
        return Err(Error::InvalidArgument("keys is empty".into()));
    }
    for key in keys {
        validate_key(key.as_ref())?;
    }
    Ok(())
}

/// A non-zero timestamp argument.
pub fn validate_ts(ts: u64, name: &str) -> Result<()> {
    if ts == 0 {
        return Err(Error::InvalidArgument(format!("{name} is 0")));
    }
    Ok(())
}
