//! Region and raft meta registries
//!
//! Concurrent maps of region_id to descriptor / replication progress, with
//! durable persistence through the `MetaStore` collaborator. Every mutator
//! writes the durable record first and publishes the in-memory change
//! second; a crash between the two leaves memory behind durable state,
//! never ahead of it.

use crate::region::{
    apply_epoch_conf_version, apply_epoch_version_and_range, apply_state, Region,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use rangekv_core::error::{Error, Result};
use rangekv_core::traits::MetaStore;
use rangekv_core::types::{Peer, PeerId, RegionId, RegionRange, RegionState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const REGION_META_PREFIX: &[u8] = b"meta/region/";
const RAFT_META_PREFIX: &[u8] = b"meta/raft/";

fn region_meta_key(region_id: RegionId) -> Vec<u8> {
    let mut key = REGION_META_PREFIX.to_vec();
    key.extend_from_slice(&region_id.to_be_bytes());
    key
}

fn raft_meta_key(region_id: RegionId) -> Vec<u8> {
    let mut key = RAFT_META_PREFIX.to_vec();
    key.extend_from_slice(&region_id.to_be_bytes());
    key
}

/// Concurrent map of every region hosted by this node.
///
/// Deletion tombstones the id: the entry stays, marked `Deleted`, so stale
/// requests fail fast with `RegionNotFound` instead of silently reusing
/// the id.
pub struct RegionRegistry {
    regions: DashMap<RegionId, Arc<Region>>,
    meta_store: Arc<dyn MetaStore>,
}

impl RegionRegistry {
    /// Create an empty registry over the given persistence.
    pub fn new(meta_store: Arc<dyn MetaStore>) -> Self {
        Self {
            regions: DashMap::new(),
            meta_store,
        }
    }

    /// Rebuild the in-memory map from durable records at startup.
    pub fn load_all(&self) -> Result<()> {
        for (_, value) in self.meta_store.load_prefix(REGION_META_PREFIX)? {
            let region = Region::deserialize(&value)?;
            info!(region_id = region.id(), state = %region.state(), "loaded region meta");
            self.regions.insert(region.id(), region);
        }
        Ok(())
    }

    /// Register a region, persisting its record first.
    pub fn add_region(&self, region: Arc<Region>) -> Result<()> {
        let bytes = region.serialize()?;
        self.meta_store.save(&region_meta_key(region.id()), &bytes)?;
        info!(region_id = region.id(), range = %region.range(false), "add region");
        self.regions.insert(region.id(), region);
        Ok(())
    }

    /// Re-persist and republish an already registered region.
    pub fn update_region(&self, region: Arc<Region>) -> Result<()> {
        let bytes = region.serialize()?;
        self.meta_store.save(&region_meta_key(region.id()), &bytes)?;
        self.regions.insert(region.id(), region);
        Ok(())
    }

    /// Tombstone a region. The durable record is removed; the in-memory
    /// entry flips to `Deleted` so the id keeps failing fast.
    pub fn delete_region(&self, region_id: RegionId) -> Result<()> {
        let region = self
            .regions
            .get(&region_id)
            .map(|r| Arc::clone(r.value()))
            .ok_or(Error::RegionNotFound { region_id })?;
        self.meta_store.delete(&region_meta_key(region_id))?;
        let _ = region.update(|inner| {
            inner.state = RegionState::Deleted;
            inner.state_history.push(RegionState::Deleted);
            Ok(())
        });
        info!(region_id, "delete region");
        Ok(())
    }

    /// Look up a live region; tombstoned ids return `None`.
    pub fn get_region(&self, region_id: RegionId) -> Option<Arc<Region>> {
        self.regions
            .get(&region_id)
            .map(|r| Arc::clone(r.value()))
            .filter(|r| r.state() != RegionState::Deleted)
    }

    /// Whether a live region with this id exists.
    pub fn is_exist_region(&self, region_id: RegionId) -> bool {
        self.get_region(region_id).is_some()
    }

    /// Every registered region, tombstones included.
    pub fn get_all_region(&self) -> Vec<Arc<Region>> {
        self.regions.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Regions still participating in serving (excludes Deleting, Deleted
    /// and Error).
    pub fn get_all_alive_region(&self) -> Vec<Arc<Region>> {
        self.regions
            .iter()
            .map(|r| Arc::clone(r.value()))
            .filter(|r| r.state().is_alive())
            .collect()
    }

    /// Regions reported to the metrics collector: everything not yet fully
    /// torn down.
    pub fn get_all_metrics_region(&self) -> Vec<Arc<Region>> {
        self.regions
            .iter()
            .map(|r| Arc::clone(r.value()))
            .filter(|r| r.state() != RegionState::Deleted)
            .collect()
    }

    fn get_required(&self, region_id: RegionId) -> Result<Arc<Region>> {
        self.get_region(region_id)
            .ok_or(Error::RegionNotFound { region_id })
    }

    /// Transition a region's lifecycle state, durably.
    pub fn update_state(&self, region_id: RegionId, new_state: RegionState) -> Result<()> {
        let region = self.get_required(region_id)?;
        let old_state = region.state();
        region.update_durable(&*self.meta_store, &region_meta_key(region_id), |inner| {
            apply_state(inner, new_state)
        })?;
        info!(region_id, %old_state, %new_state, "region state transition");
        Ok(())
    }

    /// Refresh a region's cached leader. Leadership is volatile raft
    /// output, not durable meta.
    pub fn update_leader_id(&self, region_id: RegionId, leader_id: PeerId) -> Result<()> {
        let region = self.get_required(region_id)?;
        region.set_leader_id(leader_id);
        Ok(())
    }

    /// Replace a region's peer set, durably.
    pub fn update_peers(&self, region_id: RegionId, peers: Vec<Peer>) -> Result<()> {
        let region = self.get_required(region_id)?;
        region.update_durable(&*self.meta_store, &region_meta_key(region_id), |inner| {
            inner.definition.peers = peers;
            Ok(())
        })
    }

    /// Publish a new epoch version with its matching range as one durable,
    /// atomic pair.
    pub fn update_epoch_version_and_range(
        &self,
        region_id: RegionId,
        version: u64,
        range: RegionRange,
    ) -> Result<()> {
        let region = self.get_required(region_id)?;
        region.update_durable(&*self.meta_store, &region_meta_key(region_id), |inner| {
            apply_epoch_version_and_range(inner, version, range)
        })?;
        info!(region_id, version, "region epoch version advanced");
        Ok(())
    }

    /// Bump the membership half of a region's epoch, durably.
    pub fn update_epoch_conf_version(&self, region_id: RegionId, conf_version: u64) -> Result<()> {
        let region = self.get_required(region_id)?;
        region.update_durable(&*self.meta_store, &region_meta_key(region_id), |inner| {
            apply_epoch_conf_version(inner, conf_version)
        })
    }

    /// Durably set the split/merge suppression flag.
    pub fn update_disable_change(&self, region_id: RegionId, disable: bool) -> Result<()> {
        let region = self.get_required(region_id)?;
        region.update_durable(&*self.meta_store, &region_meta_key(region_id), |inner| {
            inner.disable_change = disable;
            Ok(())
        })
    }

    /// Durably set the temporary suppression flag.
    pub fn update_temporary_disable_change(
        &self,
        region_id: RegionId,
        disable: bool,
    ) -> Result<()> {
        let region = self.get_required(region_id)?;
        region.update_durable(&*self.meta_store, &region_meta_key(region_id), |inner| {
            inner.temporary_disable_change = disable;
            Ok(())
        })
    }

    /// Durably record the last administrative job applied to a region.
    pub fn update_last_change_job_id(&self, region_id: RegionId, job_id: u64) -> Result<()> {
        let region = self.get_required(region_id)?;
        region.update_durable(&*self.meta_store, &region_meta_key(region_id), |inner| {
            inner.last_change_job_id = job_id;
            Ok(())
        })
    }
}

/// Replication progress of one region: raft term and last applied index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftMetaRecord {
    /// Region the record belongs to.
    pub region_id: RegionId,
    /// Last known raft term.
    pub term: u64,
    /// Last applied log index.
    pub applied_index: u64,
}

/// Mutex-guarded raft meta; term and applied index always move as a pair.
pub struct RaftMeta {
    record: Mutex<RaftMetaRecord>,
}

impl RaftMeta {
    /// Fresh record for a region.
    pub fn new(region_id: RegionId) -> Arc<Self> {
        Arc::new(Self {
            record: Mutex::new(RaftMetaRecord {
                region_id,
                term: 0,
                applied_index: 0,
            }),
        })
    }

    /// The region this record tracks.
    pub fn region_id(&self) -> RegionId {
        self.record.lock().region_id
    }

    /// Last known term.
    pub fn term(&self) -> u64 {
        self.record.lock().term
    }

    /// Last applied index.
    pub fn applied_index(&self) -> u64 {
        self.record.lock().applied_index
    }

    /// Update term and applied index as one pair.
    pub fn set_term_and_applied_index(&self, term: u64, applied_index: u64) {
        let mut record = self.record.lock();
        record.term = term;
        record.applied_index = applied_index;
    }

    /// Snapshot of the record.
    pub fn record(&self) -> RaftMetaRecord {
        *self.record.lock()
    }
}

/// Registry of per-region raft meta with the same persist-first discipline
/// as the region registry.
pub struct RaftMetaRegistry {
    metas: DashMap<RegionId, Arc<RaftMeta>>,
    meta_store: Arc<dyn MetaStore>,
}

impl RaftMetaRegistry {
    /// Create an empty registry over the given persistence.
    pub fn new(meta_store: Arc<dyn MetaStore>) -> Self {
        Self {
            metas: DashMap::new(),
            meta_store,
        }
    }

    /// Rebuild from durable records at startup.
    pub fn load_all(&self) -> Result<()> {
        for (_, value) in self.meta_store.load_prefix(RAFT_META_PREFIX)? {
            let record: RaftMetaRecord = bincode::deserialize(&value)?;
            let meta = RaftMeta::new(record.region_id);
            meta.set_term_and_applied_index(record.term, record.applied_index);
            self.metas.insert(record.region_id, meta);
        }
        Ok(())
    }

    /// Register and persist a fresh record.
    pub fn add_raft_meta(&self, meta: Arc<RaftMeta>) -> Result<()> {
        self.save_raft_meta_record(&meta)?;
        self.metas.insert(meta.region_id(), meta);
        Ok(())
    }

    /// Persist the current state of a registered record.
    pub fn save_raft_meta(&self, region_id: RegionId) -> Result<()> {
        let meta = self
            .metas
            .get(&region_id)
            .map(|m| Arc::clone(m.value()))
            .ok_or(Error::RegionNotFound { region_id })?;
        self.save_raft_meta_record(&meta)
    }

    fn save_raft_meta_record(&self, meta: &RaftMeta) -> Result<()> {
        let record = meta.record();
        let bytes = bincode::serialize(&record)?;
        self.meta_store.save(&raft_meta_key(record.region_id), &bytes)
    }

    /// Remove a record from memory and durable storage.
    pub fn delete_raft_meta(&self, region_id: RegionId) -> Result<()> {
        self.meta_store.delete(&raft_meta_key(region_id))?;
        self.metas.remove(&region_id);
        Ok(())
    }

    /// Look up one record.
    pub fn get_raft_meta(&self, region_id: RegionId) -> Option<Arc<RaftMeta>> {
        self.metas.get(&region_id).map(|m| Arc::clone(m.value()))
    }

    /// Every record.
    pub fn get_all_raft_meta(&self) -> Vec<Arc<RaftMeta>> {
        self.metas.iter().map(|m| Arc::clone(m.value())).collect()
    }
}
