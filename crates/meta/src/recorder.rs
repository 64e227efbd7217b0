//! Region change history
//!
//! Administrative jobs (split, merge, peer change) leave a durable trail of
//! timestamped events keyed by job id, for operator forensics after a
//! failed or slow region change. Records are persisted on every upsert with
//! the same write-durable-first discipline as the registries.

use dashmap::DashMap;
use rangekv_core::error::Result;
use rangekv_core::traits::MetaStore;
use rangekv_core::types::RegionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const CHANGE_RECORD_PREFIX: &[u8] = b"meta/change/";

fn change_record_key(job_id: u64) -> Vec<u8> {
    let mut key = CHANGE_RECORD_PREFIX.to_vec();
    key.extend_from_slice(&job_id.to_be_bytes());
    key
}

/// What kind of administrative change a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Range split: one region becomes two.
    Split,
    /// Range merge: two regions become one.
    Merge,
    /// Peer-set change.
    ChangePeer,
}

/// One timestamped event point within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Unix milliseconds the event was recorded at.
    pub at_ms: i64,
    /// Free-form event description.
    pub event: String,
}

/// The full trail of one administrative job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Coordinator-assigned job id.
    pub job_id: u64,
    /// The region the job operates on.
    pub region_id: RegionId,
    /// Job kind.
    pub kind: ChangeKind,
    /// Timestamped event points, oldest first.
    pub events: Vec<ChangeEvent>,
}

/// Durable recorder of region change jobs.
pub struct RegionChangeRecorder {
    records: DashMap<u64, ChangeRecord>,
    meta_store: Arc<dyn MetaStore>,
}

impl RegionChangeRecorder {
    /// Create an empty recorder over the given persistence.
    pub fn new(meta_store: Arc<dyn MetaStore>) -> Self {
        Self {
            records: DashMap::new(),
            meta_store,
        }
    }

    /// Rebuild from durable records at startup.
    pub fn load_all(&self) -> Result<()> {
        for (_, value) in self.meta_store.load_prefix(CHANGE_RECORD_PREFIX)? {
            let record: ChangeRecord = bincode::deserialize(&value)?;
            self.records.insert(record.job_id, record);
        }
        Ok(())
    }

    /// Open a job's trail (or extend it, if the job id is already known)
    /// with one event.
    pub fn add_change_record(
        &self,
        job_id: u64,
        region_id: RegionId,
        kind: ChangeKind,
        event: impl Into<String>,
    ) -> Result<()> {
        let mut record = self
            .records
            .get(&job_id)
            .map(|r| r.clone())
            .unwrap_or(ChangeRecord {
                job_id,
                region_id,
                kind,
                events: Vec::new(),
            });
        record.events.push(ChangeEvent {
            at_ms: chrono::Utc::now().timestamp_millis(),
            event: event.into(),
        });
        let bytes = bincode::serialize(&record)?;
        self.meta_store.save(&change_record_key(job_id), &bytes)?;
        self.records.insert(job_id, record);
        Ok(())
    }

    /// Append an event point to an existing job; unknown job ids are
    /// ignored (the job may belong to a peer node).
    pub fn add_change_record_time_point(
        &self,
        job_id: u64,
        event: impl Into<String>,
    ) -> Result<()> {
        let Some(existing) = self.records.get(&job_id).map(|r| r.clone()) else {
            return Ok(());
        };
        let mut record = existing;
        record.events.push(ChangeEvent {
            at_ms: chrono::Utc::now().timestamp_millis(),
            event: event.into(),
        });
        let bytes = bincode::serialize(&record)?;
        self.meta_store.save(&change_record_key(job_id), &bytes)?;
        self.records.insert(job_id, record);
        Ok(())
    }

    /// One job's trail.
    pub fn change_record(&self, job_id: u64) -> Option<ChangeRecord> {
        self.records.get(&job_id).map(|r| r.clone())
    }

    /// Every trail touching a region.
    pub fn get_change_records(&self, region_id: RegionId) -> Vec<ChangeRecord> {
        let mut out: Vec<ChangeRecord> = self
            .records
            .iter()
            .filter(|r| r.region_id == region_id)
            .map(|r| r.clone())
            .collect();
        out.sort_by_key(|r| r.job_id);
        out
    }

    /// Every trail on this node.
    pub fn get_all_change_records(&self) -> Vec<ChangeRecord> {
        let mut out: Vec<ChangeRecord> = self.records.iter().map(|r| r.clone()).collect();
        out.sort_by_key(|r| r.job_id);
        out
    }
}
