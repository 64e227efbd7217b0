//! Collaborator doubles shared by upper-layer test suites

use dashmap::DashMap;
use rangekv_core::traits::{IndexChecker, RaftRouter};
use rangekv_core::types::{PeerId, RegionId};
use std::sync::atomic::{AtomicBool, Ordering};

/// Raft router double: leadership is whatever the test sets, default
/// leader-everywhere.
#[derive(Default)]
pub struct MockRaftRouter {
    demoted: DashMap<RegionId, Option<PeerId>>,
}

impl MockRaftRouter {
    /// New router that claims leadership of every region.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark this node a follower for `region_id`, optionally advertising
    /// the leader.
    pub fn demote(&self, region_id: RegionId, leader_hint: Option<PeerId>) {
        self.demoted.insert(region_id, leader_hint);
    }

    /// Restore leadership of `region_id`.
    pub fn promote(&self, region_id: RegionId) {
        self.demoted.remove(&region_id);
    }
}

impl RaftRouter for MockRaftRouter {
    fn is_leader(&self, region_id: RegionId) -> bool {
        !self.demoted.contains_key(&region_id)
    }

    fn leader_id(&self, region_id: RegionId) -> Option<PeerId> {
        self.demoted.get(&region_id).and_then(|hint| *hint)
    }
}

/// Index checker double with switchable readiness.
pub struct MockIndexChecker {
    ready: AtomicBool,
    build_error: AtomicBool,
}

impl Default for MockIndexChecker {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
            build_error: AtomicBool::new(false),
        }
    }
}

impl MockIndexChecker {
    /// New checker that reports ready for every region.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip readiness.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Flip the build-error flag.
    pub fn set_build_error(&self, build_error: bool) {
        self.build_error.store(build_error, Ordering::SeqCst);
    }
}

impl IndexChecker for MockIndexChecker {
    fn is_ready(&self, _region_id: RegionId) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn is_build_error(&self, _region_id: RegionId) -> bool {
        self.build_error.load(Ordering::SeqCst)
    }
}
