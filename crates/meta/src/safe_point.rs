//! GC safe points
//!
//! The coordinator pushes a resolved safe point per keyspace; MVCC versions
//! strictly older than it (and superseded by a newer committed version) may
//! be reclaimed. Safe points only move forward.

use dashmap::DashMap;
use rangekv_core::types::Ts;
use tracing::info;

/// Default keyspace id for deployments without multi-tenancy.
pub const DEFAULT_KEYSPACE: u64 = 0;

/// Per-keyspace monotonic GC safe points.
#[derive(Default)]
pub struct GcSafePointManager {
    safe_points: DashMap<u64, Ts>,
}

impl GcSafePointManager {
    /// Create with no safe points resolved yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance a keyspace's safe point. Regressions are ignored; returns
    /// the effective safe point after the call.
    pub fn update_safe_point(&self, keyspace: u64, ts: Ts) -> Ts {
        let mut entry = self.safe_points.entry(keyspace).or_insert(0);
        if ts > *entry {
            info!(keyspace, safe_point = ts, "gc safe point advanced");
            *entry = ts;
        }
        *entry
    }

    /// Current safe point of a keyspace; zero if never resolved.
    pub fn safe_point(&self, keyspace: u64) -> Ts {
        self.safe_points.get(&keyspace).map_or(0, |ts| *ts)
    }
}
