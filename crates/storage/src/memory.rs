//! In-memory ordered column-family engine
//!
//! Column families are created lazily on first write. Each is a BTreeMap
//! under its own RwLock, so readers of one family never contend with
//! writers of another. Single-key operations are atomic; that is all the
//! transaction layer asks of a backend.

use parking_lot::RwLock;
use rangekv_core::error::Result;
use rangekv_core::traits::RawEngine;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

type Family = Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>;

/// Ordered in-memory KV engine with named column families.
#[derive(Default)]
pub struct MemEngine {
    families: RwLock<FxHashMap<String, Family>>,
}

impl MemEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    fn family(&self, cf: &str) -> Option<Family> {
        self.families.read().get(cf).cloned()
    }

    fn family_or_create(&self, cf: &str) -> Family {
        if let Some(f) = self.family(cf) {
            return f;
        }
        let mut families = self.families.write();
        Arc::clone(
            families
                .entry(cf.to_string())
                .or_insert_with(Family::default),
        )
    }

    /// Number of keys in a column family, for tests and metrics.
    pub fn cf_len(&self, cf: &str) -> usize {
        self.family(cf).map_or(0, |f| f.read().len())
    }
}

impl RawEngine for MemEngine {
    fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.family(cf).and_then(|f| f.read().get(key).cloned()))
    }

    fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.family_or_create(cf)
            .write()
            .insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, cf: &str, key: &[u8]) -> Result<()> {
        if let Some(f) = self.family(cf) {
            f.write().remove(key);
        }
        Ok(())
    }

    fn scan(
        &self,
        cf: &str,
        start: &[u8],
        end: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let Some(f) = self.family(cf) else {
            return Ok(Vec::new());
        };
        let map = f.read();
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end.to_vec())
        };
        let iter = map.range((Bound::Included(start.to_vec()), upper));
        let mut out = Vec::new();
        for (k, v) in iter {
            if limit > 0 && out.len() >= limit {
                break;
            }
            out.push((k.clone(), v.clone()));
        }
        Ok(out)
    }

    fn delete_range(&self, cf: &str, start: &[u8], end: &[u8]) -> Result<()> {
        let Some(f) = self.family(cf) else {
            return Ok(());
        };
        let mut map = f.write();
        let doomed: Vec<Vec<u8>> = {
            let upper = if end.is_empty() {
                Bound::Unbounded
            } else {
                Bound::Excluded(end.to_vec())
            };
            map.range((Bound::Included(start.to_vec()), upper))
                .map(|(k, _)| k.clone())
                .collect()
        };
        for key in doomed {
            map.remove(&key);
        }
        Ok(())
    }
}
