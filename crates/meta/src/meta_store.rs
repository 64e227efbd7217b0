//! Meta persistence over a raw engine
//!
//! Region and raft meta records live in the backend's reserved meta column
//! family. Any `RawEngine` works; prefix loading rides on the engine's
//! ordered scan.

use rangekv_core::codec::prefix_next;
use rangekv_core::error::Result;
use rangekv_core::traits::{MetaStore, RawEngine, CF_META};
use std::sync::Arc;

/// `MetaStore` implementation backed by a `RawEngine`'s meta column family.
pub struct EngineMetaStore<E: RawEngine> {
    engine: Arc<E>,
}

impl<E: RawEngine> EngineMetaStore<E> {
    /// Wrap an engine.
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }
}

impl<E: RawEngine> MetaStore for EngineMetaStore<E> {
    fn save(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.engine.put(CF_META, key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.engine.delete(CF_META, key)
    }

    fn load_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.engine.scan(CF_META, prefix, &prefix_next(prefix), 0)
    }
}
