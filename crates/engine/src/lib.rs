//! Region transaction engine facade
//!
//! Ties the layers together into the inbound command flow: resolve the
//! region from the registry, validate epoch/range/state/leadership and the
//! cluster read-only flag, acquire latches for the touched keys, consult
//! the memory lock table, execute the transaction protocol against the
//! backend, release latches and update serving statistics.

#![warn(clippy::all)]

pub mod store_engine;
pub mod validate;

pub use store_engine::{EngineConfig, RequestContext, StoreEngine};
