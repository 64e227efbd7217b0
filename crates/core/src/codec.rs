//! Key codec and range arithmetic
//!
//! User keys live in a reserved keyspace inside the backend: every internal
//! key is the user key prefixed with a one-byte keyspace marker. Region
//! ranges may be expressed in either space; `encode_key`/`decode_key`
//! translate between them.

use crate::error::{Error, Result};
use crate::types::RegionRange;
use std::fmt::Write as _;

/// Keyspace marker for transactional data.
pub const KEYSPACE_TXN: u8 = b't';

/// Translate a user key into the internal key space.
pub fn encode_key(user_key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(user_key.len() + 1);
    out.push(KEYSPACE_TXN);
    out.extend_from_slice(user_key);
    out
}

/// Translate an internal key back into the user key space.
///
/// # Errors
/// Fails with `Internal` if the key does not carry the keyspace marker.
pub fn decode_key(internal_key: &[u8]) -> Result<Vec<u8>> {
    match internal_key.first() {
        Some(&KEYSPACE_TXN) => Ok(internal_key[1..].to_vec()),
        _ => Err(Error::Internal(format!(
            "key {} lacks keyspace prefix",
            hex(internal_key)
        ))),
    }
}

/// Encode both bounds of a range. An empty bound stays empty (unbounded),
/// except the start bound, which maps to the keyspace origin so the encoded
/// range stays inside the keyspace.
pub fn encode_range(range: &RegionRange) -> RegionRange {
    let start_key = encode_key(&range.start_key);
    let end_key = if range.end_key.is_empty() {
        prefix_next(&[KEYSPACE_TXN])
    } else {
        encode_key(&range.end_key)
    };
    RegionRange { start_key, end_key }
}

/// The smallest key strictly greater than every key starting with `prefix`.
///
/// Computed by incrementing the last non-0xff byte and truncating. Returns
/// an empty vector (the unbounded sentinel) when no such key exists
/// (all bytes 0xff).
pub fn prefix_next(prefix: &[u8]) -> Vec<u8> {
    let mut out = prefix.to_vec();
    while let Some(last) = out.last_mut() {
        if *last < 0xff {
            *last += 1;
            return out;
        }
        out.pop();
    }
    Vec::new()
}

/// Hex rendering of a byte string for logs and error messages.
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02X}");
    }
    out
}
