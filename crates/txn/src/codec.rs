//! MVCC key codec
//!
//! Column-family keys use the memcomparable group encoding: the user key is
//! chunked into groups of 8 bytes, each zero-padded and closed with a
//! marker byte recording how many bytes were real. The encoding preserves
//! byte order, and no encoded key is a prefix of another, so a timestamp
//! suffix can be appended without versions of different keys interleaving.
//!
//! The timestamp suffix is `!ts` big-endian: larger timestamps produce
//! smaller suffixes, so versions of one key sort newest first.

use rangekv_core::error::{Error, Result};
use rangekv_core::types::Ts;

const GROUP_SIZE: usize = 8;
const MARKER_FULL: u8 = 0xff;

/// Memcomparable encoding of a user key.
pub fn encode_bytes(key: &[u8]) -> Vec<u8> {
    let groups = key.len() / GROUP_SIZE + 1;
    let mut out = Vec::with_capacity(groups * (GROUP_SIZE + 1));
    for chunk in 0..groups {
        let start = chunk * GROUP_SIZE;
        let end = (start + GROUP_SIZE).min(key.len());
        let valid = end - start;
        out.extend_from_slice(&key[start..end]);
        out.extend(std::iter::repeat(0u8).take(GROUP_SIZE - valid));
        if valid == GROUP_SIZE && chunk + 1 < groups {
            out.push(MARKER_FULL);
        } else {
            out.push(MARKER_FULL - (GROUP_SIZE - valid) as u8);
        }
    }
    out
}

/// Inverse of `encode_bytes`.
///
/// # Errors
/// Fails with `Internal` on truncated or malformed input.
pub fn decode_bytes(encoded: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded.len());
    let mut offset = 0;
    loop {
        let group = encoded
            .get(offset..offset + GROUP_SIZE + 1)
            .ok_or_else(|| Error::Internal("truncated mvcc key".into()))?;
        let marker = group[GROUP_SIZE];
        if marker == MARKER_FULL {
            out.extend_from_slice(&group[..GROUP_SIZE]);
            offset += GROUP_SIZE + 1;
            continue;
        }
        let pad = (MARKER_FULL - marker) as usize;
        if pad > GROUP_SIZE {
            return Err(Error::Internal("malformed mvcc key marker".into()));
        }
        let valid = GROUP_SIZE - pad;
        if group[valid..GROUP_SIZE].iter().any(|b| *b != 0) {
            return Err(Error::Internal("malformed mvcc key padding".into()));
        }
        out.extend_from_slice(&group[..valid]);
        if offset + GROUP_SIZE + 1 != encoded.len() {
            return Err(Error::Internal("trailing bytes after mvcc key".into()));
        }
        return Ok(out);
    }
}

/// Timestamp suffix: complement of the big-endian timestamp.
pub fn ts_suffix(ts: Ts) -> [u8; 8] {
    (!ts).to_be_bytes()
}

/// Encoded key plus timestamp suffix: one version of one user key.
pub fn encode_ts_key(key: &[u8], ts: Ts) -> Vec<u8> {
    let mut out = encode_bytes(key);
    out.extend_from_slice(&ts_suffix(ts));
    out
}

/// Split a versioned key back into user key and timestamp.
///
/// # Errors
/// Fails with `Internal` if the key lacks a timestamp suffix or the
/// remainder is not a valid encoded key.
pub fn decode_ts_key(encoded: &[u8]) -> Result<(Vec<u8>, Ts)> {
    if encoded.len() < 8 {
        return Err(Error::Internal("versioned key too short".into()));
    }
    let (key_part, suffix) = encoded.split_at(encoded.len() - 8);
    let mut raw = [0u8; 8];
    raw.copy_from_slice(suffix);
    let ts = !Ts::from_be_bytes(raw);
    Ok((decode_bytes(key_part)?, ts))
}
