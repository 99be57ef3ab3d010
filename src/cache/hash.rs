//! Identity hashing for cached cohort sets.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 of the JSON form of `value`, as 64 lowercase hex characters.
///
/// Cache keys hash the isolated SQL string itself, so any change to the
/// statement text, declarations included, is a different key.
pub fn compute_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    Ok(format!("{:x}", Sha256::digest(&json)))
}
