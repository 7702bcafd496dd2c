//! Cache key derivation
//!
//! Keys are content addressed: the query description is serialized to JSON
//! and hashed with SHA-256. Map-shaped inputs must serialize in a stable
//! order (`BTreeMap`, or `serde_json::Map` without `preserve_order`) for two
//! structurally identical queries to land on the same key.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::CacheError;

/// Stable hex digest of a serializable query description
pub fn hash_query<T: Serialize + ?Sized>(query: &T) -> Result<String, CacheError> {
    let bytes = serde_json::to_vec(query)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
