//! Cache key helpers.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Builds `prefix:<sha256 hex>` from the JSON form of `value`.
///
/// Equal values always produce equal keys, so this works as a key generator
/// for inputs without a natural identifier.
pub fn hashed_key<T: Serialize + ?Sized>(prefix: &str, value: &T) -> serde_json::Result<String> {
    let bytes = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{prefix}:{}", hex::encode(hasher.finalize())))
}
