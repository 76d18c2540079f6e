use sha2::{Digest, Sha256};

/// Separator placed between rendered fields before hashing.
pub const FIELD_DELIMITER: &str = "|";

/// Number of SHA-256 digest bytes kept in a record hash (128 bits).
pub const HASH_PREFIX_BYTES: usize = 16;

/// Deterministic deduplication key for an ordered tuple of identifying fields.
///
/// Fields are joined with [`FIELD_DELIMITER`], hashed with SHA-256, and the first
/// [`HASH_PREFIX_BYTES`] bytes are returned as lowercase hex.
///
/// An absent field renders as the empty string, so `None` and `Some("")` in the
/// same position yield the same key. Callers must not mix the two for one field.
/// A field that itself contains the delimiter can also alias a neighbouring split.
#[must_use]
pub fn record_hash(fields: &[Option<&str>]) -> String {
    let mut hasher = Sha256::new();
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            hasher.update(FIELD_DELIMITER.as_bytes());
        }
        hasher.update(field.unwrap_or_default().as_bytes());
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..HASH_PREFIX_BYTES])
}

/// Use a source-native unique identifier as the deduplication key.
///
/// Returns `None` for absent or blank identifiers.
#[must_use]
pub fn native_key(id: Option<String>) -> Option<String> {
    id.filter(|value| !value.trim().is_empty())
}
