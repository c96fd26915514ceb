//! Hashing System - SHA-256 for Cache Keys and Manifests
//!
//! Provides deterministic, reproducible hashes. Cache keys and build manifests
//! both go through canonical JSON so field order never changes a digest.

use sha2::{Sha256, Digest};
use serde::Serialize;
use serde_json::{Value, to_string};

/// Bumped whenever a generator's output format changes.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Canonical JSON: object keys sorted at every depth, no whitespace.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    to_string(&canonicalize(serde_json::to_value(value)?))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, canonicalize(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Compute manifest hash for a build report
pub fn compute_manifest_hash<T: Serialize>(manifest: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(manifest)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Content-addressed key for a generated asset.
/// asset_key = sha256(schema_version + kind + canonical_params)
pub fn asset_key(kind: &str, params: &(impl Serialize + ?Sized)) -> Result<String, serde_json::Error> {
    let canonical_params = canonical_json(params)?;
    let combined = format!("{}:{}:{}", CACHE_SCHEMA_VERSION, kind, canonical_params);
    Ok(sha256_hex(combined.as_bytes()))
}

/// True for a lowercase 64-digit hex SHA-256 digest.
pub fn is_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": 2, "m": 3});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn test_hash_deterministic() {
        let data = b"test data";
        let h1 = sha256_hex(data);
        let h2 = sha256_hex(data);
        assert_eq!(h1, h2);
        assert!(is_digest(&h1));
    }

    #[test]
    fn test_asset_key_ignores_field_order() {
        let a = json!({"width_px": 10, "height_px": 20, "dpi": 150});
        let b = json!({"dpi": 150, "height_px": 20, "width_px": 10});
        assert_eq!(asset_key("gradient", &a).unwrap(), asset_key("gradient", &b).unwrap());
    }

    #[test]
    fn test_asset_key_depends_on_kind_and_params() {
        let params = json!({"width_px": 10});
        let gradient = asset_key("gradient", &params).unwrap();
        assert_ne!(gradient, asset_key("vignette", &params).unwrap());
        assert_ne!(gradient, asset_key("gradient", &json!({"width_px": 11})).unwrap());
    }

    #[test]
    fn test_is_digest_rejects_paths() {
        assert!(!is_digest("../../etc/passwd"));
        assert!(!is_digest(&"A".repeat(64)));
    }
}
