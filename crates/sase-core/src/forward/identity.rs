//! Source-data identifiers for forwarded events.
//!
//! SOAR deduplicates containers by `source_data_identifier`, so the hash
//! must be stable for a given event: either over the configured primary-key
//! fields or, with none configured, over the whole CEF document. FIPS-mode
//! deployments may not use MD5, so they hash with SHA-256 instead.

use std::collections::BTreeMap;

use md5::{Digest, Md5};
use sha2::Sha256;

use crate::error::CoreResult;
use crate::forward::cef::FieldValue;

/// The human-readable key string and its hash for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventIdentity {
    /// `"key:value, key:value"` over the sorted configured keys, empty when
    /// no keys are configured.
    pub pk_str: String,
    pub pk_hash: String,
}

fn hash_hex(data: &[u8], fips: bool) -> String {
    if fips {
        hex::encode(Sha256::digest(data))
    } else {
        hex::encode(Md5::digest(data))
    }
}

/// Computes the identity of one event from its CEF document and the
/// configured primary-key field names.
pub fn event_identity(
    cef: &BTreeMap<String, FieldValue>,
    pk_fields: &[String],
    fips: bool,
) -> CoreResult<EventIdentity> {
    if pk_fields.is_empty() {
        let serialized = serde_json::to_string(cef)?;
        return Ok(EventIdentity {
            pk_str: String::new(),
            pk_hash: hash_hex(serialized.as_bytes(), fips),
        });
    }
    let mut sorted: Vec<&String> = pk_fields.iter().collect();
    sorted.sort();
    let pk_str = sorted
        .iter()
        .filter_map(|k| cef.get(*k).map(|v| format!("{}:{}", k, v.joined())))
        .collect::<Vec<_>>()
        .join(", ");
    let pk_hash = hash_hex(pk_str.as_bytes(), fips);
    Ok(EventIdentity { pk_str, pk_hash })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cef() -> BTreeMap<String, FieldValue> {
        let mut map = BTreeMap::new();
        map.insert(
            "src".to_string(),
            FieldValue::Single("10.0.0.1".to_string()),
        );
        map.insert(
            "duser".to_string(),
            FieldValue::Multi(vec!["alice".to_string(), "bob".to_string()]),
        );
        map
    }

    #[test]
    fn test_identity_over_sorted_keys() {
        let id = event_identity(
            &cef(),
            &["src".to_string(), "duser".to_string(), "missing".to_string()],
            false,
        )
        .unwrap();
        assert_eq!(id.pk_str, "duser:alicebob, src:10.0.0.1");
        assert_eq!(id.pk_hash, hex::encode(Md5::digest(id.pk_str.as_bytes())));
    }

    #[test]
    fn test_identity_without_keys_hashes_document() {
        let id = event_identity(&cef(), &[], false).unwrap();
        assert!(id.pk_str.is_empty());
        assert_eq!(id.pk_hash.len(), 32);
    }

    #[test]
    fn test_fips_uses_sha256() {
        let plain = event_identity(&cef(), &["src".to_string()], false).unwrap();
        let fips = event_identity(&cef(), &["src".to_string()], true).unwrap();
        assert_eq!(plain.pk_str, fips.pk_str);
        assert_ne!(plain.pk_hash, fips.pk_hash);
        assert_eq!(fips.pk_hash.len(), 64);
    }
}
