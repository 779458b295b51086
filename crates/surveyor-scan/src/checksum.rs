//! Content checksum of scan results for change detection.
//!
//! Each plugin entry is stripped of its volatile keys, the whole document is
//! rebuilt with object keys in sorted order at every level, and the compact
//! JSON encoding is hashed with BLAKE3.

use serde_json::{Map, Value};
use surveyor_core::ScanResults;

use crate::error::Result;

/// Keys that differ between runs against an unchanged device.
pub const VOLATILE_KEYS: [&str; 3] = ["status", "date", "messages"];

/// The results as a JSON object with volatile keys removed from every
/// plugin entry.
pub fn cleaned_results(results: &ScanResults) -> Result<Value> {
    let mut cleaned = Map::new();
    for (plugin, result) in results {
        let mut entry = serde_json::to_value(result)?;
        if let Value::Object(fields) = &mut entry {
            for key in VOLATILE_KEYS {
                fields.remove(key);
            }
        }
        cleaned.insert(plugin.clone(), entry);
    }
    Ok(Value::Object(cleaned))
}

/// Rebuild `value` with object keys sorted at every level.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(fields) => {
            let mut entries: Vec<(String, Value)> = fields.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Lowercase hex BLAKE3 of the canonical cleaned results.
pub fn results_checksum(results: &ScanResults) -> Result<String> {
    let canonical = canonicalize(cleaned_results(results)?);
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use surveyor_core::PluginResult;

    use super::*;

    fn result(json: Value) -> PluginResult {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_checksum_ignores_key_order() {
        let mut first = ScanResults::new();
        first.insert(
            "snmp".to_string(),
            result(json!({"device": {"hostname": "sw-1", "model": "x"}, "uptime": 3})),
        );
        let mut second = ScanResults::new();
        second.insert(
            "snmp".to_string(),
            result(json!({"uptime": 3, "device": {"model": "x", "hostname": "sw-1"}})),
        );
        assert_eq!(
            results_checksum(&first).unwrap(),
            results_checksum(&second).unwrap()
        );
    }

    #[test]
    fn test_checksum_ignores_volatile_keys() {
        let mut first = ScanResults::new();
        first.insert(
            "snmp".to_string(),
            result(json!({"status": "success", "messages": [], "device": {"hostname": "a"}})),
        );
        let mut second = ScanResults::new();
        second.insert(
            "snmp".to_string(),
            result(json!({
                "status": "error",
                "date": "2024-05-01T10:00:00Z",
                "messages": ["timeout"],
                "device": {"hostname": "a"}
            })),
        );
        assert_eq!(
            results_checksum(&first).unwrap(),
            results_checksum(&second).unwrap()
        );

        second.get_mut("snmp").unwrap().extra.insert("uptime".into(), json!(1));
        assert_ne!(
            results_checksum(&first).unwrap(),
            results_checksum(&second).unwrap()
        );
    }

    #[test]
    fn test_checksum_is_lowercase_hex() {
        let sum = results_checksum(&ScanResults::new()).unwrap();
        assert_eq!(sum.len(), 64);
        assert!(sum.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_canonicalize_sorts_nested_objects_inside_arrays() {
        let value = canonicalize(json!([{"b": 1, "a": {"d": 2, "c": 3}}]));
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"[{"a":{"c":3,"d":2},"b":1}]"#
        );
    }
}
