//! Hashing - SHA-256 Job Fingerprints
//!
//! Same template version + same inputs + same engine always yields the same
//! `job_hash`, so regenerated documents can be correlated with earlier runs.

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    to_string(&sort_value(&v))
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), sort_value(v))).collect())
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// job_hash = sha256(template_id + template_version + canonical_inputs + engine_version)
pub fn compute_job_hash(
    template_id: &str,
    template_version: &str,
    inputs: &impl Serialize,
    engine_version: &str,
) -> Result<String, serde_json::Error> {
    let canonical_inputs = canonical_json(inputs)?;
    let combined = format!(
        "{}:{}:{}:{}",
        template_id, template_version, canonical_inputs, engine_version
    );
    Ok(sha256_hex(combined.as_bytes()))
}
