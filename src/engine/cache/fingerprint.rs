//! Deterministic cache keys for tool invocations

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Cache key derived from a capability name and canonicalized parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive the fingerprint for `capability` called with `params`.
    ///
    /// Object keys are sorted and string whitespace is normalized before
    /// hashing, so logically equal requests always collide.
    pub fn derive(capability: &str, params: &Value) -> Self {
        let mut canonical = String::new();
        write_canonical(params, &mut canonical);

        let mut hasher = Sha256::new();
        hasher.update(capability.as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();

        Self(format!("{}:{:x}", capability, digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Capability prefix of the key
    pub fn capability(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Collapse runs of whitespace and trim the ends
fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Serialize `value` with sorted object keys and normalized strings.
///
/// Written by hand so the output does not depend on whether serde_json's
/// map preserves insertion order in this build.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(&Value::String(normalize_whitespace(s)).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(normalize_whitespace(key)).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}
