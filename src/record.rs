//! Canonical script records and the normalizer that produces them.
//!
//! Stored values come in three historical shapes: a bare string holding the
//! code, a partial object with any subset of `code`, `enabled` and `library`,
//! and a full object whose `enabled` may be a boolean or the strings
//! `"true"`/`"false"`. [`normalize`] accepts all of them and is the only place
//! that knows about those shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The canonical script for one domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRecord {
    /// User JavaScript source, possibly empty
    pub code: String,
    /// Whether the script runs automatically on page visits
    pub enabled: bool,
    /// Identifier of a helper library injected before `code`; empty means none
    pub library: String,
}

impl Default for ScriptRecord {
    fn default() -> Self {
        Self {
            code: String::new(),
            enabled: true,
            library: String::new(),
        }
    }
}

impl ScriptRecord {
    pub fn new(code: impl Into<String>, enabled: bool, library: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            enabled,
            library: library.into(),
        }
    }

    /// Enabled record with no helper library
    pub fn from_code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    /// Canonical persisted form. `enabled` is always written as a boolean.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("code".to_string(), Value::String(self.code.clone()));
        object.insert("enabled".to_string(), Value::Bool(self.enabled));
        object.insert("library".to_string(), Value::String(self.library.clone()));
        Value::Object(object)
    }

    /// Byte length of the compact JSON encoding, used for the chunking decision
    pub fn serialized_len(&self) -> usize {
        serialized_len(&self.to_value())
    }

    /// A record only runs when it is enabled and has something to run
    pub fn is_runnable(&self) -> bool {
        self.enabled && !self.code.is_empty()
    }
}

/// Byte length of the compact JSON encoding of `value`
pub fn serialized_len(value: &Value) -> usize {
    // Value serialization cannot fail: keys are always strings.
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

/// Produce a canonical record from whatever was stored under a record key.
pub fn normalize(raw: Option<&Value>) -> ScriptRecord {
    match raw {
        None | Some(Value::Null) => ScriptRecord::default(),
        Some(Value::String(code)) => ScriptRecord::from_code(code.clone()),
        Some(Value::Object(fields)) => ScriptRecord {
            code: string_field(fields, "code"),
            enabled: fields.get("enabled").map(coerce_enabled).unwrap_or(true),
            library: string_field(fields, "library"),
        },
        Some(_) => ScriptRecord::default(),
    }
}

fn string_field(fields: &Map<String, Value>, name: &str) -> String {
    fields
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Legacy writers stored `enabled` as `"true"`/`"false"`.
fn coerce_enabled(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => !s.trim().eq_ignore_ascii_case("false"),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        _ => true,
    }
}
