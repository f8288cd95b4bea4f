//! JSON documents used to move scripts between installations.
//!
//! An export is a JSON object mapping each domain to its record. Imports
//! accept the same legacy value shapes as storage reads.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::StorageError;
use crate::record::{ScriptRecord, normalize};

/// Scripts keyed by domain, as exported or imported
pub type ScriptBundle = BTreeMap<String, ScriptRecord>;

/// Parse an exported document into canonical records.
pub fn parse_bundle(text: &str) -> Result<ScriptBundle, StorageError> {
    let document: Value = serde_json::from_str(text)?;
    let Value::Object(entries) = document else {
        return Err(StorageError::invalid_bundle(
            "expected a JSON object mapping domains to scripts",
        ));
    };

    let mut scripts = BTreeMap::new();
    for (domain, raw) in entries {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(StorageError::invalid_bundle("empty domain name"));
        }
        scripts.insert(domain.to_string(), normalize(Some(&raw)));
    }

    debug!("Parsed bundle with {} script(s)", scripts.len());
    Ok(scripts)
}

/// Render records as a pretty-printed export document.
pub fn render_bundle(scripts: &ScriptBundle) -> Result<String, StorageError> {
    let document: Map<String, Value> = scripts
        .iter()
        .map(|(domain, record)| (domain.clone(), record.to_value()))
        .collect();
    Ok(serde_json::to_string_pretty(&Value::Object(document))?)
}
