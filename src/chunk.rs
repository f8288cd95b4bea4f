//! Splitting oversized code into quota-sized chunks and putting it back together.
//!
//! A chunked record is stored as a manifest under the record key plus
//! `chunkCount` string entries under the derived chunk keys.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::ChunkError;
use crate::keys::{chunk_key, record_key};
use crate::record::{ScriptRecord, normalize};

const BOOKKEEPING_FIELDS: [&str; 4] = ["isChunked", "chunkCount", "size", "version"];

/// Bytes `ch` occupies inside a compact JSON string literal
pub fn encoded_len(ch: char) -> usize {
    match ch {
        '"' | '\\' | '\n' | '\r' | '\t' | '\u{08}' | '\u{0c}' => 2,
        c if (c as u32) < 0x20 => 6,
        c => c.len_utf8(),
    }
}

/// Split `code` on character boundaries into slices whose JSON-escaped form
/// (without the surrounding quotes) is at most `max_bytes`.
///
/// A single character wider than `max_bytes` still gets a chunk of its own.
pub fn split(code: &str, max_bytes: usize) -> Vec<String> {
    let mut chunks = Vec::with_capacity(code.len() / max_bytes.max(1) + 1);
    let mut start = 0;
    let mut used = 0;

    for (offset, ch) in code.char_indices() {
        let len = encoded_len(ch);
        if used + len > max_bytes && offset > start {
            chunks.push(code[start..offset].to_string());
            start = offset;
            used = 0;
        }
        used += len;
    }
    if start < code.len() {
        chunks.push(code[start..].to_string());
    }

    chunks
}

/// Concatenate chunks in order.
pub fn join<S: AsRef<str>>(chunks: &[S]) -> String {
    let total = chunks.iter().map(|c| AsRef::<str>::as_ref(c).len()).sum();
    let mut code = String::with_capacity(total);
    for chunk in chunks {
        code.push_str(chunk.as_ref());
    }
    code
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry<'a> {
    enabled: bool,
    library: &'a str,
    is_chunked: bool,
    chunk_count: usize,
    size: usize,
    version: i64,
}

/// Metadata entry of a chunked record
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkManifest {
    pub chunk_count: usize,
    /// Original code length in characters
    pub size: Option<usize>,
    /// Write timestamp in Unix milliseconds; informational only
    pub version: Option<i64>,
    fields: Map<String, Value>,
}

impl ChunkManifest {
    /// Manifest value for `record` split into `chunk_count` chunks
    pub fn entry(
        record: &ScriptRecord,
        chunk_count: usize,
        version: i64,
    ) -> Result<Value, serde_json::Error> {
        serde_json::to_value(ManifestEntry {
            enabled: record.enabled,
            library: &record.library,
            is_chunked: true,
            chunk_count,
            size: record.code.chars().count(),
            version,
        })
    }

    /// Read a manifest out of a raw record-key value.
    ///
    /// Returns `Ok(None)` for anything that is not marked `isChunked: true`.
    pub fn parse(domain: &str, raw: &Value) -> Result<Option<Self>, ChunkError> {
        let Some(fields) = raw.as_object() else {
            return Ok(None);
        };
        if fields.get("isChunked") != Some(&Value::Bool(true)) {
            return Ok(None);
        }

        let chunk_count = fields
            .get("chunkCount")
            .and_then(Value::as_u64)
            .filter(|count| *count > 0)
            .and_then(|count| usize::try_from(count).ok())
            .ok_or_else(|| ChunkError::InvalidCount {
                key: record_key(domain),
            })?;

        let size = fields
            .get("size")
            .and_then(Value::as_u64)
            .and_then(|size| usize::try_from(size).ok());
        let version = fields.get("version").and_then(Value::as_i64);

        let mut fields = fields.clone();
        for name in BOOKKEEPING_FIELDS {
            fields.remove(name);
        }

        Ok(Some(Self {
            chunk_count,
            size,
            version,
            fields,
        }))
    }

    /// Rebuild the record from the chunk entries fetched for `domain`.
    ///
    /// Every chunk `0..chunk_count` must be present and hold a string; the
    /// joined code must match `size` when the manifest carries one.
    pub fn assemble(
        &self,
        domain: &str,
        chunks: &BTreeMap<String, Value>,
    ) -> Result<ScriptRecord, ChunkError> {
        let mut parts = Vec::with_capacity(self.chunk_count);
        for index in 0..self.chunk_count {
            match chunks.get(&chunk_key(domain, index)).and_then(Value::as_str) {
                Some(part) => parts.push(part),
                None => {
                    return Err(ChunkError::MissingChunk {
                        key: record_key(domain),
                        index,
                    });
                }
            }
        }

        let code = join(&parts);
        if let Some(expected) = self.size {
            let actual = code.chars().count();
            if actual != expected {
                return Err(ChunkError::SizeMismatch {
                    key: record_key(domain),
                    expected,
                    actual,
                });
            }
        }

        let mut fields = self.fields.clone();
        fields.insert("code".to_string(), Value::String(code));
        Ok(normalize(Some(&Value::Object(fields))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::serialized_len;
    use serde_json::json;

    #[test]
    fn test_split_100k_into_two() {
        let code = "a".repeat(102_400);
        let chunks = split(&code, 81_920);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 81_920);
        assert_eq!(chunks[1].len(), 20_480);
    }

    #[test]
    fn test_split_exact_multiple() {
        let chunks = split("abcdef", 3);
        assert_eq!(chunks, vec!["abc", "def"]);
    }

    #[test]
    fn test_split_empty() {
        assert!(split("", 10).is_empty());
        assert!(split("", 1).is_empty());
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let code = "héllo wörld ✓🎉";
        let chunks = split(code, 4);
        assert!(chunks.iter().all(|c| c.len() <= 4));
        assert!(chunks.contains(&"🎉".to_string()));
        assert_eq!(join(&chunks), code);
    }

    #[test]
    fn test_split_counts_multibyte_as_bytes() {
        let code = "中".repeat(300_000);
        let chunks = split(&code, 81_920);
        // 27,306 three-byte characters fit in 81,920 bytes
        assert_eq!(chunks[0].chars().count(), 27_306);
        assert_eq!(chunks.len(), 300_000usize.div_ceil(27_306));
        assert!(chunks.iter().all(|c| c.len() <= 81_920));
        assert_eq!(join(&chunks), code);
    }

    #[test]
    fn test_split_counts_escapes() {
        let code = "\"".repeat(150_000);
        let chunks = split(&code, 81_920);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 40_960);
        for chunk in &chunks {
            assert!(serialized_len(&Value::String(chunk.clone())) <= 81_920 + 2);
        }
    }

    #[test]
    fn test_encoded_len_matches_serde_json() {
        let code = "a\"\\\n\r\t\u{08}\u{0c}\u{01}\u{1f}\u{7f}é✓🎉中/<>";
        let counted: usize = code.chars().map(encoded_len).sum();
        assert_eq!(counted + 2, serialized_len(&Value::String(code.to_string())));
    }

    #[test]
    fn test_zero_budget_gives_one_char_per_chunk() {
        assert_eq!(split("a中🎉", 0), vec!["a", "中", "🎉"]);
    }

    #[test]
    fn test_join_round_trip() {
        let code: String = (0..1000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        for size in [1, 7, 26, 999, 1000, 5000] {
            assert_eq!(join(&split(&code, size)), code);
        }
    }

    #[test]
    fn test_manifest_entry_shape() {
        let record = ScriptRecord::new("abcdef", false, "jquery_3_3_1");
        let value = ChunkManifest::entry(&record, 2, 1_700_000_000_000).unwrap();
        assert_eq!(
            value,
            json!({
                "enabled": false,
                "library": "jquery_3_3_1",
                "isChunked": true,
                "chunkCount": 2,
                "size": 6,
                "version": 1_700_000_000_000i64,
            })
        );
        assert!(value.get("code").is_none());
    }

    #[test]
    fn test_parse_ignores_flat_values() {
        assert_eq!(ChunkManifest::parse("a.com", &json!("code")), Ok(None));
        assert_eq!(
            ChunkManifest::parse("a.com", &json!({ "code": "x", "enabled": true })),
            Ok(None)
        );
        assert_eq!(
            ChunkManifest::parse("a.com", &json!({ "isChunked": false, "chunkCount": 2 })),
            Ok(None)
        );
    }

    #[test]
    fn test_parse_rejects_bad_count() {
        for raw in [
            json!({ "isChunked": true }),
            json!({ "isChunked": true, "chunkCount": 0 }),
            json!({ "isChunked": true, "chunkCount": "3" }),
            json!({ "isChunked": true, "chunkCount": -1 }),
        ] {
            assert_eq!(
                ChunkManifest::parse("a.com", &raw),
                Err(ChunkError::InvalidCount {
                    key: "runjavascript_a.com".to_string()
                })
            );
        }
    }

    #[test]
    fn test_assemble() {
        let record = ScriptRecord::new("abcdefgh", true, "lib");
        let manifest_value = ChunkManifest::entry(&record, 3, 1).unwrap();
        let manifest = ChunkManifest::parse("a.com", &manifest_value).unwrap().unwrap();

        let mut chunks = BTreeMap::new();
        for (index, part) in split(&record.code, 3).into_iter().enumerate() {
            chunks.insert(chunk_key("a.com", index), Value::String(part));
        }

        assert_eq!(manifest.assemble("a.com", &chunks), Ok(record));
    }

    #[test]
    fn test_assemble_missing_chunk() {
        let manifest = ChunkManifest::parse(
            "a.com",
            &json!({ "isChunked": true, "chunkCount": 3, "enabled": true, "library": "" }),
        )
        .unwrap()
        .unwrap();

        let mut chunks = BTreeMap::new();
        chunks.insert(chunk_key("a.com", 0), json!("abc"));
        chunks.insert(chunk_key("a.com", 2), json!("ghi"));

        assert_eq!(
            manifest.assemble("a.com", &chunks),
            Err(ChunkError::MissingChunk {
                key: "runjavascript_a.com".to_string(),
                index: 1
            })
        );
    }

    #[test]
    fn test_assemble_size_mismatch() {
        let manifest = ChunkManifest::parse(
            "a.com",
            &json!({ "isChunked": true, "chunkCount": 1, "size": 10 }),
        )
        .unwrap()
        .unwrap();

        let mut chunks = BTreeMap::new();
        chunks.insert(chunk_key("a.com", 0), json!("short"));

        assert!(matches!(
            manifest.assemble("a.com", &chunks),
            Err(ChunkError::SizeMismatch {
                expected: 10,
                actual: 5,
                ..
            })
        ));
    }

    #[test]
    fn test_assemble_keeps_legacy_enabled_string() {
        let manifest = ChunkManifest::parse(
            "a.com",
            &json!({ "isChunked": true, "chunkCount": 1, "enabled": "false" }),
        )
        .unwrap()
        .unwrap();

        let mut chunks = BTreeMap::new();
        chunks.insert(chunk_key("a.com", 0), json!("x"));

        let record = manifest.assemble("a.com", &chunks).unwrap();
        assert_eq!(record, ScriptRecord::new("x", false, ""));
    }
}
