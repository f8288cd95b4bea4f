//! Storage key naming. The scheme is shared with data already persisted by
//! earlier releases and must not change.

pub const KEY_PREFIX: &str = "runjavascript_";
pub const CHUNK_INFIX: &str = "_chunk_";

/// What a raw storage key refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageKey {
    /// Top-level record or chunk manifest for a domain
    Record(String),
    /// One slice of a chunked record's code
    Chunk { domain: String, index: usize },
    /// Not ours
    Foreign,
}

pub fn record_key(domain: &str) -> String {
    format!("{}{}", KEY_PREFIX, domain)
}

pub fn chunk_key(domain: &str, index: usize) -> String {
    format!("{}{}{}{}", KEY_PREFIX, domain, CHUNK_INFIX, index)
}

/// Keys of chunks `0..count`
pub fn chunk_keys(domain: &str, count: usize) -> Vec<String> {
    (0..count).map(|index| chunk_key(domain, index)).collect()
}

/// Classify a raw key found while enumerating a store
pub fn classify(key: &str) -> StorageKey {
    let Some(rest) = key.strip_prefix(KEY_PREFIX) else {
        return StorageKey::Foreign;
    };

    if let Some((domain, index)) = rest.rsplit_once(CHUNK_INFIX) {
        if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = index.parse() {
                return StorageKey::Chunk {
                    domain: domain.to_string(),
                    index,
                };
            }
        }
    }

    StorageKey::Record(rest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(record_key("example.com"), "runjavascript_example.com");
        assert_eq!(chunk_key("example.com", 0), "runjavascript_example.com_chunk_0");
        assert_eq!(chunk_key("example.com", 12), "runjavascript_example.com_chunk_12");
    }

    #[test]
    fn test_chunk_keys() {
        assert_eq!(
            chunk_keys("a.com", 3),
            vec![
                "runjavascript_a.com_chunk_0",
                "runjavascript_a.com_chunk_1",
                "runjavascript_a.com_chunk_2",
            ]
        );
        assert!(chunk_keys("a.com", 0).is_empty());
    }

    #[test]
    fn test_classify() {
        assert_eq!(
            classify("runjavascript_a.com"),
            StorageKey::Record("a.com".to_string())
        );
        assert_eq!(
            classify("runjavascript_a.com_chunk_7"),
            StorageKey::Chunk {
                domain: "a.com".to_string(),
                index: 7
            }
        );
        assert_eq!(classify("settings"), StorageKey::Foreign);
    }

    #[test]
    fn test_classify_requires_numeric_index() {
        assert_eq!(
            classify("runjavascript_my_chunk_site.com"),
            StorageKey::Record("my_chunk_site.com".to_string())
        );
        assert_eq!(
            classify("runjavascript_a.com_chunk_"),
            StorageKey::Record("a.com_chunk_".to_string())
        );
    }
}
