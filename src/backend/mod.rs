//! Backing key/value stores.
//!
//! Both tiers implement [`KeyValueStore`]. The browser API reports failures
//! through a side channel after its callback has already fired; here every
//! call simply resolves to a `Result`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::record::serialized_len;

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Raw entries as read from or written to a store
pub type Entries = BTreeMap<String, Value>;

/// Key selector for [`KeyValueStore::get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyQuery {
    One(String),
    Many(Vec<String>),
    /// Every entry in the store
    All,
}

impl KeyQuery {
    /// Whether `key` is selected by this query
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyQuery::One(k) => k == key,
            KeyQuery::Many(keys) => keys.iter().any(|k| k == key),
            KeyQuery::All => true,
        }
    }
}

/// Asynchronous key/value store contract shared by the primary and secondary tiers
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Label used in log lines
    fn name(&self) -> &str {
        "store"
    }

    /// Fetch the selected entries. Keys that do not exist are absent from the result.
    async fn get(&self, query: KeyQuery) -> Result<Entries, StoreError>;

    /// Write all entries
    async fn set(&self, entries: Entries) -> Result<(), StoreError>;

    /// Delete the given keys; unknown keys are ignored
    async fn remove(&self, keys: Vec<String>) -> Result<(), StoreError>;

    /// Bytes used by one key, or by the whole store when `key` is `None`
    async fn bytes_in_use(&self, key: Option<String>) -> Result<u64, StoreError>;
}

/// Quota accounting for one item: key bytes plus compact JSON value bytes
pub fn item_size(key: &str, value: &Value) -> usize {
    key.len() + serialized_len(value)
}

/// Reject the first entry larger than `limit`
pub(crate) fn check_quota(entries: &Entries, limit: Option<usize>) -> Result<(), StoreError> {
    let Some(limit) = limit else {
        return Ok(());
    };
    for (key, value) in entries {
        let size = item_size(key, value);
        if size > limit {
            return Err(StoreError::QuotaExceeded {
                key: key.clone(),
                size,
                limit,
            });
        }
    }
    Ok(())
}

pub(crate) fn sum_bytes<'a>(
    entries: impl IntoIterator<Item = (&'a String, &'a Value)>,
    key: Option<&str>,
) -> u64 {
    entries
        .into_iter()
        .filter(|(k, _)| key.is_none_or(|wanted| wanted == k.as_str()))
        .map(|(k, v)| item_size(k, v) as u64)
        .sum()
}
