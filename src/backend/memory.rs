use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::{Entries, KeyQuery, KeyValueStore, check_quota, sum_bytes};
use crate::error::{StoreError, StoreOperation};

/// In-process store with an optional per-item quota and injectable failures.
///
/// Used as the primary/secondary tier in tests and wherever a volatile store
/// is good enough.
pub struct MemoryStore {
    name: String,
    item_quota: Option<usize>,
    entries: Mutex<Entries>,
    failures: Mutex<HashSet<(StoreOperation, Option<String>)>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            item_quota: None,
            entries: Mutex::new(Entries::new()),
            failures: Mutex::new(HashSet::new()),
        }
    }

    /// Reject writes of any item larger than `limit` bytes
    pub fn with_item_quota(mut self, limit: usize) -> Self {
        self.item_quota = Some(limit);
        self
    }

    /// Make every call of `operation` fail
    pub fn fail_all(&self, operation: StoreOperation) {
        lock(&self.failures).insert((operation, None));
    }

    /// Make `operation` fail whenever it touches `key`
    pub fn fail_key(&self, operation: StoreOperation, key: impl Into<String>) {
        lock(&self.failures).insert((operation, Some(key.into())));
    }

    /// Clear all injected failures
    pub fn heal(&self) {
        lock(&self.failures).clear();
    }

    /// Write a raw value, bypassing quota and failure injection
    pub fn insert_raw(&self, key: impl Into<String>, value: Value) {
        lock(&self.entries).insert(key.into(), value);
    }

    /// Delete a raw value, bypassing failure injection
    pub fn remove_raw(&self, key: &str) -> Option<Value> {
        lock(&self.entries).remove(key)
    }

    pub fn get_raw(&self, key: &str) -> Option<Value> {
        lock(&self.entries).get(key).cloned()
    }

    /// Copy of every entry currently stored
    pub fn snapshot(&self) -> Entries {
        lock(&self.entries).clone()
    }

    pub fn keys(&self) -> Vec<String> {
        lock(&self.entries).keys().cloned().collect()
    }

    fn check_failure<'a>(
        &self,
        operation: StoreOperation,
        mut keys: impl Iterator<Item = &'a String>,
    ) -> Result<(), StoreError> {
        let failures = lock(&self.failures);
        if failures.contains(&(operation, None)) {
            return Err(StoreError::transport(
                &self.name,
                operation,
                "injected failure",
            ));
        }
        if let Some(key) = keys.find(|key| failures.contains(&(operation, Some((*key).clone())))) {
            return Err(StoreError::transport(
                &self.name,
                operation,
                format!("injected failure for {}", key),
            ));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, query: KeyQuery) -> Result<Entries, StoreError> {
        let named: Vec<String> = match &query {
            KeyQuery::One(key) => vec![key.clone()],
            KeyQuery::Many(keys) => keys.clone(),
            KeyQuery::All => Vec::new(),
        };
        self.check_failure(StoreOperation::Get, named.iter())?;

        let entries = lock(&self.entries);
        let result: Entries = match query {
            KeyQuery::All => entries.clone(),
            _ => named
                .into_iter()
                .filter_map(|key| entries.get(&key).cloned().map(|value| (key, value)))
                .collect(),
        };
        Ok(result)
    }

    async fn set(&self, items: Entries) -> Result<(), StoreError> {
        self.check_failure(StoreOperation::Set, items.keys())?;
        check_quota(&items, self.item_quota)?;

        debug!("{}: writing {} item(s)", self.name, items.len());
        lock(&self.entries).extend(items);
        Ok(())
    }

    async fn remove(&self, keys: Vec<String>) -> Result<(), StoreError> {
        self.check_failure(StoreOperation::Remove, keys.iter())?;

        let mut entries = lock(&self.entries);
        for key in &keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn bytes_in_use(&self, key: Option<String>) -> Result<u64, StoreError> {
        self.check_failure(StoreOperation::BytesInUse, key.iter())?;
        Ok(sum_bytes(lock(&self.entries).iter(), key.as_deref()))
    }
}
