use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{Entries, KeyQuery, KeyValueStore, check_quota, sum_bytes};
use crate::error::StoreError;

/// Store persisted as a single JSON object on disk.
///
/// Writes are serialized within the process and land via a temporary file
/// plus rename, so readers never observe a half-written file.
pub struct JsonFileStore {
    name: String,
    path: PathBuf,
    item_quota: Option<usize>,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            item_quota: None,
            lock: Mutex::new(()),
        }
    }

    /// Reject writes of any item larger than `limit` bytes
    pub fn with_item_quota(mut self, limit: usize) -> Self {
        self.item_quota = Some(limit);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Entries, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) if text.trim().is_empty() => Ok(Entries::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{}: {} does not exist yet", self.name, self.path.display());
                Ok(Entries::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn persist(&self, entries: &Entries) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let text = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&tmp, text).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            warn!("{}: failed to replace {}: {}", self.name, self.path.display(), e);
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, query: KeyQuery) -> Result<Entries, StoreError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if query != KeyQuery::All {
            entries.retain(|key, _| query.matches(key));
        }
        Ok(entries)
    }

    async fn set(&self, items: Entries) -> Result<(), StoreError> {
        check_quota(&items, self.item_quota)?;

        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.extend(items);
        self.persist(&entries).await
    }

    async fn remove(&self, keys: Vec<String>) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        let before = entries.len();
        for key in &keys {
            entries.remove(key);
        }
        if entries.len() == before {
            return Ok(());
        }
        self.persist(&entries).await
    }

    async fn bytes_in_use(&self, key: Option<String>) -> Result<u64, StoreError> {
        let _guard = self.lock.lock().await;
        let entries = self.load().await?;
        Ok(sum_bytes(entries.iter(), key.as_deref()))
    }
}
