//! Storage manager: the only component that reads or writes script records.
//!
//! Records live in the primary (synchronized, small per-item quota) store.
//! Records whose serialized form exceeds the chunk threshold are split into a
//! manifest plus chunk entries. Whenever the primary store fails, or a chunked
//! record cannot be reassembled, the operation is redone against the
//! secondary store, which only ever holds flat records.
//!
//! No public operation returns an error: failures surface as the default
//! record, an empty map or `false`.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backend::{Entries, KeyQuery, KeyValueStore};
use crate::chunk::{ChunkManifest, split};
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::keys::{StorageKey, chunk_key, chunk_keys, classify, record_key};
use crate::record::{ScriptRecord, normalize};

/// Bytes in use per tier; `None` when the store could not report it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StorageUsage {
    pub primary_bytes: Option<u64>,
    pub secondary_bytes: Option<u64>,
}

/// Orchestrates script records across the primary and secondary stores
#[derive(Clone)]
pub struct StorageManager {
    primary: Arc<dyn KeyValueStore>,
    secondary: Arc<dyn KeyValueStore>,
    config: StorageConfig,
}

impl StorageManager {
    pub fn new(
        primary: Arc<dyn KeyValueStore>,
        secondary: Arc<dyn KeyValueStore>,
        config: StorageConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            config,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Load the script for `domain`.
    ///
    /// Returns the default (empty, enabled) record when nothing is stored or
    /// when neither store can produce a usable copy.
    pub async fn get_script(&self, domain: &str) -> ScriptRecord {
        match self.read_primary(domain).await {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "Reading script for {} from {} failed, using {}: {}",
                    domain,
                    self.primary.name(),
                    self.secondary.name(),
                    e
                );
                self.read_secondary(domain).await
            }
        }
    }

    /// Persist `record` for `domain`. Returns `true` if either store accepted it.
    pub async fn save_script(&self, domain: &str, record: &ScriptRecord) -> bool {
        match self.write_primary(domain, record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Saving script for {} to {} failed, using {}: {}",
                    domain,
                    self.primary.name(),
                    self.secondary.name(),
                    e
                );
                self.write_secondary(domain, record).await
            }
        }
    }

    /// Delete the script for `domain`, including any chunk entries.
    ///
    /// Removing a domain that was never saved succeeds.
    pub async fn remove_script(&self, domain: &str) -> bool {
        let key = record_key(domain);
        match self.remove_primary(domain).await {
            Ok(()) => {
                // Keep a stale fallback copy from resurrecting the script later.
                if let Err(e) = self.secondary.remove(vec![key]).await {
                    debug!(
                    "Could not clear {} copy for {}: {}",
                    self.secondary.name(),
                    domain,
                    e
                );
                }
                true
            }
            Err(e) => {
                warn!(
                    "Removing script for {} from {} failed, cleaning {}: {}",
                    domain,
                    self.primary.name(),
                    self.secondary.name(),
                    e
                );
                match self.secondary.remove(vec![key]).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Removing script for {} failed in both stores: {}", domain, e);
                        false
                    }
                }
            }
        }
    }

    /// Every stored script keyed by domain.
    ///
    /// Not a snapshot: saves racing with the enumeration may or may not be
    /// reflected for their domain.
    pub async fn get_all_scripts(&self) -> BTreeMap<String, ScriptRecord> {
        let entries = match self.primary.get(KeyQuery::All).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    "Enumerating {} failed, using {}: {}",
                    self.primary.name(),
                    self.secondary.name(),
                    e
                );
                return self.all_from_secondary().await;
            }
        };

        let domains = record_domains(&entries);
        debug!(
            "Loading {} script(s) from {}",
            domains.len(),
            self.primary.name()
        );

        let records = join_all(domains.iter().map(|domain| self.get_script(domain))).await;
        domains.into_iter().zip(records).collect()
    }

    /// Save every entry of `scripts`.
    ///
    /// Returns `true` only if all saves succeeded. Saves that did succeed are
    /// kept either way, so a failed import can simply be repeated.
    pub async fn import_scripts(&self, scripts: &BTreeMap<String, ScriptRecord>) -> bool {
        let results = join_all(
            scripts
                .iter()
                .map(|(domain, record)| self.save_script(domain, record)),
        )
        .await;

        let failed = results.iter().filter(|ok| !**ok).count();
        if failed > 0 {
            warn!("Import finished with {} of {} save(s) failing", failed, results.len());
            return false;
        }

        info!("Imported {} script(s)", results.len());
        true
    }

    /// Same as [`get_all_scripts`](Self::get_all_scripts)
    pub async fn export_scripts(&self) -> BTreeMap<String, ScriptRecord> {
        self.get_all_scripts().await
    }

    /// Diagnostic byte counts for both stores
    pub async fn usage(&self) -> StorageUsage {
        let (primary, secondary) = futures::join!(
            self.primary.bytes_in_use(None),
            self.secondary.bytes_in_use(None)
        );

        StorageUsage {
            primary_bytes: primary
                .inspect_err(|e| debug!("Primary store usage unavailable: {}", e))
                .ok(),
            secondary_bytes: secondary
                .inspect_err(|e| debug!("Secondary store usage unavailable: {}", e))
                .ok(),
        }
    }

    async fn read_primary(&self, domain: &str) -> Result<ScriptRecord, StorageError> {
        let key = record_key(domain);
        let entries = self.primary.get(KeyQuery::One(key.clone())).await?;

        let Some(raw) = entries.get(&key) else {
            return Ok(ScriptRecord::default());
        };

        match ChunkManifest::parse(domain, raw)? {
            None => Ok(normalize(Some(raw))),
            Some(manifest) => {
                debug!(
                    "Reassembling {} chunk(s) for {}",
                    manifest.chunk_count, domain
                );
                let chunks = self
                    .primary
                    .get(KeyQuery::Many(chunk_keys(domain, manifest.chunk_count)))
                    .await?;
                Ok(manifest.assemble(domain, &chunks)?)
            }
        }
    }

    async fn read_secondary(&self, domain: &str) -> ScriptRecord {
        let key = record_key(domain);
        match self.secondary.get(KeyQuery::One(key.clone())).await {
            Ok(entries) => normalize(entries.get(&key)),
            Err(e) => {
                error!(
                    "Reading script for {} from {} failed: {}",
                    domain,
                    self.secondary.name(),
                    e
                );
                ScriptRecord::default()
            }
        }
    }

    async fn write_primary(&self, domain: &str, record: &ScriptRecord) -> Result<(), StorageError> {
        let key = record_key(domain);
        let previous_chunks = self.stored_chunk_count(domain).await;

        let size = record.serialized_len();
        let written_chunks = if size <= self.config.chunk_threshold || record.code.is_empty() {
            let mut entries = Entries::new();
            entries.insert(key, record.to_value());
            self.primary.set(entries).await?;
            0
        } else {
            // The widest index the split could produce bounds every chunk key.
            let widest_key = chunk_key(domain, record.code.len()).len();
            let chunks = split(&record.code, self.config.chunk_budget(widest_key));
            let chunk_count = chunks.len();
            debug!(
                "Script for {} is {} bytes, writing {} chunk(s)",
                domain, size, chunk_count
            );

            // Chunks first, manifest last: an interrupted save leaves the old
            // manifest (or flat record) in place.
            let chunk_entries: Entries = chunks
                .into_iter()
                .enumerate()
                .map(|(index, chunk)| (chunk_key(domain, index), chunk.into()))
                .collect();
            self.primary.set(chunk_entries).await?;

            let version = chrono::Utc::now().timestamp_millis();
            let mut manifest = Entries::new();
            manifest.insert(key, ChunkManifest::entry(record, chunk_count, version)?);
            self.primary.set(manifest).await?;
            chunk_count
        };

        if previous_chunks > written_chunks {
            let stale: Vec<String> = (written_chunks..previous_chunks)
                .map(|index| chunk_key(domain, index))
                .collect();
            debug!("Removing {} stale chunk(s) for {}", stale.len(), domain);
            if let Err(e) = self.primary.remove(stale).await {
                warn!("Could not remove stale chunks for {}: {}", domain, e);
            }
        }

        Ok(())
    }

    async fn write_secondary(&self, domain: &str, record: &ScriptRecord) -> bool {
        let mut entries = Entries::new();
        entries.insert(record_key(domain), record.to_value());
        match self.secondary.set(entries).await {
            Ok(()) => true,
            Err(e) => {
                error!("Saving script for {} failed in both stores: {}", domain, e);
                false
            }
        }
    }

    /// Chunk count of the manifest currently stored for `domain`, 0 if flat or unreadable
    async fn stored_chunk_count(&self, domain: &str) -> usize {
        let key = record_key(domain);
        match self.primary.get(KeyQuery::One(key.clone())).await {
            Ok(entries) => entries
                .get(&key)
                .and_then(|raw| ChunkManifest::parse(domain, raw).ok().flatten())
                .map(|manifest| manifest.chunk_count)
                .unwrap_or(0),
            Err(e) => {
                debug!("Could not inspect existing entry for {}: {}", domain, e);
                0
            }
        }
    }

    async fn remove_primary(&self, domain: &str) -> Result<(), StorageError> {
        let key = record_key(domain);
        let entries = self.primary.get(KeyQuery::One(key.clone())).await?;

        let mut keys = vec![key.clone()];
        if let Some(raw) = entries.get(&key) {
            match ChunkManifest::parse(domain, raw) {
                Ok(Some(manifest)) => keys.extend(chunk_keys(domain, manifest.chunk_count)),
                Ok(None) => {}
                Err(e) => {
                    // The manifest cannot tell us which chunks exist; find them.
                    warn!("{}; scanning for chunk entries of {}", e, domain);
                    keys.extend(self.orphan_chunk_keys(domain).await?);
                }
            }
        }

        debug!("Removing {} key(s) for {}", keys.len(), domain);
        self.primary.remove(keys).await?;
        Ok(())
    }

    async fn orphan_chunk_keys(&self, domain: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.primary.get(KeyQuery::All).await?;
        Ok(entries
            .keys()
            .filter(|key| {
                matches!(classify(key), StorageKey::Chunk { domain: ref d, .. } if d == domain)
            })
            .cloned()
            .collect())
    }

    async fn all_from_secondary(&self) -> BTreeMap<String, ScriptRecord> {
        match self.secondary.get(KeyQuery::All).await {
            Ok(entries) => record_domains(&entries)
                .into_iter()
                .map(|domain| {
                    let record = normalize(entries.get(&record_key(&domain)));
                    (domain, record)
                })
                .collect(),
            Err(e) => {
                error!("Enumerating {} failed: {}", self.secondary.name(), e);
                BTreeMap::new()
            }
        }
    }
}

/// Domains of all top-level record keys, skipping chunk entries and foreign keys
fn record_domains(entries: &Entries) -> Vec<String> {
    entries
        .keys()
        .filter_map(|key| match classify(key) {
            StorageKey::Record(domain) if !domain.is_empty() => Some(domain),
            _ => None,
        })
        .collect()
}
