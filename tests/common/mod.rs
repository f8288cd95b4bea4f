#![allow(dead_code)]

use runjs_store::{KeyValueStore, MemoryStore, ScriptRecord, StorageConfig, StorageManager};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// A manager wired to two in-memory stores that tests can inspect and sabotage
pub struct TestStores {
    pub primary: Arc<MemoryStore>,
    pub secondary: Arc<MemoryStore>,
    pub manager: StorageManager,
}

impl TestStores {
    /// Default configuration: 80 KiB chunks, no primary quota
    pub fn new() -> Self {
        Self::build(StorageConfig::default(), MemoryStore::new("sync"))
    }

    /// Tiny chunks so chunked records stay small in tests
    pub fn chunking() -> Self {
        Self::build(small_chunks(), MemoryStore::new("sync"))
    }

    /// Default configuration with a per-item quota on the primary store
    pub fn with_primary_quota(limit: usize) -> Self {
        Self::build(
            StorageConfig::default(),
            MemoryStore::new("sync").with_item_quota(limit),
        )
    }

    fn build(config: StorageConfig, primary: MemoryStore) -> Self {
        init_tracing();
        let primary = Arc::new(primary);
        let secondary = Arc::new(MemoryStore::new("local"));
        let manager = StorageManager::new(
            primary.clone() as Arc<dyn KeyValueStore>,
            secondary.clone() as Arc<dyn KeyValueStore>,
            config,
        );
        Self {
            primary,
            secondary,
            manager,
        }
    }
}

impl Default for TestStores {
    fn default() -> Self {
        Self::new()
    }
}

/// 10-character chunks above a 60-byte serialized size.
///
/// `{"code":"","enabled":true,"library":""}` is 39 bytes, so any code of 22+
/// characters (with an empty library) is chunked.
pub fn small_chunks() -> StorageConfig {
    StorageConfig {
        chunk_size: 10,
        chunk_threshold: 60,
        ..StorageConfig::default()
    }
}

/// Code of exactly `chunks` ten-character chunks
pub fn chunked_code(chunks: usize) -> String {
    (0..chunks * 10)
        .map(|i| char::from(b'a' + (i % 26) as u8))
        .collect()
}

pub fn record(code: &str) -> ScriptRecord {
    ScriptRecord::from_code(code)
}

/// Install a compact subscriber honouring RUST_LOG; repeated calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().compact().with_test_writer())
        .try_init();
}
