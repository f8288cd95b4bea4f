//! Per-domain user script storage on top of a small-quota synchronized store,
//! with transparent chunking of large scripts and fallback to a larger local
//! store.
//!
//! Consumers go through [`StorageManager`]: `get_script`, `save_script`,
//! `remove_script`, `get_all_scripts`, `import_scripts` and `export_scripts`.

pub mod backend;
pub mod chunk;
pub mod config;
pub mod error;
pub mod execution;
pub mod hostname;
pub mod keys;
pub mod manager;
pub mod record;
pub mod transfer;

pub use backend::{Entries, JsonFileStore, KeyQuery, KeyValueStore, MemoryStore};
pub use config::StorageConfig;
pub use error::{ChunkError, StorageError, StoreError, StoreOperation};
pub use execution::{ExecutionPlan, ExecutionTracker, plan_execution, plan_manual_execution};
pub use hostname::extract_hostname;
pub use manager::{StorageManager, StorageUsage};
pub use record::{ScriptRecord, normalize};
pub use transfer::ScriptBundle;
