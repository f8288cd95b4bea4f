use thiserror::Error;

/// The kind of backing-store call that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Get,
    Set,
    Remove,
    BytesInUse,
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StoreOperation::Get => "get",
            StoreOperation::Set => "set",
            StoreOperation::Remove => "remove",
            StoreOperation::BytesInUse => "bytesInUse",
        };
        f.write_str(name)
    }
}

/// Errors reported by a backing key/value store.
///
/// These correspond to the out-of-band error signal a store raises alongside
/// an otherwise completed call. The storage manager recovers from all of them
/// locally; they never reach its callers.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{store} {operation} failed: {message}")]
    Transport {
        store: String,
        operation: StoreOperation,
        message: String,
    },

    #[error("Item {key} is {size} bytes, exceeding the per-item quota of {limit} bytes")]
    QuotaExceeded { key: String, size: usize, limit: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Create a transport error for the given store and operation
    pub fn transport(
        store: impl Into<String>,
        operation: StoreOperation,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            store: store.into(),
            operation,
            message: message.into(),
        }
    }
}

/// Errors raised while decoding chunked records
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Chunk manifest for {key} has an invalid chunkCount")]
    InvalidCount { key: String },

    #[error("Chunk {index} of {key} is missing")]
    MissingChunk { key: String, index: usize },

    #[error("Reassembled code for {key} is {actual} characters, manifest says {expected}")]
    SizeMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },
}

/// Crate-level error type
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error("Invalid script bundle: {message}")]
    InvalidBundle { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Create a bundle validation error
    pub fn invalid_bundle(message: impl Into<String>) -> Self {
        Self::InvalidBundle {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the failure came from the backing store rather than the data
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            StorageError::Store(StoreError::Transport { .. } | StoreError::Io(_))
        )
    }
}

impl From<figment::Error> for StorageError {
    fn from(err: figment::Error) -> Self {
        Self::config(err.to_string())
    }
}
