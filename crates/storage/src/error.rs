//! Error type for storage operations.

/// Failure of a storage operation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to read directory {path}: {source}")]
    ReadDir {
        path: String,
        source: std::io::Error,
    },

    #[error("file too large: {size_mb} MB (max: {max_mb} MB)")]
    FileTooLarge { size_mb: u64, max_mb: u64 },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("unknown retention policy: {0} (expected keep or delete_after_download)")]
    UnknownRetentionPolicy(String),
}

impl StorageError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
