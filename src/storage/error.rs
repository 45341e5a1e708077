//! Error types for storage operations

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database connection failed
    #[error("failed to connect to storage backend: {0}")]
    ConnectionFailed(String),

    /// Database query failed
    #[error("storage query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("database migration failed: {0}")]
    MigrationFailed(String),

    /// A record addressed by id does not exist
    #[error("record not found: {0}")]
    NotFound(String),

    /// I/O error (file access, etc.)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::IoError(io_err),
            sqlx::Error::RowNotFound => StorageError::NotFound("no rows found".to_string()),
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::MigrationFailed(err.to_string())
    }
}
