// tally-core: Error types

use thiserror::Error;

/// Cache result type
pub type CacheResult<T> = Result<T, CacheError>;

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;

/// Engine error types
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("request decode error: {0}")]
    Decode(String),

    #[error("response encode error: {0}")]
    Encode(String),

    #[error("unknown site: {0}")]
    UnknownSite(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no such directory: {0}")]
    NoDirectory(String),

    #[error("writer failed: {0}")]
    Writer(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Interval(#[from] IntervalError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interval key and configuration errors
#[derive(Debug, Clone, Error)]
pub enum IntervalError {
    #[error("bad interval key: {0}")]
    BadKey(String),

    #[error("unknown interval module: {0}")]
    UnknownModule(String),
}

/// Model plugin errors
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("no model configured for object type {0:?}")]
    UnconfiguredType(char),

    #[error("incompatible object types: {0}")]
    IncompatibleTypes(String),

    #[error("model mismatch for object {objkey}: expected {expected}, found {actual}")]
    TypeMismatch {
        objkey: String,
        expected: String,
        actual: String,
    },

    #[error("bad parameters: {0}")]
    BadParams(String),
}

/// Snapshot record errors
#[derive(Debug, Clone, Error)]
pub enum BackupError {
    #[error("unsupported cache backup version: {0}")]
    UnsupportedVersion(u32),

    #[error("malformed cache backup: {0}")]
    Malformed(String),

    #[error("backup decode error: {0}")]
    Decode(String),

    #[error("backup file error: {0}")]
    Io(String),
}

/// Storage driver errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage decode error: {0}")]
    Decode(String),
}
