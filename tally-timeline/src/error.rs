// tally-timeline: Error types

use thiserror::Error;

use tally_core::error::{IntervalError, StorageError};

/// Timeline result type
pub type TimelineResult<T> = Result<T, TimelineError>;

/// Timeline merge error types
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("object {objkey}: duplicate slot {key}")]
    DuplicateSlot { objkey: String, key: String },

    #[error("object {objkey}: slot {key} partially overlaps {other}")]
    Overlap {
        objkey: String,
        key: String,
        other: String,
    },

    #[error("object {objkey}: sanity check failed: {reason}")]
    Sanity { objkey: String, reason: String },

    #[error("unknown pattern: {0}")]
    UnknownPattern(String),

    #[error(transparent)]
    Interval(#[from] IntervalError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("dump failed: {0}")]
    Io(#[from] std::io::Error),
}
