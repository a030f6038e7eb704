//! Error types for the commissioner
//!
//! Every variant belongs to one of four failure classes (see [`ErrorKind`]).
//! The class decides what the caller may assume about side effects: a
//! validation or concurrency failure never touched the universe, a sub-task
//! failure left nodes partially updated, and a persistence failure means the
//! nodes changed but the universe record did not.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for commissioner operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Precondition rejected before the lock was taken
    #[error("validation error: {0}")]
    Validation(String),

    /// Caller supplied a stale universe version
    #[error("version conflict for universe {universe}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Universe being locked or saved
        universe: Uuid,
        /// Version the caller expected
        expected: u64,
        /// Version currently persisted
        actual: u64,
    },

    /// Another mutating operation holds the universe lock
    #[error("universe {universe} is already locked by another operation")]
    AlreadyLocked {
        /// Universe being locked
        universe: Uuid,
    },

    /// A sub-operation failed or timed out while the lock was held
    #[error("subtask failure in {group}: {message}")]
    SubTask {
        /// Name of the sub-task group that failed
        group: String,
        /// Triggering error message
        message: String,
    },

    /// The operation was cancelled at a group boundary
    #[error("operation aborted before {group}")]
    Aborted {
        /// First group that did not run
        group: String,
    },

    /// Final commit failed after all phases succeeded
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Universe does not exist in the store
    #[error("universe {universe} not found")]
    NotFound {
        /// Requested universe id
        universe: Uuid,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

/// Failure class of an [`Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any side effect
    Validation,
    /// Lock acquisition failed; retry with fresh state
    Concurrency,
    /// A phase failed after the lock was held
    SubTaskFailure,
    /// Commit failed after node-level changes happened
    Persistence,
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a sub-task failure for the named group
    pub fn subtask(group: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SubTask {
            group: group.into(),
            message: msg.into(),
        }
    }

    /// Create a persistence error with the given message
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::NotFound { .. }
            | Self::Serialization(_)
            | Self::Config(_) => ErrorKind::Validation,
            Self::VersionConflict { .. } | Self::AlreadyLocked { .. } => ErrorKind::Concurrency,
            Self::SubTask { .. } | Self::Aborted { .. } => ErrorKind::SubTaskFailure,
            Self::Persistence(_) => ErrorKind::Persistence,
        }
    }

    /// Returns true if retrying with fresh universe state may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Concurrency
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
