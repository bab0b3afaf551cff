//! Error types for shardlog core.

use crate::types::NodeId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in shardlog core operations.
///
/// Lock timeouts and missing data are not errors: `write` reports them as
/// `Ok(false)` and `read` as `Ok(None)`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage or container error.
    #[error("storage error: {0}")]
    Storage(#[from] shardlog_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The ring has no nodes, so a group cannot be placed.
    #[error("hash ring is empty: no node can own group {group:?}")]
    EmptyRing {
        /// The group that could not be placed.
        group: String,
    },

    /// No gap on the ring is wide enough to hold another node.
    #[error("hash ring is full: no free position between existing nodes")]
    RingFull,

    /// The node is not a member of the ring.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// The storage directory is missing or unusable.
    #[error("invalid storage directory: {message}")]
    InvalidDirectory {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an empty ring error for `group`.
    pub fn empty_ring(group: impl Into<String>) -> Self {
        Self::EmptyRing {
            group: group.into(),
        }
    }

    /// Creates an invalid directory error.
    pub fn invalid_directory(message: impl Into<String>) -> Self {
        Self::InvalidDirectory {
            message: message.into(),
        }
    }
}
