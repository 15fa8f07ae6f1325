//! Error types for the reconciliation engine.

use crate::instance::Instance;
use crmsync_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while configuring or running the engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Error reported by either store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A mapping definition is invalid.
    #[error("invalid mapping between {local_type} and {remote_type}: {message}")]
    InvalidMapping {
        /// Local table of the mapping.
        local_type: String,
        /// Remote object type of the mapping.
        remote_type: String,
        /// What is wrong.
        message: String,
    },

    /// No mapping is registered for a type.
    #[error("no mapping registered for {0}")]
    UnknownMapping(String),

    /// A mapping refers to an association it does not declare.
    #[error("{local_type} has no association named {name}")]
    UnknownAssociation {
        /// Local table of the mapping.
        local_type: String,
        /// Association name.
        name: String,
    },

    /// Reading or writing one record failed.
    #[error("failed to synchronize {record_type} {record_id} ({local_type} <-> {remote_type}): {source}")]
    Synchronization {
        /// Local table of the mapping.
        local_type: String,
        /// Remote object type of the mapping.
        remote_type: String,
        /// Table or object type of the failing record.
        record_type: String,
        /// Identifier of the failing record.
        record_id: String,
        /// Underlying failure.
        #[source]
        source: Box<SyncError>,
    },

    /// The last-run tracker could not be read or written.
    #[error("tracker error: {0}")]
    Tracker(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A cycle died without completing.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl SyncError {
    /// Creates an invalid mapping error.
    pub fn invalid_mapping(
        local_type: impl Into<String>,
        remote_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidMapping {
            local_type: local_type.into(),
            remote_type: remote_type.into(),
            message: message.into(),
        }
    }

    /// Wraps an error with the identity of the record it happened on.
    pub fn for_record(instance: &dyn Instance, error: impl Into<SyncError>) -> Self {
        let mapping = instance.mapping();
        let key = instance.key();
        Self::Synchronization {
            local_type: mapping.local_type().to_owned(),
            remote_type: mapping.remote_type().to_owned(),
            record_type: key.record_type,
            record_id: key.id,
            source: Box::new(error.into()),
        }
    }

    /// Returns true for configuration problems, which should stop startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidMapping { .. }
                | SyncError::UnknownMapping(_)
                | SyncError::UnknownAssociation { .. }
        )
    }
}
