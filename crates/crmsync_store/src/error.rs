//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing either store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The local table does not exist.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// The remote object type does not exist.
    #[error("unknown object type: {0}")]
    UnknownObject(String),

    /// A local row was not found.
    #[error("row {id} not found in {table}")]
    RowNotFound {
        /// Table searched.
        table: String,
        /// Primary key that was not found.
        id: i64,
    },

    /// A remote record was not found.
    #[error("record {id} not found in {object}")]
    RecordNotFound {
        /// Object type searched.
        object: String,
        /// Remote id that was not found.
        id: String,
    },

    /// A write named a column the table does not have.
    #[error("unknown column {column} on {table}")]
    UnknownColumn {
        /// Table written.
        table: String,
        /// Offending column.
        column: String,
    },

    /// The store refused a write.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A snapshot could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::RowNotFound {
            table: "users".into(),
            id: 7,
        };
        assert_eq!(err.to_string(), "row 7 not found in users");

        let err = StoreError::validation("name can't be blank");
        assert_eq!(err.to_string(), "validation failed: name can't be blank");
    }
}
