//! Error types for tsmeta
//!
//! This module defines the common error type shared by the row storage core,
//! the node directory and the operator tooling.

use thiserror::Error;

/// Common result type for tsmeta operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for tsmeta
#[derive(Debug, Error)]
pub enum Error {
    // Row storage errors
    #[error("row not found in table '{table}': {key}")]
    NotFound { table: String, key: String },

    #[error("row already exists in table '{table}': {key}")]
    AlreadyExists { table: String, key: String },

    #[error("out of row slots in table '{table}' (capacity {capacity})")]
    OutOfMemory { table: String, capacity: usize },

    #[error("table {table_id} ('{name}') is already open")]
    TableAlreadyOpen { table_id: u32, name: String },

    #[error("row image for table '{table}' is {size} bytes, max {max}")]
    RowTooLarge {
        table: String,
        size: usize,
        max: usize,
    },

    #[error("key type mismatch for table '{table}'")]
    KeyTypeMismatch { table: String },

    // Replication errors
    #[error("replication failure: {0}")]
    ReplicationFailure(String),

    #[error("data corruption detected: {0}")]
    DataCorruption(String),

    // Directory errors
    #[error("dependency missing: {0}")]
    DependencyMissing(String),

    // Access errors
    #[error("permission denied")]
    PermissionDenied,

    #[error("user not found for connection")]
    UserNotFound,

    // Generic errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a replication failure
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::ReplicationFailure(msg.into())
    }

    /// Create a not found error for a table row
    pub fn not_found(table: impl Into<String>, key: impl ToString) -> Self {
        Self::NotFound {
            table: table.into(),
            key: key.to_string(),
        }
    }

    /// Create an already exists error for a table row
    pub fn already_exists(table: impl Into<String>, key: impl ToString) -> Self {
        Self::AlreadyExists {
            table: table.into(),
            key: key.to_string(),
        }
    }

    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ReplicationFailure(_))
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::UserNotFound)
    }

    /// Stable numeric code reported to operator tooling
    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            // 0x01xx generic
            Self::Io(_) => 0x0101,
            Self::Serialization(_) => 0x0102,
            Self::Deserialization(_) => 0x0103,
            Self::Configuration(_) => 0x0104,
            Self::InvalidArgument(_) => 0x0105,
            Self::Internal(_) => 0x0106,

            // 0x03xx row storage
            Self::NotFound { .. } => 0x0301,
            Self::AlreadyExists { .. } => 0x0302,
            Self::OutOfMemory { .. } => 0x0303,
            Self::ReplicationFailure(_) => 0x0304,
            Self::TableAlreadyOpen { .. } => 0x0305,
            Self::RowTooLarge { .. } => 0x0306,
            Self::KeyTypeMismatch { .. } => 0x0307,
            Self::DataCorruption(_) => 0x0308,

            // 0x04xx directory
            Self::DependencyMissing(_) => 0x0401,

            // 0x05xx access
            Self::PermissionDenied => 0x0501,
            Self::UserNotFound => 0x0502,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::replication("log offline").is_retryable());
        assert!(!Error::PermissionDenied.is_retryable());
        assert!(!Error::not_found("mnodes", 3).is_retryable());
    }

    #[test]
    fn test_error_not_found() {
        assert!(Error::not_found("mnodes", 3).is_not_found());
        assert!(Error::UserNotFound.is_not_found());
        assert!(!Error::already_exists("mnodes", 3).is_not_found());
    }

    #[test]
    fn test_error_codes_distinct() {
        let not_found = Error::not_found("mnodes", 1).code();
        let exists = Error::already_exists("mnodes", 1).code();
        let missing = Error::DependencyMissing("host 1".into()).code();
        let generic = Error::internal("boom").code();

        assert_ne!(not_found, exists);
        assert_ne!(not_found, missing);
        assert_ne!(exists, missing);
        assert_ne!(missing, generic);
        assert_eq!(Error::PermissionDenied.code(), 0x0501);
    }

    #[test]
    fn test_error_display() {
        let err = Error::not_found("mnodes", 7);
        assert_eq!(err.to_string(), "row not found in table 'mnodes': 7");
    }
}
