//! # Framework Errors
//!
//! This module defines the error taxonomy shared by every repository and resource.
//!
//! There are three layers:
//!
//! - [`StoreError`]: raw faults reported by a storage engine (duplicate key,
//!   unavailable collection, malformed update, ...). Only the repository core
//!   ever sees these.
//! - [`RepositoryError`]: what repositories return. Callers match on
//!   [`RepositoryError::kind`] instead of on engine-specific details.
//! - [`ResourceError`]: failures of an external dependency's lifecycle
//!   (connect, ping, close).

use std::time::Duration;

/// Classification of a [`RepositoryError`].
///
/// Services branch on this, never on the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidId,
    InvalidInput,
    Storage,
}

/// Errors returned by [`BaseRepository`](crate::BaseRepository) and by domain repositories.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// No document matched the identifier or filter.
    #[error("not found")]
    NotFound,

    /// A unique constraint was violated.
    #[error("already exists")]
    AlreadyExists,

    /// The identifier could not be used.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// The caller supplied data that cannot be stored.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Any other storage failure, wrapped with the operation and entity it came from.
    #[error("{operation} {entity}: {source}")]
    Storage {
        operation: &'static str,
        entity: String,
        #[source]
        source: StoreError,
    },
}

impl RepositoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::NotFound => ErrorKind::NotFound,
            RepositoryError::AlreadyExists => ErrorKind::AlreadyExists,
            RepositoryError::InvalidId(_) => ErrorKind::InvalidId,
            RepositoryError::InvalidInput(_) => ErrorKind::InvalidInput,
            RepositoryError::Storage { .. } => ErrorKind::Storage,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }

    /// Converts an engine fault into the repository taxonomy.
    ///
    /// Duplicate-key violations become [`RepositoryError::AlreadyExists`];
    /// everything else is wrapped as [`RepositoryError::Storage`].
    pub fn from_store(operation: &'static str, entity: &str, source: StoreError) -> Self {
        match source {
            StoreError::DuplicateKey { .. } => RepositoryError::AlreadyExists,
            StoreError::InvalidId(reason) => RepositoryError::InvalidId(reason),
            source => RepositoryError::Storage {
                operation,
                entity: entity.to_string(),
                source,
            },
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::InvalidInput(err.to_string())
    }
}

/// Faults raised by a [`DocumentCollection`](crate::store::DocumentCollection) implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate key on index {index}: {key}")]
    DuplicateKey { index: String, key: String },

    #[error("collection {0} is unavailable")]
    Unavailable(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("malformed update: {0}")]
    MalformedUpdate(String),

    #[error("malformed filter: {0}")]
    MalformedFilter(String),

    #[error("unsupported pipeline stage: {0}")]
    UnsupportedStage(String),

    #[error("operation exceeded {0:?}")]
    Timeout(Duration),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Errors raised while managing the lifecycle of an external resource.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// The resource was used before `connect` succeeded or after `close`.
    #[error("resource {0} not connected")]
    NotConnected(String),

    #[error("failed to connect {resource}: {reason}")]
    ConnectFailed { resource: String, reason: String },

    #[error("resource {resource} timed out after {after:?}")]
    Timeout { resource: String, after: Duration },

    #[error("resource {resource} failed: {reason}")]
    Failed { resource: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_maps_to_already_exists() {
        let err = RepositoryError::from_store(
            "insert_one",
            "user",
            StoreError::DuplicateKey {
                index: "email_1".into(),
                key: "a@x.io".into(),
            },
        );
        assert!(err.is_already_exists());
    }

    #[test]
    fn rejected_id_values_map_to_invalid_id() {
        let err = RepositoryError::from_store("insert_one", "user", StoreError::InvalidId("42".into()));
        assert_eq!(err.kind(), ErrorKind::InvalidId);
    }

    #[test]
    fn other_faults_are_wrapped_with_context() {
        let err = RepositoryError::from_store(
            "find_by_id",
            "user",
            StoreError::Unavailable("users".into()),
        );
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(err.to_string(), "find_by_id user: collection users is unavailable");
        assert!(std::error::Error::source(&err).is_some());
    }
}
