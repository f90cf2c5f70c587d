//! Error types shared across the cache engine.

use crate::cache::StoragePartition;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, SyncError>;

/// A timestamp field failed validation.
///
/// Always carries the name of the offending field so callers reading legacy or foreign
/// data can report exactly what was wrong.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid timestamp in field `{field}` ({value:?}): {reason}")]
pub struct TimestampError {
  pub field: &'static str,
  pub value: String,
  pub reason: String,
}

/// Failure reported by a remote collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
  /// The request never reached the remote or its answer was lost.
  #[error("Network failure: {0}")]
  Network(String),

  /// The remote processed the request and refused it.
  #[error("Remote rejected the request: {0}")]
  Rejected(String),
}

impl RemoteError {
  /// Network-class failures are the only ones that defer a write to the offline queue.
  pub fn is_network(&self) -> bool {
    matches!(self, Self::Network(_))
  }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error(transparent)]
  Timestamp(#[from] TimestampError),

  #[error("Storage error: {0}")]
  Storage(#[from] rusqlite::Error),

  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("Lock poisoned: {0}")]
  LockPoisoned(String),

  /// A write resolved to a different storage partition than the operation started with.
  #[error("Storage partition mismatch: expected {expected}, resolved {actual}")]
  PartitionMismatch {
    expected: StoragePartition,
    actual: StoragePartition,
  },

  #[error(transparent)]
  Remote(#[from] RemoteError),

  #[error("No {entity_type} with id {id}")]
  NotFound {
    entity_type: &'static str,
    id: String,
  },

  /// An entity handed to the cache would not be admitted back on read.
  #[error("Invalid {entity_type}: {reason}")]
  InvalidEntity {
    entity_type: &'static str,
    reason: String,
  },

  #[error("Configuration error: {0}")]
  Config(String),
}

impl SyncError {
  pub(crate) fn poisoned<E: std::fmt::Display>(e: E) -> Self {
    Self::LockPoisoned(e.to_string())
  }

  /// True when the underlying failure was a network-class remote error.
  pub fn is_network(&self) -> bool {
    matches!(self, Self::Remote(e) if e.is_network())
  }
}
