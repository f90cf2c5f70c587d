//! Storage partitions: which namespace a read or write lands in.

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::error;

use crate::entity::EntityScope;
use crate::error::{Result, SyncError};

/// Who the cache is currently serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
  SignedIn { account_id: String },
  Guest,
}

/// A storage namespace. Account partitions are keyed by a hash of the account id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoragePartition {
  Account(String),
  Guest,
  Catalog,
}

impl StoragePartition {
  /// Partition for a signed-in account.
  pub fn for_account(account_id: &str) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(account_id.as_bytes());
    Self::Account(hex::encode(hasher.finalize()))
  }

  /// Key prefix used in storage rows.
  pub fn key(&self) -> String {
    match self {
      Self::Account(hash) => format!("account:{}", hash),
      Self::Guest => "guest".to_string(),
      Self::Catalog => "catalog".to_string(),
    }
  }
}

impl fmt::Display for StoragePartition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      // Only a prefix of the hash; enough to tell accounts apart in logs.
      Self::Account(hash) => write!(f, "account:{}", &hash[..hash.len().min(12)]),
      Self::Guest => write!(f, "guest"),
      Self::Catalog => write!(f, "catalog"),
    }
  }
}

/// Resolves the partition for an entity scope from the current session.
///
/// Cloning shares the session, so the auth layer can switch accounts while cache
/// handles keep resolving against the live value.
#[derive(Debug, Clone)]
pub struct PartitionResolver {
  session: Arc<RwLock<Session>>,
}

impl PartitionResolver {
  pub fn new(session: Session) -> Self {
    Self {
      session: Arc::new(RwLock::new(session)),
    }
  }

  pub fn session(&self) -> Result<Session> {
    Ok(self.session.read().map_err(SyncError::poisoned)?.clone())
  }

  pub fn set_session(&self, session: Session) -> Result<()> {
    *self.session.write().map_err(SyncError::poisoned)? = session;
    Ok(())
  }

  pub fn resolve(&self, scope: EntityScope) -> Result<StoragePartition> {
    Ok(match scope {
      EntityScope::Catalog => StoragePartition::Catalog,
      EntityScope::Account => match self.session()? {
        Session::SignedIn { account_id } => StoragePartition::for_account(&account_id),
        Session::Guest => StoragePartition::Guest,
      },
    })
  }

  /// Resolve for a write that must land in `expected`.
  ///
  /// Any disagreement means data fetched or mutated for one partition is about to be
  /// written into another (an account switch or sign-out mid-operation). That is never
  /// recoverable, so it fails loudly instead of writing.
  pub fn resolve_for_write(
    &self,
    scope: EntityScope,
    expected: &StoragePartition,
  ) -> Result<StoragePartition> {
    let actual = self.resolve(scope)?;
    if &actual != expected {
      error!(
        expected = %expected,
        actual = %actual,
        "Refusing cache write into a different storage partition"
      );
      return Err(SyncError::PartitionMismatch {
        expected: expected.clone(),
        actual,
      });
    }
    Ok(actual)
  }
}
