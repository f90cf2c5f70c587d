use async_trait::async_trait;

use crate::entity::SyncEntity;
use crate::error::RemoteError;

/// Remote authority for one entity type.
///
/// How requests travel (HTTP, gRPC, ...) is up to the implementor. The cache only cares
/// whether a call produced a result, and if not, whether the failure was network-class
/// ([`RemoteError::Network`]) or a terminal rejection.
#[async_trait]
pub trait RemoteSource<T: SyncEntity>: Send + Sync {
  /// Fetch a batch of records. Need not be a full snapshot: deletions must arrive as
  /// tombstones.
  async fn fetch_all(&self) -> Result<Vec<T>, RemoteError>;

  /// Persist a new entity and return the remote's version of it.
  async fn create(&self, entity: &T) -> Result<T, RemoteError>;

  async fn update(&self, entity: &T) -> Result<T, RemoteError>;

  /// Delete an entity; `entity` is already a tombstone.
  async fn delete(&self, entity: &T) -> Result<T, RemoteError>;
}
