//! Cache layer: the read path (freshness-driven) and the write-through mutation path.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::freshness::{FreshnessState, FreshnessTable};
use super::merge::{active, position, upsert};
use super::partition::StoragePartition;
use super::refresh::{refresh_collection, RefreshCoordinator, RefreshHandle, RefreshOutcome};
use super::storage::LocalStore;
use super::traits::CacheResult;
use crate::entity::{timestamps, EntityIdentity, SyncEntity};
use crate::error::{Result, SyncError};
use crate::sync::{
  ChangeEvent, ChangeNotifier, Connectivity, OfflineQueue, QueuedWrite, RemoteSource,
  WriteOperation,
};
use tokio::sync::broadcast;

/// Cache layer shared by every entity type.
///
/// This is the only thing the rest of the client talks to. Reads never block on the
/// network unless the cache has nothing usable; writes land locally first and reach the
/// remote (or the offline queue) afterwards.
#[derive(Clone)]
pub struct CacheLayer {
  store: LocalStore,
  freshness: FreshnessTable,
  coordinator: RefreshCoordinator,
  connectivity: Arc<dyn Connectivity>,
  queue: Arc<dyn OfflineQueue>,
  notifier: ChangeNotifier,
}

impl CacheLayer {
  pub fn new(
    store: LocalStore,
    connectivity: Arc<dyn Connectivity>,
    queue: Arc<dyn OfflineQueue>,
  ) -> Self {
    Self {
      store,
      freshness: FreshnessTable::default(),
      coordinator: RefreshCoordinator::new(),
      connectivity,
      queue,
      notifier: ChangeNotifier::default(),
    }
  }

  /// Set the freshness thresholds.
  pub fn with_freshness(mut self, freshness: FreshnessTable) -> Self {
    self.freshness = freshness;
    self
  }

  /// Share a notifier with other layers or observers.
  pub fn with_notifier(mut self, notifier: ChangeNotifier) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn store(&self) -> &LocalStore {
    &self.store
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
    self.notifier.subscribe()
  }

  /// Handle for one entity type, bound to its remote.
  pub fn entity<T: SyncEntity>(&self, remote: Arc<dyn RemoteSource<T>>) -> EntityCache<T> {
    EntityCache {
      layer: self.clone(),
      remote,
    }
  }
}

/// Cache operations for entity type `T`.
pub struct EntityCache<T: SyncEntity> {
  layer: CacheLayer,
  remote: Arc<dyn RemoteSource<T>>,
}

impl<T: SyncEntity> Clone for EntityCache<T> {
  fn clone(&self) -> Self {
    Self {
      layer: self.layer.clone(),
      remote: Arc::clone(&self.remote),
    }
  }
}

impl<T: SyncEntity> EntityCache<T> {
  fn store(&self) -> &LocalStore {
    &self.layer.store
  }

  /// Guest partitions never talk to the remote.
  fn syncs_remotely(partition: &StoragePartition) -> bool {
    partition != &StoragePartition::Guest
  }

  fn refresh_key(partition: &StoragePartition) -> String {
    format!("{}/{}", partition.key(), T::entity_type())
  }

  /// Current freshness of the cached collection.
  pub fn freshness(&self) -> Result<FreshnessState> {
    let partition = self.store().partition_for::<T>()?;
    let metadata = self.store().metadata::<T>(&partition);
    Ok(
      self
        .layer
        .freshness
        .classify(T::entity_type(), metadata.last_synced_at, timestamps::now()),
    )
  }

  /// All live entities, plus where they came from.
  ///
  /// | state   | offline       | online                                  |
  /// |---------|---------------|-----------------------------------------|
  /// | missing | cached (none) | fetch, merge, write, return             |
  /// | expired | cached        | fetch, merge, write, return             |
  /// | stale   | cached        | cached, refresh in the background       |
  /// | fresh   | cached        | cached                                  |
  ///
  /// Remote failures never surface here; they degrade to whatever is cached.
  pub async fn load(&self) -> Result<CacheResult<Vec<T>>> {
    let partition = self.store().partition_for::<T>()?;
    let cached: Vec<T> = self.store().read_in(&partition);
    let synced_at = self.store().metadata::<T>(&partition).last_synced_at;
    let state = self
      .layer
      .freshness
      .classify(T::entity_type(), synced_at, timestamps::now());
    let online = self.layer.connectivity.is_online();

    debug!(
      entity_type = T::entity_type(),
      partition = %partition,
      state = %state,
      online,
      "Cache read"
    );

    if !online || !Self::syncs_remotely(&partition) {
      return Ok(CacheResult::offline(active(&cached), state, synced_at));
    }

    match state {
      FreshnessState::Fresh => Ok(CacheResult::from_cache(
        active(&cached),
        state,
        synced_at,
        false,
      )),
      FreshnessState::Stale => {
        let _ = self.start_refresh(&partition)?;
        Ok(CacheResult::from_cache(active(&cached), state, synced_at, true))
      }
      FreshnessState::Missing | FreshnessState::Expired => {
        match self.start_refresh(&partition)?.await {
          RefreshOutcome::Refreshed { .. } => {
            let merged: Vec<T> = self.store().read_in(&partition);
            let synced_at = self.store().metadata::<T>(&partition).last_synced_at;
            Ok(CacheResult::from_network(active(&merged), state, synced_at))
          }
          RefreshOutcome::Failed => Ok(CacheResult::offline(active(&cached), state, synced_at)),
        }
      }
    }
  }

  /// All live entities of this type.
  pub async fn get_all(&self) -> Result<Vec<T>> {
    Ok(self.load().await?.data)
  }

  /// A live entity by either identifier, from the local cache only.
  pub fn find(&self, id: &str) -> Result<Option<T>> {
    let entities: Vec<T> = self.store().read()?;
    Ok(
      entities
        .into_iter()
        .find(|e| !e.is_tombstone() && e.identity().matches(id)),
    )
  }

  /// Refresh now (or join the refresh in flight) and wait for it.
  pub async fn refresh(&self) -> Result<RefreshOutcome> {
    let partition = self.store().partition_for::<T>()?;
    if !Self::syncs_remotely(&partition) {
      return Ok(RefreshOutcome::Failed);
    }
    Ok(self.start_refresh(&partition)?.await)
  }

  /// The background refresh in flight for this type, if any.
  pub fn in_flight_refresh(&self) -> Result<Option<RefreshHandle>> {
    let partition = self.store().partition_for::<T>()?;
    Ok(self.layer.coordinator.in_flight(&Self::refresh_key(&partition)))
  }

  /// Drop the bookkeeping of the in-flight refresh. The fetch itself is not aborted.
  pub fn cancel_refresh(&self) -> Result<bool> {
    let partition = self.store().partition_for::<T>()?;
    Ok(self.layer.coordinator.cancel(&Self::refresh_key(&partition)))
  }

  /// Clear the cached collection and its metadata.
  pub fn invalidate(&self) -> Result<()> {
    self.store().invalidate::<T>()?;
    self.layer.notifier.notify(T::entity_type());
    Ok(())
  }

  fn start_refresh(&self, partition: &StoragePartition) -> Result<RefreshHandle> {
    let store = self.store().clone();
    let remote = Arc::clone(&self.remote);
    let notifier = self.layer.notifier.clone();
    let owned_partition = partition.clone();

    self
      .layer
      .coordinator
      .refresh(&Self::refresh_key(partition), move || {
        refresh_collection(store, remote, owned_partition, notifier)
      })
  }

  /// Create an entity. It is visible locally before the remote hears about it.
  ///
  /// Missing identifiers are generated; `created_at` is filled in if absent.
  pub async fn create(&self, entity: T) -> Result<T> {
    let mut entity = entity;
    ensure_identity(entity.identity_mut());
    entity.timestamps_mut().populate_created(timestamps::now());

    if !entity.has_required_fields() {
      return Err(SyncError::InvalidEntity {
        entity_type: T::entity_type(),
        reason: "missing required fields".to_string(),
      });
    }

    self.write_through(WriteOperation::Create, entity).await
  }

  /// Apply `change` to the live entity with identifier `id`.
  ///
  /// Identity is not editable through this path; `updated_at` is refreshed.
  pub async fn update<F>(&self, id: &str, change: F) -> Result<T>
  where
    F: FnOnce(&mut T),
  {
    let current = self.find(id)?.ok_or_else(|| self.not_found(id))?;

    let mut next = current.clone();
    change(&mut next);
    *next.identity_mut() = current.identity().clone();
    next.timestamps_mut().refresh_updated(timestamps::now());

    if !next.has_required_fields() {
      return Err(SyncError::InvalidEntity {
        entity_type: T::entity_type(),
        reason: "update removed required fields".to_string(),
      });
    }

    self.write_through(WriteOperation::Update, next).await
  }

  /// Tombstone the entity with identifier `id`. Deleting a tombstone again re-stamps it.
  ///
  /// Both `deleted_at` and `updated_at` move to now.
  pub async fn delete(&self, id: &str) -> Result<T> {
    let entities: Vec<T> = self.store().read()?;
    let mut target = position(&entities, id)
      .map(|i| entities[i].clone())
      .ok_or_else(|| self.not_found(id))?;

    let now = timestamps::now();
    target.timestamps_mut().mark_tombstone(now);
    target.timestamps_mut().refresh_updated(now);
    self.write_through(WriteOperation::Delete, target).await
  }

  fn not_found(&self, id: &str) -> SyncError {
    SyncError::NotFound {
      entity_type: T::entity_type(),
      id: id.to_string(),
    }
  }

  /// Persist, notify, then propagate. The order is fixed: the optimistic entity is
  /// stored and announced before any network call starts.
  async fn write_through(&self, operation: WriteOperation, optimistic: T) -> Result<T> {
    let entity_type = T::entity_type();
    let partition = self.store().partition_for::<T>()?;

    self.persist(&partition, optimistic.clone())?;
    self.layer.notifier.notify(entity_type);

    if !Self::syncs_remotely(&partition) {
      debug!(entity_type, operation = %operation, "Local-only write");
      return Ok(optimistic);
    }

    if !self.layer.connectivity.is_online() {
      self.enqueue(operation, &optimistic).await?;
      return Ok(optimistic);
    }

    let response = match operation {
      WriteOperation::Create => self.remote.create(&optimistic).await,
      WriteOperation::Update => self.remote.update(&optimistic).await,
      WriteOperation::Delete => self.remote.delete(&optimistic).await,
    };

    match response {
      Ok(confirmed) => {
        let confirmed = self.confirm(&partition, &optimistic, confirmed)?;
        self.layer.notifier.notify(entity_type);
        Ok(confirmed)
      }
      Err(e) if e.is_network() => {
        warn!(
          entity_type,
          operation = %operation,
          durable_id = %optimistic.identity().durable_id,
          error = %e,
          "Remote write failed, deferring to offline queue"
        );
        self.enqueue(operation, &optimistic).await?;
        Err(e.into())
      }
      Err(e) => Err(e.into()),
    }
  }

  fn persist(&self, partition: &StoragePartition, entity: T) -> Result<()> {
    let mut entities: Vec<T> = self.store().read_in(partition);
    upsert(&mut entities, entity);
    self.store().write_local(partition, &entities)
  }

  /// Replace the optimistic record with the remote's answer. The durable id is kept;
  /// the remote's public id is adopted.
  fn confirm(&self, partition: &StoragePartition, optimistic: &T, confirmed: T) -> Result<T> {
    let mut confirmed = confirmed;
    let identity = optimistic.identity().reconciled_with(confirmed.identity());
    if identity.public_id != optimistic.identity().public_id {
      info!(
        entity_type = T::entity_type(),
        durable_id = %identity.durable_id,
        public_id = %identity.public_id,
        "Entity confirmed by remote"
      );
    }
    *confirmed.identity_mut() = identity;

    self.persist(partition, confirmed.clone())?;
    Ok(confirmed)
  }

  async fn enqueue(&self, operation: WriteOperation, entity: &T) -> Result<()> {
    let identity = entity.identity();
    let write = QueuedWrite {
      entity_type: T::entity_type().to_string(),
      operation,
      durable_id: identity.durable_id.clone(),
      public_id: (!identity.is_unconfirmed()).then(|| identity.public_id.clone()),
      payload: serde_json::to_value(entity)?,
    };
    self.layer.queue.enqueue(write).await
  }
}

/// Fill in whichever identifiers are missing on a new entity.
fn ensure_identity(identity: &mut EntityIdentity) {
  if identity.durable_id.trim().is_empty() {
    identity.durable_id = EntityIdentity::new_offline().durable_id;
  }
  if identity.public_id.trim().is_empty() {
    identity.public_id = identity.durable_id.clone();
  }
}
