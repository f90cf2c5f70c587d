//! Fixtures shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::cache::{CacheStorage, SqliteStorage, StoragePartition};
use crate::entity::{EntityIdentity, EntityScope, SyncEntity, Timestamps};
use crate::error::{RemoteError, Result, SyncError};
use crate::sync::{OfflineQueue, QueuedWrite, RemoteSource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
  #[serde(flatten)]
  pub identity: EntityIdentity,
  #[serde(flatten)]
  pub timestamps: Timestamps,
  pub name: String,
}

impl SyncEntity for Note {
  fn entity_type() -> &'static str {
    "note"
  }

  fn identity(&self) -> &EntityIdentity {
    &self.identity
  }

  fn identity_mut(&mut self) -> &mut EntityIdentity {
    &mut self.identity
  }

  fn timestamps(&self) -> &Timestamps {
    &self.timestamps
  }

  fn timestamps_mut(&mut self) -> &mut Timestamps {
    &mut self.timestamps
  }

  fn has_required_fields(&self) -> bool {
    !self.name.is_empty()
  }
}

/// Shared reference data, stored in the catalog partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
  #[serde(flatten)]
  pub identity: EntityIdentity,
  #[serde(flatten)]
  pub timestamps: Timestamps,
  pub symbol: String,
}

impl SyncEntity for Unit {
  fn entity_type() -> &'static str {
    "unit"
  }

  fn scope() -> EntityScope {
    EntityScope::Catalog
  }

  fn identity(&self) -> &EntityIdentity {
    &self.identity
  }

  fn identity_mut(&mut self) -> &mut EntityIdentity {
    &mut self.identity
  }

  fn timestamps(&self) -> &Timestamps {
    &self.timestamps
  }

  fn timestamps_mut(&mut self) -> &mut Timestamps {
    &mut self.timestamps
  }
}

/// Instant `minutes` after a fixed epoch.
pub fn t(minutes: i64) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
}

pub fn note(id: &str, updated: i64, name: &str) -> Note {
  Note {
    identity: EntityIdentity::new(id, id),
    timestamps: Timestamps {
      created_at: Some(t(0)),
      updated_at: Some(t(updated)),
      deleted_at: None,
    },
    name: name.to_string(),
  }
}

pub fn tombstone(id: &str, updated: i64, deleted: i64) -> Note {
  let mut n = note(id, updated, "gone");
  n.timestamps.deleted_at = Some(t(deleted));
  n
}

pub fn names(notes: &[Note]) -> Vec<&str> {
  notes.iter().map(|n| n.name.as_str()).collect()
}

/// Remote fake: scripted fetch results, counted calls and an optional gate that holds
/// every fetch until released.
#[derive(Default)]
pub struct FakeRemote {
  pub fetches: AtomicUsize,
  pub mutations: AtomicUsize,
  snapshot: Mutex<Vec<Note>>,
  fetch_error: Mutex<Option<RemoteError>>,
  mutation_errors: Mutex<VecDeque<RemoteError>>,
  gated: AtomicBool,
  gate: Notify,
  /// Public id the remote assigns on create.
  pub assign_public_id: Mutex<Option<String>>,
}

impl FakeRemote {
  pub fn with_snapshot(notes: Vec<Note>) -> Arc<Self> {
    let remote = Self::default();
    *remote.snapshot.lock().unwrap() = notes;
    Arc::new(remote)
  }

  pub fn gated(notes: Vec<Note>) -> Arc<Self> {
    let remote = Self::default();
    *remote.snapshot.lock().unwrap() = notes;
    remote.gated.store(true, Ordering::SeqCst);
    Arc::new(remote)
  }

  pub fn release(&self) {
    self.gated.store(false, Ordering::SeqCst);
    self.gate.notify_waiters();
  }

  pub fn fail_fetch(&self, err: RemoteError) {
    *self.fetch_error.lock().unwrap() = Some(err);
  }

  pub fn fail_next_mutation(&self, err: RemoteError) {
    self.mutation_errors.lock().unwrap().push_back(err);
  }

  pub fn fetch_count(&self) -> usize {
    self.fetches.load(Ordering::SeqCst)
  }

  fn mutate(&self, entity: &Note) -> std::result::Result<Note, RemoteError> {
    self.mutations.fetch_add(1, Ordering::SeqCst);
    if let Some(err) = self.mutation_errors.lock().unwrap().pop_front() {
      return Err(err);
    }
    let mut confirmed = entity.clone();
    if let Some(public_id) = self.assign_public_id.lock().unwrap().clone() {
      confirmed.identity.public_id = public_id;
    }
    confirmed.timestamps.refresh_updated(t(500));
    Ok(confirmed)
  }
}

#[async_trait]
impl RemoteSource<Note> for FakeRemote {
  async fn fetch_all(&self) -> std::result::Result<Vec<Note>, RemoteError> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    while self.gated.load(Ordering::SeqCst) {
      let notified = self.gate.notified();
      if !self.gated.load(Ordering::SeqCst) {
        break;
      }
      notified.await;
    }
    if let Some(err) = self.fetch_error.lock().unwrap().clone() {
      return Err(err);
    }
    Ok(self.snapshot.lock().unwrap().clone())
  }

  async fn create(&self, entity: &Note) -> std::result::Result<Note, RemoteError> {
    self.mutate(entity)
  }

  async fn update(&self, entity: &Note) -> std::result::Result<Note, RemoteError> {
    self.mutate(entity)
  }

  async fn delete(&self, entity: &Note) -> std::result::Result<Note, RemoteError> {
    self.mutate(entity)
  }
}

/// Queue fake that records what was enqueued.
#[derive(Default)]
pub struct RecordingQueue {
  pub writes: Mutex<Vec<QueuedWrite>>,
}

impl RecordingQueue {
  pub fn len(&self) -> usize {
    self.writes.lock().unwrap().len()
  }
}

#[async_trait]
impl OfflineQueue for RecordingQueue {
  async fn enqueue(&self, write: QueuedWrite) -> Result<()> {
    self.writes.lock().unwrap().push(write);
    Ok(())
  }
}

/// Storage whose writes fail once `fail_writes` is set. Reads go to an in-memory
/// database so a collection can be seeded first.
pub struct FailingStorage {
  inner: SqliteStorage,
  pub fail_writes: AtomicBool,
}

impl FailingStorage {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      fail_writes: AtomicBool::new(false),
    })
  }

  fn disk_full() -> SyncError {
    SyncError::Storage(rusqlite::Error::SqliteFailure(
      rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
      Some("database or disk is full".to_string()),
    ))
  }
}

impl CacheStorage for FailingStorage {
  fn load_collection(
    &self,
    partition: &StoragePartition,
    entity_type: &str,
  ) -> Result<Option<String>> {
    self.inner.load_collection(partition, entity_type)
  }

  fn store_collection(
    &self,
    partition: &StoragePartition,
    entity_type: &str,
    data: &str,
    synced_at: Option<DateTime<Utc>>,
  ) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(Self::disk_full());
    }
    self.inner.store_collection(partition, entity_type, data, synced_at)
  }

  fn load_synced_at(
    &self,
    partition: &StoragePartition,
    entity_type: &str,
  ) -> Result<Option<String>> {
    self.inner.load_synced_at(partition, entity_type)
  }

  fn invalidate(&self, partition: &StoragePartition, entity_type: &str) -> Result<()> {
    self.inner.invalidate(partition, entity_type)
  }

  fn entity_types(&self, partition: &StoragePartition) -> Result<Vec<String>> {
    self.inner.entity_types(partition)
  }
}
