//! Cache storage trait and SQLite implementation.
//!
//! Storage is deliberately dumb: one serialized collection per entity type per
//! partition, plus a metadata row holding `last_synced_at`. Decoding, admission checks
//! and partition guarding live in [`LocalStore`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::partition::{PartitionResolver, StoragePartition};
use crate::entity::timestamps::{self, format_timestamp, parse_timestamp};
use crate::entity::SyncEntity;
use crate::error::{Result, SyncError};

const LAST_SYNCED_AT: &str = "lastSyncedAt";

/// Per-type cache metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetadata {
  /// When a merged remote snapshot was last written back. `None` means never.
  pub last_synced_at: Option<DateTime<Utc>>,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Serialized collection for a type, if one was ever stored.
  fn load_collection(
    &self,
    partition: &StoragePartition,
    entity_type: &str,
  ) -> Result<Option<String>>;

  /// Replace the serialized collection. When `synced_at` is given, the metadata row is
  /// stamped in the same transaction; otherwise metadata is left as it was.
  fn store_collection(
    &self,
    partition: &StoragePartition,
    entity_type: &str,
    data: &str,
    synced_at: Option<DateTime<Utc>>,
  ) -> Result<()>;

  /// Raw `last_synced_at` text from the metadata row.
  fn load_synced_at(
    &self,
    partition: &StoragePartition,
    entity_type: &str,
  ) -> Result<Option<String>>;

  /// Remove both the collection and its metadata.
  fn invalidate(&self, partition: &StoragePartition, entity_type: &str) -> Result<()>;

  /// Entity types with stored data or metadata in a partition.
  fn entity_types(&self, partition: &StoragePartition) -> Result<Vec<String>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Create a new SQLite storage at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open (or create) the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        SyncError::Config(format!(
          "Failed to create cache directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    Self::from_connection(Connection::open(path)?)
  }

  /// Non-persistent storage, used by tests and throwaway sessions.
  pub fn open_in_memory() -> Result<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn.execute_batch(CACHE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| SyncError::Config("Could not determine data directory".to_string()))?;

    Ok(data_dir.join("larder").join("cache.db"))
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(SyncError::poisoned)
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entity_collections (
    partition TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (partition, entity_type)
);

CREATE TABLE IF NOT EXISTS cache_metadata (
    partition TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    last_synced_at TEXT,
    PRIMARY KEY (partition, entity_type)
);
"#;

impl CacheStorage for SqliteStorage {
  fn load_collection(
    &self,
    partition: &StoragePartition,
    entity_type: &str,
  ) -> Result<Option<String>> {
    let conn = self.conn()?;
    let data = conn
      .query_row(
        "SELECT data FROM entity_collections WHERE partition = ? AND entity_type = ?",
        params![partition.key(), entity_type],
        |row| row.get(0),
      )
      .optional()?;
    Ok(data)
  }

  fn store_collection(
    &self,
    partition: &StoragePartition,
    entity_type: &str,
    data: &str,
    synced_at: Option<DateTime<Utc>>,
  ) -> Result<()> {
    let mut conn = self.conn()?;
    let key = partition.key();

    let tx = conn.transaction()?;
    tx.execute(
      "INSERT OR REPLACE INTO entity_collections (partition, entity_type, data)
       VALUES (?, ?, ?)",
      params![key, entity_type, data],
    )?;
    if let Some(at) = synced_at {
      tx.execute(
        "INSERT OR REPLACE INTO cache_metadata (partition, entity_type, last_synced_at)
         VALUES (?, ?, ?)",
        params![key, entity_type, format_timestamp(at)],
      )?;
    }
    tx.commit()?;

    Ok(())
  }

  fn load_synced_at(
    &self,
    partition: &StoragePartition,
    entity_type: &str,
  ) -> Result<Option<String>> {
    let conn = self.conn()?;
    let synced_at: Option<Option<String>> = conn
      .query_row(
        "SELECT last_synced_at FROM cache_metadata WHERE partition = ? AND entity_type = ?",
        params![partition.key(), entity_type],
        |row| row.get(0),
      )
      .optional()?;
    Ok(synced_at.flatten())
  }

  fn invalidate(&self, partition: &StoragePartition, entity_type: &str) -> Result<()> {
    let mut conn = self.conn()?;
    let key = partition.key();

    let tx = conn.transaction()?;
    tx.execute(
      "DELETE FROM entity_collections WHERE partition = ? AND entity_type = ?",
      params![key, entity_type],
    )?;
    tx.execute(
      "DELETE FROM cache_metadata WHERE partition = ? AND entity_type = ?",
      params![key, entity_type],
    )?;
    tx.commit()?;

    Ok(())
  }

  fn entity_types(&self, partition: &StoragePartition) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(
      "SELECT entity_type FROM entity_collections WHERE partition = ?1
       UNION
       SELECT entity_type FROM cache_metadata WHERE partition = ?1
       ORDER BY entity_type",
    )?;
    let types = stmt
      .query_map(params![partition.key()], |row| row.get(0))?
      .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(types)
  }
}

/// Typed access to cached collections, scoped by the current storage partition.
///
/// Reads are forgiving: anything unreadable is logged and dropped. Writes are not: every
/// storage failure reaches the caller, and writes are refused outright if the session
/// moved to another partition since the operation captured its expected one.
#[derive(Clone)]
pub struct LocalStore {
  storage: Arc<dyn CacheStorage>,
  resolver: PartitionResolver,
}

impl LocalStore {
  pub fn new(storage: Arc<dyn CacheStorage>, resolver: PartitionResolver) -> Self {
    Self { storage, resolver }
  }

  pub fn resolver(&self) -> &PartitionResolver {
    &self.resolver
  }

  /// Partition `T` currently resolves to.
  pub fn partition_for<T: SyncEntity>(&self) -> Result<StoragePartition> {
    self.resolver.resolve(T::scope())
  }

  /// All admissible records of `T` in the current partition, tombstones included.
  pub fn read<T: SyncEntity>(&self) -> Result<Vec<T>> {
    let partition = self.partition_for::<T>()?;
    Ok(self.read_in(&partition))
  }

  /// All admissible records of `T` in `partition`. Never fails.
  pub fn read_in<T: SyncEntity>(&self, partition: &StoragePartition) -> Vec<T> {
    match self.storage.load_collection(partition, T::entity_type()) {
      Ok(Some(text)) => decode_collection(T::entity_type(), &text),
      Ok(None) => Vec::new(),
      Err(e) => {
        warn!(
          entity_type = T::entity_type(),
          partition = %partition,
          error = %e,
          "Failed to read cached collection, treating as empty"
        );
        Vec::new()
      }
    }
  }

  /// Write a merged remote snapshot and stamp `last_synced_at`.
  pub fn write<T: SyncEntity>(&self, expected: &StoragePartition, entities: &[T]) -> Result<()> {
    self.store(expected, entities, Some(timestamps::now()))
  }

  /// Write local changes without touching `last_synced_at`.
  pub fn write_local<T: SyncEntity>(
    &self,
    expected: &StoragePartition,
    entities: &[T],
  ) -> Result<()> {
    self.store(expected, entities, None)
  }

  fn store<T: SyncEntity>(
    &self,
    expected: &StoragePartition,
    entities: &[T],
    synced_at: Option<DateTime<Utc>>,
  ) -> Result<()> {
    let partition = self.resolver.resolve_for_write(T::scope(), expected)?;
    let data = serde_json::to_string(entities)?;
    self
      .storage
      .store_collection(&partition, T::entity_type(), &data, synced_at)?;

    debug!(
      entity_type = T::entity_type(),
      partition = %partition,
      count = entities.len(),
      synced = synced_at.is_some(),
      "Stored collection"
    );
    Ok(())
  }

  /// Clear data and metadata for `T` in the current partition.
  pub fn invalidate<T: SyncEntity>(&self) -> Result<()> {
    let partition = self.partition_for::<T>()?;
    self.storage.invalidate(&partition, T::entity_type())
  }

  /// Metadata for `T` in `partition`. Unreadable metadata counts as never synced.
  pub fn metadata<T: SyncEntity>(&self, partition: &StoragePartition) -> CacheMetadata {
    read_metadata(self.storage.as_ref(), partition, T::entity_type())
  }
}

/// Metadata lookup by type name, for callers without a concrete entity type.
pub fn read_metadata(
  storage: &dyn CacheStorage,
  partition: &StoragePartition,
  entity_type: &str,
) -> CacheMetadata {
  let text = match storage.load_synced_at(partition, entity_type) {
    Ok(text) => text,
    Err(e) => {
      warn!(entity_type, partition = %partition, error = %e, "Failed to read cache metadata");
      None
    }
  };

  let last_synced_at = text.and_then(|t| match parse_timestamp(LAST_SYNCED_AT, &t) {
    Ok(at) => at,
    Err(e) => {
      warn!(entity_type, partition = %partition, error = %e, "Ignoring unreadable cache metadata");
      None
    }
  });

  CacheMetadata { last_synced_at }
}

/// Decode a stored collection, dropping whatever cannot be admitted.
fn decode_collection<T: SyncEntity>(entity_type: &str, text: &str) -> Vec<T> {
  let records = match serde_json::from_str::<Value>(text) {
    Ok(Value::Array(records)) => records,
    Ok(_) => {
      warn!(entity_type, "Cached collection is not an array, treating as empty");
      return Vec::new();
    }
    Err(e) => {
      warn!(entity_type, error = %e, "Cached collection is unreadable, treating as empty");
      return Vec::new();
    }
  };

  let total = records.len();
  let entities: Vec<T> = records
    .into_iter()
    .enumerate()
    .filter_map(|(index, record)| match serde_json::from_value::<T>(record) {
      Ok(entity) if entity.is_admissible() => Some(entity),
      Ok(_) => {
        warn!(entity_type, index, "Dropping cached record missing required fields");
        None
      }
      Err(e) => {
        warn!(entity_type, index, error = %e, "Dropping unreadable cached record");
        None
      }
    })
    .collect();

  if entities.len() < total {
    debug!(
      entity_type,
      kept = entities.len(),
      dropped = total - entities.len(),
      "Decoded cached collection"
    );
  }
  entities
}
