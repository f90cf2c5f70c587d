//! Offline write queue.
//!
//! The cache only ever enqueues. Replaying, and deciding when a write has failed for
//! good, belongs to whoever drains the queue; [`SqliteOfflineQueue`] records the
//! bookkeeping for that (`pending → retrying → failed`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::entity::timestamps::{self, format_timestamp, parse_timestamp};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOperation {
  Create,
  Update,
  Delete,
}

impl WriteOperation {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
    }
  }

  fn parse(value: &str) -> Option<Self> {
    match value {
      "create" => Some(Self::Create),
      "update" => Some(Self::Update),
      "delete" => Some(Self::Delete),
      _ => None,
    }
  }
}

impl fmt::Display for WriteOperation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A deferred write: the optimistic entity, ready to replay against the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedWrite {
  pub entity_type: String,
  pub operation: WriteOperation,
  pub durable_id: String,
  /// Absent while the entity only has its offline id.
  pub public_id: Option<String>,
  pub payload: Value,
}

#[async_trait]
pub trait OfflineQueue: Send + Sync {
  async fn enqueue(&self, write: QueuedWrite) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
  Pending,
  Retrying,
  Failed,
}

impl QueueStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Retrying => "retrying",
      Self::Failed => "failed",
    }
  }
}

impl From<&str> for QueueStatus {
  fn from(value: &str) -> Self {
    match value {
      "retrying" => Self::Retrying,
      "failed" => Self::Failed,
      _ => Self::Pending,
    }
  }
}

/// A queued write plus its replay bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
  pub id: i64,
  pub write: QueuedWrite,
  pub status: QueueStatus,
  pub attempts: u32,
  pub last_error: Option<String>,
  pub created_at: Option<DateTime<Utc>>,
}

/// SQLite-backed offline queue.
pub struct SqliteOfflineQueue {
  conn: Mutex<Connection>,
  max_attempts: u32,
}

const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS offline_writes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    operation TEXT NOT NULL,
    durable_id TEXT NOT NULL,
    public_id TEXT,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offline_writes_status ON offline_writes(status, id);
"#;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;

impl SqliteOfflineQueue {
  pub fn open_at(path: &Path) -> Result<Self> {
    Self::from_connection(Connection::open(path)?)
  }

  pub fn open_in_memory() -> Result<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn.execute_batch(QUEUE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
      max_attempts: DEFAULT_MAX_ATTEMPTS,
    })
  }

  /// Attempts after which a write is marked failed for good.
  pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
    self.max_attempts = max_attempts.max(1);
    self
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(SyncError::poisoned)
  }

  /// Writes still due for replay, oldest first.
  pub fn pending(&self) -> Result<Vec<QueueItem>> {
    self.select("WHERE status IN ('pending', 'retrying')")
  }

  /// Writes that exhausted their attempts.
  pub fn failed(&self) -> Result<Vec<QueueItem>> {
    self.select("WHERE status = 'failed'")
  }

  fn select(&self, filter: &str) -> Result<Vec<QueueItem>> {
    let conn = self.conn()?;
    let mut stmt = conn.prepare(&format!(
      "SELECT id, entity_type, operation, durable_id, public_id, payload, status,
              attempts, last_error, created_at
       FROM offline_writes {} ORDER BY id",
      filter
    ))?;

    let rows = stmt
      .query_map([], read_row)?
      .collect::<std::result::Result<Vec<_>, _>>()?;

    // Rows that no longer decode are left in place for inspection, not replayed.
    Ok(
      rows
        .into_iter()
        .filter_map(|row| match row {
          Ok(item) => Some(item),
          Err(reason) => {
            warn!(%reason, "Skipping unreadable offline write");
            None
          }
        })
        .collect(),
    )
  }

  /// Record a failed replay attempt. Returns the status the write moved to.
  pub fn record_failure(&self, id: i64, error: &str) -> Result<QueueStatus> {
    let conn = self.conn()?;
    let attempts: Option<u32> = conn
      .query_row(
        "SELECT attempts FROM offline_writes WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .optional()?;

    let Some(attempts) = attempts else {
      return Err(SyncError::NotFound {
        entity_type: "offline_write",
        id: id.to_string(),
      });
    };

    let attempts = attempts + 1;
    let status = if attempts >= self.max_attempts {
      QueueStatus::Failed
    } else {
      QueueStatus::Retrying
    };

    conn.execute(
      "UPDATE offline_writes SET attempts = ?, status = ?, last_error = ?, updated_at = ?
       WHERE id = ?",
      params![
        attempts,
        status.as_str(),
        error,
        format_timestamp(timestamps::now()),
        id
      ],
    )?;

    if status == QueueStatus::Failed {
      warn!(id, attempts, error, "Offline write failed permanently");
    }
    Ok(status)
  }

  /// Drop a write that was replayed successfully.
  pub fn complete(&self, id: i64) -> Result<()> {
    let conn = self.conn()?;
    conn.execute("DELETE FROM offline_writes WHERE id = ?", params![id])?;
    Ok(())
  }
}

#[async_trait]
impl OfflineQueue for SqliteOfflineQueue {
  async fn enqueue(&self, write: QueuedWrite) -> Result<()> {
    let payload = serde_json::to_string(&write.payload)?;
    let now = format_timestamp(timestamps::now());

    let conn = self.conn()?;
    conn.execute(
      "INSERT INTO offline_writes
         (entity_type, operation, durable_id, public_id, payload, status, attempts,
          created_at, updated_at)
       VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?)",
      params![
        write.entity_type,
        write.operation.as_str(),
        write.durable_id,
        write.public_id,
        payload,
        now,
        now
      ],
    )?;

    info!(
      entity_type = %write.entity_type,
      operation = %write.operation,
      durable_id = %write.durable_id,
      "Queued offline write"
    );
    Ok(())
  }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<std::result::Result<QueueItem, String>> {
  let id: i64 = row.get(0)?;
  let operation: String = row.get(2)?;
  let payload: String = row.get(5)?;
  let status: String = row.get(6)?;
  let created_at: String = row.get(9)?;

  let Some(operation) = WriteOperation::parse(&operation) else {
    return Ok(Err(format!("row {}: unknown operation {:?}", id, operation)));
  };
  let payload: Value = match serde_json::from_str(&payload) {
    Ok(value) => value,
    Err(e) => return Ok(Err(format!("row {}: {}", id, e))),
  };

  Ok(Ok(QueueItem {
    id,
    write: QueuedWrite {
      entity_type: row.get(1)?,
      operation,
      durable_id: row.get(3)?,
      public_id: row.get(4)?,
      payload,
    },
    status: QueueStatus::from(status.as_str()),
    attempts: row.get(7)?,
    last_error: row.get(8)?,
    created_at: parse_timestamp("createdAt", &created_at).ok().flatten(),
  }))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn write(op: WriteOperation, id: &str) -> QueuedWrite {
    QueuedWrite {
      entity_type: "note".to_string(),
      operation: op,
      durable_id: id.to_string(),
      public_id: None,
      payload: json!({ "durableId": id, "name": "N" }),
    }
  }

  #[tokio::test]
  async fn test_enqueue_then_pending() {
    let queue = SqliteOfflineQueue::open_in_memory().unwrap();
    queue.enqueue(write(WriteOperation::Create, "a")).await.unwrap();
    queue.enqueue(write(WriteOperation::Delete, "b")).await.unwrap();

    let pending = queue.pending().unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].write, write(WriteOperation::Create, "a"));
    assert_eq!(pending[0].status, QueueStatus::Pending);
    assert_eq!(pending[1].write.operation, WriteOperation::Delete);
    assert!(pending[0].created_at.is_some());
  }

  #[tokio::test]
  async fn test_failures_progress_to_failed() {
    let queue = SqliteOfflineQueue::open_in_memory()
      .unwrap()
      .with_max_attempts(2);
    queue.enqueue(write(WriteOperation::Update, "a")).await.unwrap();
    let id = queue.pending().unwrap()[0].id;

    assert_eq!(
      queue.record_failure(id, "timeout").unwrap(),
      QueueStatus::Retrying
    );
    assert_eq!(queue.pending().unwrap()[0].attempts, 1);

    assert_eq!(
      queue.record_failure(id, "timeout again").unwrap(),
      QueueStatus::Failed
    );
    assert!(queue.pending().unwrap().is_empty());

    let failed = queue.failed().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].last_error.as_deref(), Some("timeout again"));
  }

  #[tokio::test]
  async fn test_complete_removes_write() {
    let queue = SqliteOfflineQueue::open_in_memory().unwrap();
    queue.enqueue(write(WriteOperation::Create, "a")).await.unwrap();
    let id = queue.pending().unwrap()[0].id;

    queue.complete(id).unwrap();
    assert!(queue.pending().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_undecodable_rows_are_skipped() {
    let queue = SqliteOfflineQueue::open_in_memory().unwrap();
    queue.enqueue(write(WriteOperation::Create, "a")).await.unwrap();
    queue
      .conn()
      .unwrap()
      .execute(
        "INSERT INTO offline_writes
           (entity_type, operation, durable_id, payload, created_at, updated_at)
         VALUES ('note', 'upsert', 'b', '{}', '', '')",
        [],
      )
      .unwrap();
    queue.enqueue(write(WriteOperation::Delete, "c")).await.unwrap();

    let ids: Vec<String> = queue
      .pending()
      .unwrap()
      .into_iter()
      .map(|item| item.write.durable_id)
      .collect();
    assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
  }

  #[test]
  fn test_record_failure_unknown_id() {
    let queue = SqliteOfflineQueue::open_in_memory().unwrap();
    assert!(matches!(
      queue.record_failure(99, "x"),
      Err(SyncError::NotFound { .. })
    ));
  }
}
