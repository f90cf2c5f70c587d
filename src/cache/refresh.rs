//! Deduplicated background refresh.
//!
//! At most one refresh per key (partition + entity type) is in flight. Later requests
//! join the outstanding one and observe the same outcome.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::merge::merge;
use super::partition::StoragePartition;
use super::storage::LocalStore;
use crate::entity::SyncEntity;
use crate::error::{Result, SyncError};
use crate::sync::{ChangeNotifier, RemoteSource};

/// How a refresh ended. Failures are logged where they happen; callers only learn
/// that the cache was left as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
  Refreshed { active: usize },
  Failed,
}

/// Handle on an in-flight refresh. Cloneable; every clone resolves to the same outcome.
pub type RefreshHandle = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Default)]
struct InFlight {
  next_ticket: u64,
  entries: HashMap<String, (u64, RefreshHandle)>,
}

/// Tracks in-flight refreshes.
#[derive(Clone, Default)]
pub struct RefreshCoordinator {
  in_flight: Arc<Mutex<InFlight>>,
}

impl RefreshCoordinator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start a refresh for `key`, or join the one already running.
  ///
  /// `start` is only called when nothing is in flight. The new refresh is spawned onto
  /// the runtime, so it completes even if every caller drops its handle.
  pub fn refresh<F, Fut>(&self, key: &str, start: F) -> Result<RefreshHandle>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = RefreshOutcome> + Send + 'static,
  {
    let mut in_flight = self.in_flight.lock().map_err(SyncError::poisoned)?;
    if let Some((_, handle)) = in_flight.entries.get(key) {
      debug!(key, "Joining in-flight refresh");
      return Ok(handle.clone());
    }

    let ticket = in_flight.next_ticket;
    in_flight.next_ticket += 1;

    let registry = Arc::clone(&self.in_flight);
    let owned_key = key.to_string();
    let operation = start();
    let handle = async move {
      let outcome = operation.await;
      // Only clear our own entry; a cancel may have let a newer refresh take the key.
      if let Ok(mut in_flight) = registry.lock() {
        if matches!(in_flight.entries.get(&owned_key), Some((t, _)) if *t == ticket) {
          in_flight.entries.remove(&owned_key);
        }
      }
      outcome
    }
    .boxed()
    .shared();

    in_flight
      .entries
      .insert(key.to_string(), (ticket, handle.clone()));
    drop(in_flight);

    tokio::spawn(handle.clone());
    debug!(key, "Started refresh");
    Ok(handle)
  }

  /// The refresh currently in flight for `key`, if any.
  pub fn in_flight(&self, key: &str) -> Option<RefreshHandle> {
    self
      .in_flight
      .lock()
      .ok()
      .and_then(|in_flight| in_flight.entries.get(key).map(|(_, h)| h.clone()))
  }

  /// Forget the in-flight refresh for `key`.
  ///
  /// This only drops the bookkeeping: a fetch already underway still runs to completion
  /// (and still writes its result), but the next request starts a new refresh instead
  /// of joining it.
  pub fn cancel(&self, key: &str) -> bool {
    match self.in_flight.lock() {
      Ok(mut in_flight) => in_flight.entries.remove(key).is_some(),
      Err(_) => false,
    }
  }
}

/// One full refresh: fetch, merge against what is stored now, write back (stamping
/// `last_synced_at`), notify. Never returns an error; on any failure the stored
/// collection is left untouched.
pub async fn refresh_collection<T: SyncEntity>(
  store: LocalStore,
  remote: Arc<dyn RemoteSource<T>>,
  partition: StoragePartition,
  notifier: ChangeNotifier,
) -> RefreshOutcome {
  let entity_type = T::entity_type();

  let batch = match remote.fetch_all().await {
    Ok(batch) => batch,
    Err(e) => {
      warn!(entity_type, partition = %partition, error = %e, "Refresh fetch failed");
      return RefreshOutcome::Failed;
    }
  };

  let local: Vec<T> = store.read_in(&partition);
  let merged = merge(local, batch);
  let active = merged.active().len();

  if let Err(e) = store.write(&partition, &merged.entities) {
    warn!(entity_type, partition = %partition, error = %e, "Refresh write-back failed");
    return RefreshOutcome::Failed;
  }

  debug!(
    entity_type,
    partition = %partition,
    added = merged.stats.added,
    updated = merged.stats.updated,
    removed = merged.stats.removed,
    kept_local = merged.stats.kept_local,
    "Refreshed collection"
  );
  notifier.notify(entity_type);
  RefreshOutcome::Refreshed { active }
}
