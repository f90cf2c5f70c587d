//! Conflict resolution between the local collection and an incremental remote batch.
//!
//! Rules, per record in the remote batch (matched by either identifier):
//!
//! 1. Remote tombstone: the record is removed from the collection, and later records
//!    for the same id in the batch are ignored.
//! 2. Local tombstone: the local tombstone is kept, the remote record ignored.
//! 3. No local record: the remote record is added.
//! 4. Both live: last write wins by `updated_at`, the remote wins ties.
//!
//! Local records the batch does not mention are left alone. Absence from a batch is
//! never a deletion; only tombstones delete. Local tombstones stay in the stored
//! collection (so they keep dominating later batches) but are never part of the
//! active view.

use std::collections::{HashMap, HashSet};

use crate::entity::{EntityIdentity, SyncEntity};

/// Counts of what a merge did, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
  pub added: usize,
  pub updated: usize,
  pub removed: usize,
  /// Remote records ignored because the local side was newer or deleted.
  pub kept_local: usize,
}

#[derive(Debug, Clone)]
pub struct Merged<T> {
  /// Next stored collection, local tombstones included.
  pub entities: Vec<T>,
  pub stats: MergeStats,
}

impl<T: SyncEntity> Merged<T> {
  /// The merged collection without tombstones.
  pub fn active(&self) -> Vec<T> {
    active(&self.entities)
  }
}

/// Merge a remote batch into the local collection.
pub fn merge<T: SyncEntity>(local: Vec<T>, remote: Vec<T>) -> Merged<T> {
  let mut slots: Vec<Option<T>> = local.into_iter().map(Some).collect();
  let mut index: HashMap<String, usize> = HashMap::new();
  for (i, entity) in slots.iter().enumerate() {
    if let Some(entity) = entity {
      index_identity(&mut index, entity.identity(), i);
    }
  }

  let mut stats = MergeStats::default();
  // Ids erased by a remote tombstone stay erased for the rest of the batch.
  let mut erased: HashSet<String> = HashSet::new();

  for incoming in remote {
    let slot = lookup(&index, incoming.identity()).filter(|&i| slots[i].is_some());

    if incoming.is_tombstone() {
      if let Some(i) = slot {
        if let Some(local) = slots[i].take() {
          erased.extend(ids_of(local.identity()));
        }
        stats.removed += 1;
      }
      erased.extend(ids_of(incoming.identity()));
      continue;
    }

    if ids_of(incoming.identity()).any(|id| erased.contains(&id)) {
      continue;
    }

    let Some(i) = slot else {
      index_identity(&mut index, incoming.identity(), slots.len());
      slots.push(Some(incoming));
      stats.added += 1;
      continue;
    };

    let Some(current) = slots[i].as_mut() else {
      continue;
    };

    if current.is_tombstone() {
      stats.kept_local += 1;
      continue;
    }

    let identity = current.identity().reconciled_with(incoming.identity());
    if current.updated_at() > incoming.updated_at() {
      *current.identity_mut() = identity;
      stats.kept_local += 1;
    } else {
      let mut next = incoming;
      *next.identity_mut() = identity;
      *current = next;
      stats.updated += 1;
    }
    index_identity(&mut index, current.identity(), i);
  }

  Merged {
    entities: slots.into_iter().flatten().collect(),
    stats,
  }
}

/// Records that are not tombstones.
pub fn active<T: SyncEntity>(entities: &[T]) -> Vec<T> {
  entities
    .iter()
    .filter(|e| !e.is_tombstone())
    .cloned()
    .collect()
}

/// Position of the record matching `id` (durable or public).
pub fn position<T: SyncEntity>(entities: &[T], id: &str) -> Option<usize> {
  entities.iter().position(|e| e.identity().matches(id))
}

/// Replace the record with the same identity, or append.
pub fn upsert<T: SyncEntity>(entities: &mut Vec<T>, entity: T) {
  match entities
    .iter()
    .position(|e| e.identity().same_entity(entity.identity()))
  {
    Some(i) => entities[i] = entity,
    None => entities.push(entity),
  }
}

fn index_identity(index: &mut HashMap<String, usize>, identity: &EntityIdentity, at: usize) {
  for id in [&identity.durable_id, &identity.public_id] {
    if !id.is_empty() {
      index.insert(id.clone(), at);
    }
  }
}

fn ids_of(identity: &EntityIdentity) -> impl Iterator<Item = String> + '_ {
  [&identity.durable_id, &identity.public_id]
    .into_iter()
    .filter(|id| !id.is_empty())
    .cloned()
}

fn lookup(index: &HashMap<String, usize>, identity: &EntityIdentity) -> Option<usize> {
  [&identity.durable_id, &identity.public_id]
    .into_iter()
    .filter(|id| !id.is_empty())
    .find_map(|id| index.get(id.as_str()).copied())
}
