//! The identity and timestamp contract every cached entity satisfies.
//!
//! Entity types own their business fields; the engine only ever looks at the
//! [`EntityIdentity`] and [`Timestamps`] exposed through [`SyncEntity`].

mod identity;
pub mod timestamps;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

pub use identity::EntityIdentity;
pub use timestamps::{format_timestamp, parse_timestamp, Timestamps};

/// Which storage partition family an entity type lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityScope {
  /// Belongs to the signed-in account (or the guest, when nobody is signed in).
  #[default]
  Account,
  /// Shared reference data, identical for every account.
  Catalog,
}

/// Trait for entities that can be cached and synchronized.
///
/// Implementors typically embed `#[serde(flatten)]` identity and timestamp fields so the
/// persisted record reads `{"durableId": .., "publicId": .., "createdAt": .., ...}`.
pub trait SyncEntity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Entity type name, used as the storage key and notification topic (e.g. "recipe").
  fn entity_type() -> &'static str;

  fn scope() -> EntityScope {
    EntityScope::Account
  }

  fn identity(&self) -> &EntityIdentity;

  fn identity_mut(&mut self) -> &mut EntityIdentity;

  fn timestamps(&self) -> &Timestamps;

  fn timestamps_mut(&mut self) -> &mut Timestamps;

  /// Business-level admission check, on top of the identity check. Records failing it
  /// are dropped when read back from storage.
  fn has_required_fields(&self) -> bool {
    true
  }

  fn is_tombstone(&self) -> bool {
    self.timestamps().is_tombstone()
  }

  fn updated_at(&self) -> Option<DateTime<Utc>> {
    self.timestamps().updated_at
  }

  fn is_admissible(&self) -> bool {
    self.identity().is_admissible() && self.has_required_fields()
  }
}
