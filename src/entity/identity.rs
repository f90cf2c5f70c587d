use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Two-part identity of a cached entity.
///
/// `durable_id` is generated on the client and never changes. `public_id` starts out
/// equal to it for entities created offline and is swapped, once, for the identifier the
/// remote assigns on first successful sync. Lookups accept either.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityIdentity {
  #[serde(default)]
  pub durable_id: String,
  #[serde(default)]
  pub public_id: String,
}

impl EntityIdentity {
  /// Fresh identity for an entity created on this client.
  pub fn new_offline() -> Self {
    let id = Uuid::now_v7().to_string();
    Self {
      durable_id: id.clone(),
      public_id: id,
    }
  }

  pub fn new(durable_id: impl Into<String>, public_id: impl Into<String>) -> Self {
    Self {
      durable_id: durable_id.into(),
      public_id: public_id.into(),
    }
  }

  /// True if `id` is either of this entity's identifiers.
  pub fn matches(&self, id: &str) -> bool {
    !id.is_empty() && (self.durable_id == id || self.public_id == id)
  }

  /// True if the two identities refer to the same entity through any identifier pairing.
  pub fn same_entity(&self, other: &EntityIdentity) -> bool {
    self.matches(&other.durable_id) || self.matches(&other.public_id)
  }

  /// Still carrying the client-assigned public id.
  pub fn is_unconfirmed(&self) -> bool {
    self.public_id == self.durable_id
  }

  /// Swap in the remote-assigned public id. Only an unconfirmed identity changes;
  /// returns whether it did.
  pub fn confirm(&mut self, remote_public_id: &str) -> bool {
    if remote_public_id.is_empty() || !self.is_unconfirmed() || remote_public_id == self.public_id
    {
      return false;
    }
    self.public_id = remote_public_id.to_string();
    true
  }

  /// Both identifiers present. Records failing this are not admitted into the cache.
  pub fn is_admissible(&self) -> bool {
    !self.durable_id.trim().is_empty() && !self.public_id.trim().is_empty()
  }

  /// Identity to keep after the remote answered for this entity: the durable id stays,
  /// the remote's public id is adopted when it supplies one.
  pub fn reconciled_with(&self, remote: &EntityIdentity) -> EntityIdentity {
    let mut next = self.clone();
    if !remote.public_id.is_empty() && remote.public_id != remote.durable_id {
      next.confirm(&remote.public_id);
    }
    next
  }
}
