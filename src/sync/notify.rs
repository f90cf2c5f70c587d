//! "Something changed" notifications, one topic per entity type.

use tokio::sync::broadcast;
use tracing::trace;

/// A collection of this entity type changed; re-read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
  pub entity_type: &'static str,
}

/// Fire-and-forget change notifier.
///
/// Publishing with no subscribers is fine. Slow subscribers may lag and miss events,
/// which is harmless since every event means the same thing: re-read.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
  tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
  pub fn new(capacity: usize) -> Self {
    let (tx, _rx) = broadcast::channel(capacity);
    Self { tx }
  }

  pub fn notify(&self, entity_type: &'static str) {
    if self.tx.send(ChangeEvent { entity_type }).is_err() {
      trace!(entity_type, "No subscribers for change notification");
    }
  }

  /// Every future notification, for all entity types.
  pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
    self.tx.subscribe()
  }
}

impl Default for ChangeNotifier {
  fn default() -> Self {
    Self::new(256)
  }
}
