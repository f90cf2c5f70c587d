use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// "Is the client currently online?", read at decision points.
pub trait Connectivity: Send + Sync {
  fn is_online(&self) -> bool;
}

/// Connectivity backed by a shared flag that the platform layer flips.
#[derive(Debug, Clone)]
pub struct ConnectivityFlag {
  online: Arc<AtomicBool>,
}

impl ConnectivityFlag {
  pub fn new(online: bool) -> Self {
    Self {
      online: Arc::new(AtomicBool::new(online)),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }
}

impl Connectivity for ConnectivityFlag {
  fn is_online(&self) -> bool {
    self.online.load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_clones_share_state() {
    let flag = ConnectivityFlag::new(true);
    let observer = flag.clone();
    flag.set_online(false);
    assert!(!observer.is_online());
  }
}
