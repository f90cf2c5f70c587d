//! Collaborators the cache talks to: the remote authority, the offline write queue,
//! the connectivity signal and the change notifier.

mod connectivity;
mod notify;
pub mod queue;
mod remote;

pub use connectivity::{Connectivity, ConnectivityFlag};
pub use notify::{ChangeEvent, ChangeNotifier};
pub use queue::{
  OfflineQueue, QueueItem, QueueStatus, QueuedWrite, SqliteOfflineQueue, WriteOperation,
};
pub use remote::RemoteSource;
