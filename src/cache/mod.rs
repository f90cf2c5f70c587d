//! Local-first caching layer.
//!
//! Entity collections are cached per type and per storage partition. Reads are served
//! from the cache according to a freshness policy and refreshed in the background;
//! writes land locally first and are propagated to the remote (or queued) afterwards.

mod freshness;
mod layer;
mod merge;
mod partition;
mod refresh;
mod storage;
mod traits;

pub use freshness::{should_refresh, FreshnessPolicy, FreshnessState, FreshnessTable};
pub use layer::{CacheLayer, EntityCache};
pub use merge::{active, merge, MergeStats, Merged};
pub use partition::{PartitionResolver, Session, StoragePartition};
pub use refresh::{refresh_collection, RefreshCoordinator, RefreshHandle, RefreshOutcome};
pub use storage::{read_metadata, CacheMetadata, CacheStorage, LocalStore, SqliteStorage};
pub use traits::{CacheResult, CacheSource};
