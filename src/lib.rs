//! Local-first entity cache that stays eventually consistent with a remote authority.

pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod logging;
pub mod sync;

#[cfg(test)]
mod testing;

pub use cache::{CacheLayer, CacheResult, CacheSource, EntityCache, FreshnessState};
pub use entity::{EntityIdentity, EntityScope, SyncEntity, Timestamps};
pub use error::{RemoteError, Result, SyncError, TimestampError};
