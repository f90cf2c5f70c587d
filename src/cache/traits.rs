//! Result types for cache reads.

use chrono::{DateTime, Utc};

use super::freshness::FreshnessState;

/// Result from a cache read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// Freshness of the cached collection when the read started
  pub freshness: FreshnessState,
  /// When the collection was last synced, after the read
  pub last_synced_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Data that was just fetched, merged and written back.
  pub fn from_network(
    data: T,
    freshness: FreshnessState,
    last_synced_at: Option<DateTime<Utc>>,
  ) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      freshness,
      last_synced_at,
    }
  }

  /// Cached data served as-is. `refreshing` marks a stale read with a background
  /// refresh kicked off.
  pub fn from_cache(
    data: T,
    freshness: FreshnessState,
    last_synced_at: Option<DateTime<Utc>>,
    refreshing: bool,
  ) -> Self {
    Self {
      data,
      source: if refreshing {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      freshness,
      last_synced_at,
    }
  }

  /// Cached data served because the remote was not an option: offline, local-only
  /// session, or the fetch failed.
  pub fn offline(
    data: T,
    freshness: FreshnessState,
    last_synced_at: Option<DateTime<Utc>>,
  ) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      freshness,
      last_synced_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network, merged into the cache
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache, stale, with a background refresh in progress
  CacheStale,
  /// Remote unavailable, serving cached data
  Offline,
}
