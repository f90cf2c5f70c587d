//! Freshness classification of cached collections.
//!
//! A collection's age is `now - last_synced_at`, compared against two per-type
//! thresholds. Each band includes its upper bound: an age exactly equal to the stale
//! threshold is still fresh, and an age exactly equal to the TTL is still stale.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessState {
  Fresh,
  Stale,
  Expired,
  /// Never synced (or invalidated).
  Missing,
}

impl FreshnessState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Fresh => "fresh",
      Self::Stale => "stale",
      Self::Expired => "expired",
      Self::Missing => "missing",
    }
  }
}

impl fmt::Display for FreshnessState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Thresholds for one entity type. `stale_after` is always shorter than `ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
  stale_after: Duration,
  ttl: Duration,
}

impl FreshnessPolicy {
  pub fn new(stale_after: Duration, ttl: Duration) -> Result<Self> {
    if stale_after >= ttl {
      return Err(SyncError::Config(format!(
        "stale threshold ({}s) must be shorter than ttl ({}s)",
        stale_after.num_seconds(),
        ttl.num_seconds()
      )));
    }
    Ok(Self { stale_after, ttl })
  }

  pub fn stale_after(&self) -> Duration {
    self.stale_after
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  /// Classify a collection last synced at `last_synced_at`, as seen at `now`.
  pub fn classify(
    &self,
    last_synced_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
  ) -> FreshnessState {
    let Some(synced) = last_synced_at else {
      return FreshnessState::Missing;
    };

    // A sync stamped in the future (clock skew) counts as age zero.
    let age = now - synced;
    if age <= self.stale_after {
      FreshnessState::Fresh
    } else if age <= self.ttl {
      FreshnessState::Stale
    } else {
      FreshnessState::Expired
    }
  }
}

impl Default for FreshnessPolicy {
  fn default() -> Self {
    Self {
      stale_after: Duration::minutes(5),
      ttl: Duration::hours(1),
    }
  }
}

/// Freshness policies by entity type, with a fallback for unlisted types.
#[derive(Debug, Clone, Default)]
pub struct FreshnessTable {
  default: FreshnessPolicy,
  by_type: HashMap<String, FreshnessPolicy>,
}

impl FreshnessTable {
  pub fn new(default: FreshnessPolicy) -> Self {
    Self {
      default,
      by_type: HashMap::new(),
    }
  }

  pub fn with_policy(mut self, entity_type: impl Into<String>, policy: FreshnessPolicy) -> Self {
    self.by_type.insert(entity_type.into(), policy);
    self
  }

  pub fn policy(&self, entity_type: &str) -> FreshnessPolicy {
    self
      .by_type
      .get(entity_type)
      .copied()
      .unwrap_or(self.default)
  }

  pub fn classify(
    &self,
    entity_type: &str,
    last_synced_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
  ) -> FreshnessState {
    self.policy(entity_type).classify(last_synced_at, now)
  }
}

/// Advisory refresh intent for a state.
///
/// Informational only: for `Expired` it answers true even offline, while the read path
/// serves the cached collection without fetching in that case.
pub fn should_refresh(state: FreshnessState, is_online: bool) -> bool {
  match state {
    FreshnessState::Fresh | FreshnessState::Missing => false,
    FreshnessState::Stale => is_online,
    FreshnessState::Expired => true,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::t;

  fn policy() -> FreshnessPolicy {
    FreshnessPolicy::new(Duration::minutes(5), Duration::minutes(10)).unwrap()
  }

  #[test]
  fn test_missing_without_sync() {
    assert_eq!(policy().classify(None, t(0)), FreshnessState::Missing);
  }

  #[test]
  fn test_band_boundaries() {
    let p = policy();
    let synced = Some(t(0));
    let ms = Duration::milliseconds(1);

    assert_eq!(p.classify(synced, t(0)), FreshnessState::Fresh);
    assert_eq!(p.classify(synced, t(5)), FreshnessState::Fresh);
    assert_eq!(p.classify(synced, t(5) + ms), FreshnessState::Stale);
    assert_eq!(p.classify(synced, t(10)), FreshnessState::Stale);
    assert_eq!(p.classify(synced, t(10) + ms), FreshnessState::Expired);
  }

  #[test]
  fn test_future_sync_is_fresh() {
    assert_eq!(policy().classify(Some(t(3)), t(0)), FreshnessState::Fresh);
  }

  #[test]
  fn test_policy_rejects_inverted_thresholds() {
    assert!(FreshnessPolicy::new(Duration::minutes(10), Duration::minutes(10)).is_err());
    assert!(FreshnessPolicy::new(Duration::minutes(11), Duration::minutes(10)).is_err());
  }

  #[test]
  fn test_table_falls_back_to_default() {
    let table = FreshnessTable::new(policy()).with_policy(
      "catalog_item",
      FreshnessPolicy::new(Duration::hours(1), Duration::hours(24)).unwrap(),
    );

    assert_eq!(
      table.classify("note", Some(t(0)), t(30)),
      FreshnessState::Expired
    );
    assert_eq!(
      table.classify("catalog_item", Some(t(0)), t(30)),
      FreshnessState::Fresh
    );
  }

  #[test]
  fn test_should_refresh_advisory() {
    for online in [true, false] {
      assert!(!should_refresh(FreshnessState::Fresh, online));
      assert!(!should_refresh(FreshnessState::Missing, online));
      assert!(should_refresh(FreshnessState::Expired, online));
      assert_eq!(should_refresh(FreshnessState::Stale, online), online);
    }
  }
}
