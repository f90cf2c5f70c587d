use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::cache::{FreshnessPolicy, FreshnessTable, Session, SqliteStorage, StoragePartition};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  /// Cache database path (defaults to <data_dir>/larder/cache.db)
  pub database: Option<PathBuf>,
  /// Signed-in account id. Absent means a guest session.
  pub account: Option<String>,
  #[serde(default)]
  pub freshness: FreshnessConfig,
  /// Entity types stored in the shared catalog partition
  #[serde(default)]
  pub catalog_types: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FreshnessConfig {
  #[serde(default)]
  pub default: PolicyConfig,
  /// Per entity type overrides
  #[serde(default)]
  pub types: BTreeMap<String, PolicyConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
  #[serde(default = "default_stale_after_secs")]
  pub stale_after_secs: u64,
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
}

fn default_stale_after_secs() -> u64 {
  300
}

fn default_ttl_secs() -> u64 {
  3600
}

impl Default for PolicyConfig {
  fn default() -> Self {
    Self {
      stale_after_secs: default_stale_after_secs(),
      ttl_secs: default_ttl_secs(),
    }
  }
}

impl PolicyConfig {
  fn to_policy(self, name: &str) -> Result<FreshnessPolicy> {
    let seconds = |secs: u64| {
      i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| eyre!("Freshness for {}: {} seconds is out of range", name, secs))
    };

    FreshnessPolicy::new(seconds(self.stale_after_secs)?, seconds(self.ttl_secs)?)
      .map_err(|e| eyre!("Freshness for {}: {}", name, e))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./larder.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/larder/config.yaml
  ///
  /// Without an explicit path, a missing file means defaults (guest session).
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("larder.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("larder").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Parse and validate YAML configuration text.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.freshness_table()?;
    Ok(config)
  }

  /// Freshness policies, validated.
  pub fn freshness_table(&self) -> Result<FreshnessTable> {
    let mut table = FreshnessTable::new(self.freshness.default.to_policy("default")?);
    for (entity_type, policy) in &self.freshness.types {
      table = table.with_policy(entity_type.clone(), policy.to_policy(entity_type)?);
    }
    Ok(table)
  }

  pub fn session(&self) -> Session {
    match self.account.as_deref().map(str::trim) {
      Some(account_id) if !account_id.is_empty() => Session::SignedIn {
        account_id: account_id.to_string(),
      },
      _ => Session::Guest,
    }
  }

  /// Partition a type name lives in under the configured session.
  pub fn partition_for(&self, entity_type: &str) -> StoragePartition {
    if self.catalog_types.contains(entity_type) {
      return StoragePartition::Catalog;
    }
    match self.session() {
      Session::SignedIn { account_id } => StoragePartition::for_account(&account_id),
      Session::Guest => StoragePartition::Guest,
    }
  }

  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => Ok(SqliteStorage::default_path()?),
    }
  }
}
