use clap::{Parser, Subcommand};
use color_eyre::Result;
use serde_json::Value;
use std::path::PathBuf;

use larder::cache::{
  read_metadata, CacheStorage, FreshnessTable, Session, SqliteStorage, StoragePartition,
};
use larder::config::Config;
use larder::entity::{format_timestamp, timestamps};
use larder::logging;
use larder::sync::{QueueItem, SqliteOfflineQueue};

#[derive(Parser, Debug)]
#[command(name = "larder")]
#[command(about = "Inspect and maintain a local-first entity cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/larder/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Show cached collections and their freshness
  Status {
    /// Entity types to show (default: everything cached)
    types: Vec<String>,
  },
  /// Clear the cached collection and metadata for an entity type
  Invalidate {
    entity_type: String,
  },
  /// List queued offline writes
  Queue {
    /// Show writes that gave up instead of pending ones
    #[arg(long)]
    failed: bool,
  },
}

fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _guard = logging::init(&logging::default_log_dir()?)?;

  let database = config.database_path()?;
  tracing::debug!(database = %database.display(), "Opening cache");

  match args.command {
    Command::Status { types } => {
      let storage = SqliteStorage::open_at(&database)?;
      status(&config, &storage, types)
    }
    Command::Invalidate { entity_type } => {
      let storage = SqliteStorage::open_at(&database)?;
      let partition = config.partition_for(&entity_type);
      storage.invalidate(&partition, &entity_type)?;
      tracing::info!(entity_type, partition = %partition, "Invalidated cache");
      println!("Invalidated {} in {}", entity_type, partition);
      Ok(())
    }
    Command::Queue { failed } => {
      let queue = SqliteOfflineQueue::open_at(&database)?;
      let items = if failed { queue.failed()? } else { queue.pending()? };
      print_queue(&items);
      Ok(())
    }
  }
}

fn status(config: &Config, storage: &SqliteStorage, types: Vec<String>) -> Result<()> {
  let table = config.freshness_table()?;
  let types = if types.is_empty() {
    cached_types(config, storage)?
  } else {
    types
  };

  if types.is_empty() {
    println!("Nothing cached");
    return Ok(());
  }

  println!(
    "{:<20} {:<20} {:>7} {:>7}  {:<8} {}",
    "TYPE", "PARTITION", "RECORDS", "ACTIVE", "STATE", "LAST SYNCED"
  );
  for entity_type in types {
    let partition = config.partition_for(&entity_type);
    let summary = summarize(storage, &table, &partition, &entity_type)?;
    println!(
      "{:<20} {:<20} {:>7} {:>7}  {:<8} {}",
      entity_type,
      partition.to_string(),
      summary.records,
      summary.active,
      summary.state,
      summary
        .last_synced_at
        .unwrap_or_else(|| "never".to_string())
    );
  }
  Ok(())
}

/// Types cached in the session partition plus the catalog.
fn cached_types(config: &Config, storage: &SqliteStorage) -> Result<Vec<String>> {
  let session_partition = match config.session() {
    Session::SignedIn { account_id } => StoragePartition::for_account(&account_id),
    Session::Guest => StoragePartition::Guest,
  };

  let mut types = storage.entity_types(&session_partition)?;
  types.extend(storage.entity_types(&StoragePartition::Catalog)?);
  types.sort();
  types.dedup();
  Ok(types)
}

struct Summary {
  records: usize,
  active: usize,
  state: String,
  last_synced_at: Option<String>,
}

/// Untyped look at a stored collection: counts records and tombstones by the
/// persisted `deletedAt` field.
fn summarize(
  storage: &SqliteStorage,
  table: &FreshnessTable,
  partition: &StoragePartition,
  entity_type: &str,
) -> Result<Summary> {
  let records = match storage.load_collection(partition, entity_type)? {
    Some(text) => match serde_json::from_str::<Value>(&text) {
      Ok(Value::Array(records)) => records,
      _ => Vec::new(),
    },
    None => Vec::new(),
  };
  let active = records
    .iter()
    .filter(|r| {
      r.get(timestamps::DELETED_AT)
        .and_then(Value::as_str)
        .map_or(true, |s| s.trim().is_empty())
    })
    .count();

  let metadata = read_metadata(storage, partition, entity_type);
  let state = table.classify(entity_type, metadata.last_synced_at, timestamps::now());

  Ok(Summary {
    records: records.len(),
    active,
    state: state.to_string(),
    last_synced_at: metadata.last_synced_at.map(format_timestamp),
  })
}

fn print_queue(items: &[QueueItem]) {
  if items.is_empty() {
    println!("Queue is empty");
    return;
  }

  println!(
    "{:>5}  {:<8} {:<16} {:<8} {:>8}  {}",
    "ID", "STATUS", "TYPE", "OP", "ATTEMPTS", "ENTITY"
  );
  for item in items {
    println!(
      "{:>5}  {:<8} {:<16} {:<8} {:>8}  {}",
      item.id,
      item.status.as_str(),
      item.write.entity_type,
      item.write.operation.as_str(),
      item.attempts,
      item
        .write
        .public_id
        .as_deref()
        .unwrap_or(&item.write.durable_id)
    );
    if let Some(error) = &item.last_error {
      println!("       last error: {}", error);
    }
  }
}
