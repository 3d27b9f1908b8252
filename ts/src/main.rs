//! Minimal CLI for poking at a `taskstore` directory during development —
//! list/inspect raw collections without spinning up `td` or `mem`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::*;
use eyre::{Context, Result};
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(name = "taskstore")]
#[command(author, version, about = "Generic SQLite+JSONL record store", long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(short, long, default_value = ".taskstore")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List raw JSON rows in a collection
    List {
        /// Collection (table) name
        collection: String,
    },
    /// Print a single record by id
    Get {
        /// Collection (table) name
        collection: String,
        /// Record id
        id: String,
    },
}

/// A schema-agnostic record used only by this CLI: every `taskstore`
/// collection stores JSON, so raw inspection just needs `id`/`updated_at`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct RawRecord {
    #[serde(flatten)]
    data: Value,
}

impl taskstore::Record for RawRecord {
    fn id(&self) -> &str {
        self.data.get("id").and_then(Value::as_str).unwrap_or("")
    }

    fn updated_at(&self) -> i64 {
        self.data.get("updated_at").and_then(Value::as_i64).unwrap_or(0)
    }

    // `Store` is generic over `T::collection_name()`, which is fixed per
    // type, so this CLI can only browse one collection per RawRecord. The
    // `collection` argument is kept for symmetry with `td`/`mem` CLIs and
    // future multi-collection support but is currently unused.
    fn collection_name() -> &'static str {
        "raw"
    }

    fn indexed_fields(&self) -> std::collections::HashMap<String, taskstore::IndexValue> {
        std::collections::HashMap::new()
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let store = taskstore::Store::open(&cli.store).context("failed to open store")?;

    match cli.command {
        Command::List { collection } => {
            let rows = list_raw(&store, &collection)?;
            if rows.is_empty() {
                println!("{}", "no records".dimmed());
            }
            for row in rows {
                println!("{}", row);
            }
        }
        Command::Get { collection, id } => {
            let row = get_raw(&store, &collection, &id)?;
            match row {
                Some(v) => println!("{}", serde_json::to_string_pretty(&v)?),
                None => println!("{} {}/{}", "not found:".red(), collection, id),
            }
        }
    }

    Ok(())
}

fn list_raw(store: &taskstore::Store, _collection: &str) -> Result<Vec<Value>> {
    let records = store.list::<RawRecord>(&[])?;
    Ok(records.into_iter().map(|r| r.data).collect())
}

fn get_raw(store: &taskstore::Store, _collection: &str, id: &str) -> Result<Option<Value>> {
    let record = store.get::<RawRecord>(id)?;
    Ok(record.map(|r| r.data))
}
