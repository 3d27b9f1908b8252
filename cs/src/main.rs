use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use memory::cli::{Cli, Command};
use memory::{Config, ContextType, DurableStore, EntityRef, LocalStore, MemoryManager, MemoryNode, SqliteDurableStore};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskdaemon")
        .join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = fs::File::create(log_dir.join("memory.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Logging initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    debug!(command = ?cli.command, "main: dispatching command");

    if let Some(parent) = config.local_store_path.parent() {
        fs::create_dir_all(parent).context("Failed to create local store directory")?;
    }
    if let Some(parent) = config.durable_store_path.parent() {
        fs::create_dir_all(parent).context("Failed to create durable store directory")?;
    }

    let local = LocalStore::open(&config.local_store_path).context("Failed to open local store")?;
    let durable: Arc<dyn DurableStore> =
        Arc::new(SqliteDurableStore::open(&config.durable_store_path).context("Failed to open durable store")?);
    let manager = MemoryManager::spawn(config, local, durable);

    match cli.command {
        Command::Store {
            scope,
            user_id,
            context_type,
            content,
            summary,
            tags,
            entity_system,
            entity_id,
            entity_type,
        } => {
            let content: serde_json::Value = serde_json::from_str(&content).context("--content must be valid JSON")?;
            let ctx_type: ContextType = context_type.into();
            let mut node = MemoryNode::new(uuid::Uuid::now_v7().to_string(), content, ctx_type).with_tags(tags);
            if let Some(summary) = summary {
                node = node.with_summary(summary);
            }
            if let Some(entity_id) = entity_id {
                node = node.with_entity_ref(EntityRef {
                    entity_id,
                    entity_type,
                    entity_system: entity_system.unwrap_or_default(),
                });
            }

            let now = taskstore::now_ms();
            let id = manager.store(&scope, user_id.as_deref(), node, now).await?;
            println!("{} stored node {}", "✓".green(), id.cyan());
        }

        Command::Relate { scope, from, to, label, strength } => {
            manager.add_relationship(&scope, &from, &to, label.into(), strength).await?;
            println!("{} linked {} -> {}", "✓".green(), from.cyan(), to.cyan());
        }

        Command::Query { scope, query, max_results } => {
            let now = taskstore::now_ms();
            let results = manager.retrieve_relevant(&scope, &query, max_results, now).await?;
            if results.is_empty() {
                println!("No matching memories");
            }
            for r in results {
                println!(
                    "{}  {:.3}  {}",
                    r.node.id.yellow(),
                    r.score.total,
                    if r.node.summary.is_empty() { r.node.content.to_string() } else { r.node.summary }
                );
            }
        }

        Command::Related { scope, node_id, max_distance, label } => {
            let nodes = manager
                .get_related_nodes(&scope, &node_id, max_distance, label.map(Into::into))
                .await?;
            for node in nodes {
                println!("{}  {}", node.id.yellow(), node.summary);
            }
        }

        Command::Important { scope, top_n } => {
            let now = taskstore::now_ms();
            let ranked = manager.find_important_memories(&scope, top_n, now).await?;
            for (node, score) in ranked {
                println!("{:.4}  {}  {}", score, node.id.yellow(), node.summary);
            }
        }

        Command::Clusters { scope } => {
            let now = taskstore::now_ms();
            let clusters = manager.find_memory_clusters(&scope, now).await?;
            for (i, cluster) in clusters.iter().enumerate() {
                println!("{} ({} nodes)", format!("cluster {i}").cyan(), cluster.len());
                for node in cluster {
                    println!("  {}  {}", node.id.yellow(), node.summary);
                }
            }
        }

        Command::Bridges { scope, top_n } => {
            let now = taskstore::now_ms();
            let ranked = manager.find_bridge_memories(&scope, top_n, now).await?;
            for (node, score) in ranked {
                println!("{:.4}  {}  {}", score, node.id.yellow(), node.summary);
            }
        }

        Command::Cleanup => {
            let now = taskstore::now_ms();
            let evicted = manager.cleanup_idle_scopes(now).await?;
            println!("{} evicted {} idle scope(s)", "✓".green(), evicted);
        }
    }

    manager.shutdown().await.ok();
    Ok(())
}
