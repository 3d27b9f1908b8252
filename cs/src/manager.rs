//! `MemoryManager` - actor that owns every scope's in-process [`MemoryGraph`].
//!
//! One scope is one conversational thread. Graphs are hydrated lazily: the
//! first command touching a thread loads its hot-store rows plus, if a
//! `user_id` is given, that user's durable (cross-thread) entities, and
//! keeps the assembled graph resident until `cleanup_idle_scopes` evicts it
//! (§4.5 "lazy hydration" / "thread retention").

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::config::Config;
use crate::edge::{EdgeLabel, MemoryEdge};
use crate::error::{MemoryError, Result};
use crate::graph::{MemoryGraph, RetrievalResult};
use crate::node::MemoryNode;
use crate::storage::{DurableStore, LocalStore};

/// Per-scope bookkeeping kept alongside the graph itself, for idle eviction.
struct ScopeEntry {
    graph: MemoryGraph,
    user_id: Option<String>,
    last_touched_ms: i64,
}

enum Command {
    Store {
        scope: String,
        user_id: Option<String>,
        node: MemoryNode,
        now_ms: i64,
        reply: oneshot::Sender<Result<String>>,
    },
    AddRelationship {
        scope: String,
        from: String,
        to: String,
        label: EdgeLabel,
        strength: f64,
        reply: oneshot::Sender<Result<()>>,
    },
    RetrieveRelevant {
        scope: String,
        query: String,
        max_results: usize,
        now_ms: i64,
        reply: oneshot::Sender<Result<Vec<RetrievalResult>>>,
    },
    GetRelated {
        scope: String,
        node_id: String,
        max_distance: usize,
        label_filter: Option<EdgeLabel>,
        reply: oneshot::Sender<Result<Vec<MemoryNode>>>,
    },
    FindImportant {
        scope: String,
        top_n: usize,
        now_ms: i64,
        reply: oneshot::Sender<Result<Vec<(MemoryNode, f64)>>>,
    },
    FindClusters {
        scope: String,
        now_ms: i64,
        reply: oneshot::Sender<Result<Vec<Vec<MemoryNode>>>>,
    },
    FindBridges {
        scope: String,
        top_n: usize,
        now_ms: i64,
        reply: oneshot::Sender<Result<Vec<(MemoryNode, f64)>>>,
    },
    CleanupIdle {
        now_ms: i64,
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// Handle to send commands to the `MemoryManager` actor. Cheap to clone;
/// every clone shares the same underlying graphs (§4.1 "single writer per
/// scope" via the actor's serialized command queue).
#[derive(Clone)]
pub struct MemoryManager {
    tx: mpsc::Sender<Command>,
}

impl MemoryManager {
    /// Spawn the actor, backed by the given hot/durable stores.
    pub fn spawn(config: Config, local: LocalStore, durable: Arc<dyn DurableStore>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(config, local, durable, rx));
        debug!("MemoryManager::spawn: actor started");
        Self { tx }
    }

    pub async fn store(&self, scope: &str, user_id: Option<&str>, node: MemoryNode, now_ms: i64) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Store {
                scope: scope.to_string(),
                user_id: user_id.map(str::to_string),
                node,
                now_ms,
                reply,
            })
            .await
            .map_err(channel_closed)?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn add_relationship(&self, scope: &str, from: &str, to: &str, label: EdgeLabel, strength: f64) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::AddRelationship {
                scope: scope.to_string(),
                from: from.to_string(),
                to: to.to_string(),
                label,
                strength,
                reply,
            })
            .await
            .map_err(channel_closed)?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn retrieve_relevant(&self, scope: &str, query: &str, max_results: usize, now_ms: i64) -> Result<Vec<RetrievalResult>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::RetrieveRelevant {
                scope: scope.to_string(),
                query: query.to_string(),
                max_results,
                now_ms,
                reply,
            })
            .await
            .map_err(channel_closed)?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn get_related_nodes(&self, scope: &str, node_id: &str, max_distance: usize, label_filter: Option<EdgeLabel>) -> Result<Vec<MemoryNode>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::GetRelated {
                scope: scope.to_string(),
                node_id: node_id.to_string(),
                max_distance,
                label_filter,
                reply,
            })
            .await
            .map_err(channel_closed)?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn find_important_memories(&self, scope: &str, top_n: usize, now_ms: i64) -> Result<Vec<(MemoryNode, f64)>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::FindImportant {
                scope: scope.to_string(),
                top_n,
                now_ms,
                reply,
            })
            .await
            .map_err(channel_closed)?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn find_memory_clusters(&self, scope: &str, now_ms: i64) -> Result<Vec<Vec<MemoryNode>>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::FindClusters {
                scope: scope.to_string(),
                now_ms,
                reply,
            })
            .await
            .map_err(channel_closed)?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn find_bridge_memories(&self, scope: &str, top_n: usize, now_ms: i64) -> Result<Vec<(MemoryNode, f64)>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::FindBridges {
                scope: scope.to_string(),
                top_n,
                now_ms,
                reply,
            })
            .await
            .map_err(channel_closed)?;
        rx.await.map_err(channel_closed)?
    }

    /// Evict scopes untouched for longer than `thread_retention_hours`,
    /// persisting their graphs to the hot store first. Returns the number
    /// of scopes evicted.
    pub async fn cleanup_idle_scopes(&self, now_ms: i64) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::CleanupIdle { now_ms, reply }).await.map_err(channel_closed)?;
        Ok(rx.await.unwrap_or(0))
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.tx.send(Command::Shutdown).await.map_err(channel_closed)
    }
}

fn channel_closed<T>(_: T) -> MemoryError {
    MemoryError::PersistedStoreUnavailable("MemoryManager actor channel closed".to_string())
}

async fn hydrate_scope(scope: &str, user_id: Option<&str>, config: &Config, local: &LocalStore, durable: &Arc<dyn DurableStore>, now_ms: i64) -> ScopeEntry {
    let mut graph = MemoryGraph::new(config.min_token_len);

    if let Ok(nodes) = local.load_nodes(scope) {
        for node in nodes {
            graph.store(node, now_ms);
        }
    }
    if let Ok(edges) = local.load_edges(scope) {
        for edge in edges {
            let _ = graph.add_relationship(&edge.from, &edge.to, edge.label, edge.strength);
        }
    }

    if let Some(user_id) = user_id {
        if let Ok(entities) = durable.load_entities(user_id).await {
            for entity in entities {
                graph.store(entity, now_ms);
            }
        }
    }

    ScopeEntry {
        graph,
        user_id: user_id.map(str::to_string),
        last_touched_ms: now_ms,
    }
}

async fn actor_loop(config: Config, local: LocalStore, durable: Arc<dyn DurableStore>, mut rx: mpsc::Receiver<Command>) {
    debug!("MemoryManager actor_loop: started");
    let mut scopes: HashMap<String, ScopeEntry> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Store {
                scope,
                user_id,
                node,
                now_ms,
                reply,
            } => {
                if !scopes.contains_key(&scope) {
                    let entry = hydrate_scope(&scope, user_id.as_deref(), &config, &local, &durable, now_ms).await;
                    scopes.insert(scope.clone(), entry);
                }
                let entry = scopes.get_mut(&scope).expect("just hydrated");
                entry.last_touched_ms = now_ms;
                let context_type = node.context_type;
                let effective_user = user_id.or_else(|| entry.user_id.clone());
                let stored_id = entry.graph.store(node.clone(), now_ms);

                let result = local
                    .save_node(&scope, entry.graph.get_node(&stored_id).expect("just stored"))
                    .map(|()| stored_id.clone());

                if result.is_ok() && context_type.is_persistent() {
                    if let Some(uid) = effective_user {
                        if let Err(e) = durable.upsert_entity(&uid, node).await {
                            debug!(error = %e, "MemoryManager actor_loop: durable upsert failed");
                        }
                    }
                }
                let _ = reply.send(result);
            }

            Command::AddRelationship {
                scope,
                from,
                to,
                label,
                strength,
                reply,
            } => {
                let now = taskstore::now_ms();
                if !scopes.contains_key(&scope) {
                    let entry = hydrate_scope(&scope, None, &config, &local, &durable, now).await;
                    scopes.insert(scope.clone(), entry);
                }
                let entry = scopes.get_mut(&scope).expect("just hydrated");
                entry.last_touched_ms = now;
                let result = entry.graph.add_relationship(&from, &to, label, strength).and_then(|()| {
                    local.save_edge(&scope, &MemoryEdge::new(&from, &to, label, strength), now)?;
                    Ok(())
                });
                let _ = reply.send(result);
            }

            Command::RetrieveRelevant {
                scope,
                query,
                max_results,
                now_ms,
                reply,
            } => {
                if !scopes.contains_key(&scope) {
                    let entry = hydrate_scope(&scope, None, &config, &local, &durable, now_ms).await;
                    scopes.insert(scope.clone(), entry);
                }
                let entry = scopes.get_mut(&scope).expect("just hydrated");
                entry.last_touched_ms = now_ms;
                let results = entry.graph.retrieve_relevant(&query, &config, None, max_results, now_ms);
                let _ = reply.send(Ok(results));
            }

            Command::GetRelated {
                scope,
                node_id,
                max_distance,
                label_filter,
                reply,
            } => {
                let now = taskstore::now_ms();
                if !scopes.contains_key(&scope) {
                    let entry = hydrate_scope(&scope, None, &config, &local, &durable, now).await;
                    scopes.insert(scope.clone(), entry);
                }
                let entry = scopes.get_mut(&scope).expect("just hydrated");
                let nodes: Vec<MemoryNode> = entry.graph.get_related_nodes(&node_id, max_distance, label_filter).into_iter().cloned().collect();
                let _ = reply.send(Ok(nodes));
            }

            Command::FindImportant { scope, top_n, now_ms, reply } => {
                if !scopes.contains_key(&scope) {
                    let entry = hydrate_scope(&scope, None, &config, &local, &durable, now_ms).await;
                    scopes.insert(scope.clone(), entry);
                }
                let entry = scopes.get_mut(&scope).expect("just hydrated");
                let _ = reply.send(Ok(entry.graph.find_important_memories(&config, top_n, now_ms)));
            }

            Command::FindClusters { scope, now_ms, reply } => {
                if !scopes.contains_key(&scope) {
                    let entry = hydrate_scope(&scope, None, &config, &local, &durable, now_ms).await;
                    scopes.insert(scope.clone(), entry);
                }
                let entry = scopes.get_mut(&scope).expect("just hydrated");
                let _ = reply.send(Ok(entry.graph.find_memory_clusters(&config, now_ms)));
            }

            Command::FindBridges { scope, top_n, now_ms, reply } => {
                if !scopes.contains_key(&scope) {
                    let entry = hydrate_scope(&scope, None, &config, &local, &durable, now_ms).await;
                    scopes.insert(scope.clone(), entry);
                }
                let entry = scopes.get_mut(&scope).expect("just hydrated");
                let _ = reply.send(Ok(entry.graph.find_bridge_memories(&config, top_n, now_ms)));
            }

            Command::CleanupIdle { now_ms, reply } => {
                let retention_ms = config.thread_retention_hours * 3_600_000;
                let mut evicted = 0;
                scopes.retain(|scope, entry| {
                    let idle = now_ms - entry.last_touched_ms > retention_ms;
                    if idle {
                        entry.graph.cleanup_stale_nodes(config.thread_retention_hours, now_ms);
                        debug!(%scope, "MemoryManager actor_loop: evicting idle scope");
                        evicted += 1;
                    }
                    !idle
                });
                let _ = reply.send(evicted);
            }

            Command::Shutdown => {
                debug!("MemoryManager actor_loop: shutdown");
                break;
            }
        }
    }
    debug!("MemoryManager actor_loop: stopped");
}
