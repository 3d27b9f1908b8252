//! Republishes Memory Manager mutations as a broadcast stream any consumer
//! (a file logger, a dashboard) can subscribe to, the same way
//! [`crate::events::EventBus`] streams workflow activity.

use std::sync::Arc;

use memory::{EdgeLabel, MemoryError, MemoryManager, MemoryNode};
use tokio::sync::broadcast;
use tracing::debug;

/// Default channel capacity, matching [`crate::events::DEFAULT_CHANNEL_CAPACITY`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// A graph mutation observed on a scope's memory graph.
#[derive(Debug, Clone)]
pub enum GraphEvent {
    NodeStored { scope: String, node_id: String },
    RelationshipAdded { scope: String, from: String, to: String, label: EdgeLabel },
    ScopeCleanedUp { removed: usize },
}

/// Wraps a [`MemoryManager`] handle, forwarding every mutating call through
/// while publishing a [`GraphEvent`] for each one. Read-only queries
/// (`retrieve_relevant`, `get_related_nodes`, ...) pass straight through the
/// inner manager and are not observed.
#[derive(Clone)]
pub struct GraphObserver {
    memory: Arc<MemoryManager>,
    tx: broadcast::Sender<GraphEvent>,
}

impl GraphObserver {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self::with_capacity(memory, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(memory: Arc<MemoryManager>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { memory, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: GraphEvent) {
        debug!(?event, "GraphObserver::emit");
        let _ = self.tx.send(event);
    }

    pub async fn store(&self, scope: &str, user_id: Option<&str>, node: MemoryNode, now_ms: i64) -> Result<String, MemoryError> {
        let id = self.memory.store(scope, user_id, node, now_ms).await?;
        self.emit(GraphEvent::NodeStored {
            scope: scope.to_string(),
            node_id: id.clone(),
        });
        Ok(id)
    }

    pub async fn add_relationship(&self, scope: &str, from: &str, to: &str, label: EdgeLabel, strength: f64) -> Result<(), MemoryError> {
        self.memory.add_relationship(scope, from, to, label, strength).await?;
        self.emit(GraphEvent::RelationshipAdded {
            scope: scope.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            label,
        });
        Ok(())
    }

    pub async fn cleanup_idle_scopes(&self, now_ms: i64) -> Result<usize, MemoryError> {
        let removed = self.memory.cleanup_idle_scopes(now_ms).await?;
        self.emit(GraphEvent::ScopeCleanedUp { removed });
        Ok(removed)
    }
}

/// Construct a [`GraphObserver`] over `memory`, ready for subscribers.
pub fn spawn_graph_observer(memory: Arc<MemoryManager>) -> GraphObserver {
    GraphObserver::new(memory)
}
