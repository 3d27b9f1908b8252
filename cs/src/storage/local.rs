//! The hot local store (§4.5): every node and relationship for scopes
//! (threads or users) currently loaded by a [`crate::manager::MemoryManager`].
//! Built on `taskstore`'s generic `Store` rather than hand-rolled SQL, the
//! same persistence contract the workflow engine uses for its own domain
//! records, so nodes and relationships round-trip through SQLite+JSONL
//! without the memory subsystem needing a bespoke schema.

use std::collections::HashMap;
use std::path::Path;

use taskstore::{Filter, IndexValue, Record, Store};

use crate::edge::MemoryEdge;
use crate::error::Result;
use crate::node::MemoryNode;

/// A node filed under a scope (thread id, or the synthetic `"user:<id>"`
/// scope used for globally-shared nodes). The hot store holds every scope
/// in one SQLite file; `scope` is the partition key (§4.5 "per-thread
/// partition").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoredNode {
    pub scope: String,
    pub node: MemoryNode,
}

impl Record for StoredNode {
    fn id(&self) -> &str {
        &self.node.id
    }

    fn updated_at(&self) -> i64 {
        self.node.last_accessed_at
    }

    fn collection_name() -> &'static str {
        "memory_nodes"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("scope".to_string(), IndexValue::String(self.scope.clone()));
        fields.insert("context_type".to_string(), IndexValue::String(self.node.context_type.to_string()));
        fields
    }
}

/// A relationship filed under a scope. `id` is synthesized from its
/// endpoints and label since `MemoryEdge` itself carries no identity beyond
/// those (§3 "multi-edges with distinct labels permitted").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoredEdge {
    pub scope: String,
    pub id: String,
    pub updated_at: i64,
    pub edge: MemoryEdge,
}

impl StoredEdge {
    pub fn new(scope: impl Into<String>, edge: MemoryEdge, updated_at: i64) -> Self {
        let scope = scope.into();
        let id = format!("{scope}:{}:{}:{}", edge.from, edge.to, edge.label);
        Self { scope, id, updated_at, edge }
    }
}

impl Record for StoredEdge {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "memory_edges"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("scope".to_string(), IndexValue::String(self.scope.clone()));
        fields
    }
}

/// Thin wrapper over `taskstore::Store` scoping every query to a single
/// thread/user.
pub struct LocalStore {
    store: Store,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self { store: Store::open(path)? })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { store: Store::open_in_memory()? })
    }

    pub fn save_node(&self, scope: &str, node: &MemoryNode) -> Result<()> {
        self.store.upsert(StoredNode {
            scope: scope.to_string(),
            node: node.clone(),
        })?;
        Ok(())
    }

    pub fn load_nodes(&self, scope: &str) -> Result<Vec<MemoryNode>> {
        let filter = Filter::eq("scope", IndexValue::String(scope.to_string()));
        let rows: Vec<StoredNode> = self.store.list(std::slice::from_ref(&filter))?;
        Ok(rows.into_iter().map(|r| r.node).collect())
    }

    pub fn delete_node(&self, id: &str) -> Result<bool> {
        Ok(self.store.delete::<StoredNode>(id)?)
    }

    pub fn save_edge(&self, scope: &str, edge: &MemoryEdge, updated_at: i64) -> Result<()> {
        self.store.upsert(StoredEdge::new(scope, edge.clone(), updated_at))?;
        Ok(())
    }

    pub fn load_edges(&self, scope: &str) -> Result<Vec<MemoryEdge>> {
        let filter = Filter::eq("scope", IndexValue::String(scope.to_string()));
        let rows: Vec<StoredEdge> = self.store.list(std::slice::from_ref(&filter))?;
        Ok(rows.into_iter().map(|r| r.edge).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeLabel;
    use crate::node::ContextType;
    use serde_json::json;

    #[test]
    fn save_and_load_nodes_scoped() {
        let store = LocalStore::open_in_memory().unwrap();
        let node = MemoryNode::new("n1", json!({}), ContextType::ToolOutput);
        store.save_node("thread-a", &node).unwrap();
        store.save_node("thread-b", &MemoryNode::new("n2", json!({}), ContextType::ToolOutput)).unwrap();

        let a_nodes = store.load_nodes("thread-a").unwrap();
        assert_eq!(a_nodes.len(), 1);
        assert_eq!(a_nodes[0].id, "n1");
    }

    #[test]
    fn save_and_load_edges_scoped() {
        let store = LocalStore::open_in_memory().unwrap();
        let edge = MemoryEdge::new("n1", "n2", EdgeLabel::RelatesTo, 0.8);
        store.save_edge("thread-a", &edge, 1000).unwrap();

        let edges = store.load_edges("thread-a").unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, "n1");
    }

    #[test]
    fn delete_node_removes_row() {
        let store = LocalStore::open_in_memory().unwrap();
        let node = MemoryNode::new("n1", json!({}), ContextType::ToolOutput);
        store.save_node("thread-a", &node).unwrap();
        assert!(store.delete_node("n1").unwrap());
        assert!(store.load_nodes("thread-a").unwrap().is_empty());
    }
}
