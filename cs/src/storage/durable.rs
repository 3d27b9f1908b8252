//! The durable remote store (§4.5): holds only the globally-shared node
//! kinds (`domain_entity`/`conversation_fact`), partitioned per user, and
//! deduplicated on `(entity_id, entity_system, user_id)` so the same CRM
//! account merges into one row no matter how many threads touch it.
//!
//! `DurableStore` is a trait, not a concrete type, because a production
//! deployment backs this with a shared service (not a local SQLite file)
//! while tests and single-operator use stick with the reference
//! implementation here (SPEC_FULL §4.5 "pluggable durable backend").

use std::collections::HashMap;

use async_trait::async_trait;
use taskstore::{Filter, IndexValue, Record, Store};
use tracing::debug;

use crate::error::Result;
use crate::node::MemoryNode;

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert or deep-merge `node` into the user's durable partition. On a
    /// dedup hit (same `entity_id`/`entity_system`), returns the merged
    /// node; otherwise the node as stored.
    async fn upsert_entity(&self, user_id: &str, node: MemoryNode) -> Result<MemoryNode>;

    /// Every globally-shared node stored for `user_id`, for hydrating a
    /// freshly-opened thread's in-process graph (§4.5 "lazy hydration").
    async fn load_entities(&self, user_id: &str) -> Result<Vec<MemoryNode>>;

    /// Remove entities untouched for longer than `retention_days`. Returns
    /// the number removed.
    async fn purge_stale(&self, user_id: &str, cutoff_ms: i64) -> Result<usize>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DurableEntity {
    id: String,
    user_id: String,
    node: MemoryNode,
}

impl Record for DurableEntity {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.node.last_accessed_at
    }

    fn collection_name() -> &'static str {
        "durable_entities"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("user_id".to_string(), IndexValue::String(self.user_id.clone()));
        fields.insert(
            "dedup_key".to_string(),
            IndexValue::String(dedup_key(&self.user_id, &self.node)),
        );
        fields
    }
}

fn dedup_key(user_id: &str, node: &MemoryNode) -> String {
    match &node.entity_ref {
        Some(entity_ref) => format!("{user_id}:{}:{}", entity_ref.entity_system, entity_ref.entity_id),
        None => format!("{user_id}:node:{}", node.id),
    }
}

/// Reference `DurableStore` implementation: a second SQLite file via
/// `taskstore`, distinct from the hot local store so the two tiers can live
/// on different retention/replication policies (§4.5).
pub struct SqliteDurableStore {
    store: Store,
}

impl SqliteDurableStore {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        Ok(Self { store: Store::open(path)? })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { store: Store::open_in_memory()? })
    }
}

#[async_trait]
impl DurableStore for SqliteDurableStore {
    async fn upsert_entity(&self, user_id: &str, node: MemoryNode) -> Result<MemoryNode> {
        let key = dedup_key(user_id, &node);
        debug!(user_id, %key, "SqliteDurableStore::upsert_entity: called");

        let filter = Filter::eq("dedup_key", IndexValue::String(key));
        let existing: Vec<DurableEntity> = self.store.list(std::slice::from_ref(&filter))?;

        if let Some(mut entry) = existing.into_iter().next() {
            entry.node.merge_from(&node.content, &node.metadata, Some(node.summary.as_str()));
            for tag in node.tags {
                entry.node.tags.insert(tag);
            }
            self.store.update(&entry)?;
            return Ok(entry.node);
        }

        let entry = DurableEntity {
            id: node.id.clone(),
            user_id: user_id.to_string(),
            node,
        };
        self.store.create(entry.clone())?;
        Ok(entry.node)
    }

    async fn load_entities(&self, user_id: &str) -> Result<Vec<MemoryNode>> {
        let filter = Filter::eq("user_id", IndexValue::String(user_id.to_string()));
        let rows: Vec<DurableEntity> = self.store.list(std::slice::from_ref(&filter))?;
        Ok(rows.into_iter().map(|r| r.node).collect())
    }

    async fn purge_stale(&self, user_id: &str, cutoff_ms: i64) -> Result<usize> {
        let filter = Filter::eq("user_id", IndexValue::String(user_id.to_string()));
        let rows: Vec<DurableEntity> = self.store.list(std::slice::from_ref(&filter))?;
        let mut removed = 0;
        for row in rows {
            if row.node.last_accessed_at < cutoff_ms {
                self.store.delete::<DurableEntity>(&row.id)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ContextType, EntityRef};
    use serde_json::json;

    fn entity_node(id: &str, entity_id: &str) -> MemoryNode {
        MemoryNode::new(id, json!({"name": entity_id}), ContextType::DomainEntity).with_entity_ref(EntityRef {
            entity_id: entity_id.to_string(),
            entity_type: "account".to_string(),
            entity_system: "salesforce".to_string(),
        })
    }

    #[tokio::test]
    async fn upsert_merges_on_matching_entity_ref() {
        let store = SqliteDurableStore::open_in_memory().unwrap();
        store.upsert_entity("user-1", entity_node("n1", "ACC-1")).await.unwrap();
        let merged = store
            .upsert_entity("user-1", MemoryNode::new("n2", json!({"stage": "won"}), ContextType::DomainEntity).with_entity_ref(EntityRef {
                entity_id: "ACC-1".to_string(),
                entity_type: "account".to_string(),
                entity_system: "salesforce".to_string(),
            }))
            .await
            .unwrap();

        assert_eq!(merged.content["stage"], "won");
        let loaded = store.load_entities("user-1").await.unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn load_entities_is_scoped_per_user() {
        let store = SqliteDurableStore::open_in_memory().unwrap();
        store.upsert_entity("user-1", entity_node("n1", "ACC-1")).await.unwrap();
        store.upsert_entity("user-2", entity_node("n2", "ACC-2")).await.unwrap();

        assert_eq!(store.load_entities("user-1").await.unwrap().len(), 1);
        assert_eq!(store.load_entities("user-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn purge_stale_removes_old_entities() {
        let store = SqliteDurableStore::open_in_memory().unwrap();
        let mut node = entity_node("n1", "ACC-1");
        node.last_accessed_at = 1_000;
        store.upsert_entity("user-1", node).await.unwrap();

        let removed = store.purge_stale("user-1", 50_000).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.load_entities("user-1").await.unwrap().is_empty());
    }
}
