//! Renders a Memory Manager query into prompt-ready text, the way the
//! original orchestrator's planning prompt spliced in a `memory_context`
//! block (`original_source/src/orchestrator/plan_and_execute.py`).

use std::sync::Arc;

use memory::{MemoryError, MemoryManager};
use tracing::debug;

/// One retrieved memory rendered for prompt inclusion.
#[derive(Debug, Clone)]
pub struct ContextSection {
    pub node_id: String,
    pub summary: String,
    pub score: f64,
}

/// Builds memory-aware context blocks for workflow steps and the Planner.
pub struct ContextBuilder {
    memory: Arc<MemoryManager>,
}

impl ContextBuilder {
    pub fn new(memory: Arc<MemoryManager>) -> Self {
        Self { memory }
    }

    /// Retrieve the `max_results` most relevant memories for `query` in
    /// `scope` and render them as ranked [`ContextSection`]s.
    pub async fn sections(&self, scope: &str, query: &str, max_results: usize, now_ms: i64) -> Result<Vec<ContextSection>, MemoryError> {
        let results = self.memory.retrieve_relevant(scope, query, max_results, now_ms).await?;
        debug!(scope, query, found = results.len(), "ContextBuilder::sections: retrieved");

        Ok(results
            .into_iter()
            .map(|r| ContextSection {
                node_id: r.node.id,
                summary: r.node.summary,
                score: r.score.total,
            })
            .collect())
    }

    /// Render `sections` as a single text block suitable for splicing into an
    /// instruction template or planning prompt, or `None` if there was
    /// nothing relevant (callers should omit the block entirely rather than
    /// inject an empty header).
    pub async fn render(&self, scope: &str, query: &str, max_results: usize, now_ms: i64) -> Result<Option<String>, MemoryError> {
        let sections = self.sections(scope, query, max_results, now_ms).await?;
        if sections.is_empty() {
            return Ok(None);
        }

        let mut block = String::from("Relevant context from memory:\n");
        for section in &sections {
            block.push_str(&format!("- {} (relevance {:.2})\n", section.summary, section.score));
        }
        Ok(Some(block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory::{Config, ContextType, LocalStore, MemoryNode, SqliteDurableStore};
    use serde_json::json;

    async fn builder_with_one_memory() -> (ContextBuilder, i64) {
        let local = LocalStore::open_in_memory().unwrap();
        let durable = SqliteDurableStore::open_in_memory().unwrap();
        let manager = Arc::new(MemoryManager::spawn(Config::default(), local, Arc::new(durable)));
        let now = 1_000_000;
        manager
            .store(
                "thread-1",
                None,
                MemoryNode::new("n1", json!({"text": "Acme Corp renewed their support contract"}), ContextType::ConversationFact)
                    .with_summary("Acme Corp renewed their support contract"),
                now,
            )
            .await
            .unwrap();
        (ContextBuilder::new(manager), now)
    }

    #[tokio::test]
    async fn render_includes_stored_memory() {
        let (builder, now) = builder_with_one_memory().await;
        let block = builder.render("thread-1", "Acme Corp", 5, now).await.unwrap();
        assert!(block.unwrap().contains("Acme Corp renewed"));
    }

    #[tokio::test]
    async fn render_is_none_when_nothing_relevant() {
        let (builder, now) = builder_with_one_memory().await;
        let block = builder.render("empty-thread", "anything", 5, now).await.unwrap();
        assert!(block.is_none());
    }
}
