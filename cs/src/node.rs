//! Memory Node (§3): a typed, time-decayed unit of conversational memory.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskstore::now_ms;

use crate::config::HalfLives;

/// Lifecycle class of a memory node, governing decay half-life, scope
/// (thread-local vs. user-global), and cleanup eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    SearchResult,
    UserSelection,
    ToolOutput,
    DomainEntity,
    CompletedAction,
    ConversationFact,
    TemporaryState,
}

impl ContextType {
    /// `domain_entity` and `conversation_fact` are shared across a user's
    /// threads and dual-written to the durable store (§4.5); everything
    /// else is thread-scoped and local-only.
    pub fn is_globally_shared(self) -> bool {
        matches!(self, ContextType::DomainEntity | ContextType::ConversationFact)
    }

    pub fn is_persistent(self) -> bool {
        self.is_globally_shared()
    }

    /// Survives age-based cleanup regardless of age (§8 "Cleanup
    /// preservation").
    pub fn is_cleanup_preserved(self) -> bool {
        self.is_globally_shared()
    }
}

impl std::fmt::Display for ContextType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SearchResult => "search_result",
            Self::UserSelection => "user_selection",
            Self::ToolOutput => "tool_output",
            Self::DomainEntity => "domain_entity",
            Self::CompletedAction => "completed_action",
            Self::ConversationFact => "conversation_fact",
            Self::TemporaryState => "temporary_state",
        };
        write!(f, "{s}")
    }
}

/// Identifies a node with an external domain entity (CRM account, Jira
/// issue, ServiceNow ticket, ...). `(entity_id, entity_system)` is unique
/// within a scope; a `store()` call that names an existing triple merges
/// instead of inserting (§4.1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_id: String,
    pub entity_type: String,
    pub entity_system: String,
}

/// A node of the conversational memory graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryNode {
    pub id: String,
    pub content: Value,
    pub context_type: ContextType,
    pub created_at: i64,
    pub last_accessed_at: i64,
    pub access_count: u32,
    pub base_relevance: f64,

    /// Lower-cased tag set; never contains an empty string.
    pub tags: HashSet<String>,

    pub summary: String,
    pub entity_ref: Option<EntityRef>,

    /// Number of `store()` calls that merged into this node rather than
    /// creating a new one (§8 "Entity deduplication").
    pub update_count: u32,

    /// Present only when an embedding backend is configured; the semantic
    /// score term (§4.3) is `0.0` whenever this is `None`.
    pub embedding: Option<Vec<f32>>,

    /// Free-form metadata passed to `store()`, deep-merged on entity
    /// collision the same way `content` is.
    #[serde(default)]
    pub metadata: Value,
}

impl MemoryNode {
    pub fn new(id: impl Into<String>, content: Value, context_type: ContextType) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            content,
            context_type,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            base_relevance: 0.5,
            tags: HashSet::new(),
            summary: String::new(),
            entity_ref: None,
            update_count: 0,
            embedding: None,
            metadata: Value::Null,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_base_relevance(mut self, relevance: f64) -> Self {
        self.base_relevance = relevance.clamp(0.0, 1.0);
        self
    }

    /// Lower-cases and dedupes tags, dropping any empty string (§3
    /// invariant "tags never contain nil").
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags
            .into_iter()
            .map(|t| t.to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    pub fn with_entity_ref(mut self, entity_ref: EntityRef) -> Self {
        self.entity_ref = Some(entity_ref);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Deep-merge `other` into `self.content`/`self.metadata` (objects
    /// merge key-wise, anything else is overwritten), bumping the update
    /// counter and refreshing `last_accessed_at` (§4.1 "deep-merge of
    /// entity_data").
    pub fn merge_from(&mut self, other_content: &Value, other_metadata: &Value, other_summary: Option<&str>) {
        deep_merge(&mut self.content, other_content);
        deep_merge(&mut self.metadata, other_metadata);
        if let Some(summary) = other_summary {
            if !summary.is_empty() {
                self.summary = summary.to_string();
            }
        }
        self.update_count += 1;
        self.access();
    }

    /// Marks the node accessed now: bumps the counter and the timestamp.
    /// Monotonic per the §3 invariant ("timestamps monotonic on access").
    pub fn access(&mut self) {
        let now = now_ms();
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
        self.access_count += 1;
    }

    fn age_hours(&self, now_ms_value: i64) -> f64 {
        ((now_ms_value - self.created_at).max(0) as f64) / 3_600_000.0
    }

    fn hours_since_access(&self, now_ms_value: i64) -> f64 {
        ((now_ms_value - self.last_accessed_at).max(0) as f64) / 3_600_000.0
    }

    /// `access_boost = 0.3 * 0.5^(hours_since_access/2)`, clamped to
    /// `[0.05, 1.0]`, zero once `hours_since_access >= 24` per the
    /// original's cutoff (pinned in SPEC_FULL §3).
    fn access_boost(&self, now_ms_value: i64) -> f64 {
        let h = self.hours_since_access(now_ms_value);
        if h >= 24.0 {
            return 0.0;
        }
        (0.3 * 0.5_f64.powf(h / 2.0)).clamp(0.05, 1.0)
    }

    /// Current relevance: `base_relevance * 0.5^(age_hours/half_life) +
    /// access_boost`, clamped to `[0.0, 1.0]` since it is used directly as
    /// a score component (§3, SPEC_FULL clamp-scope resolution).
    pub fn current_relevance(&self, half_lives: &HalfLives) -> f64 {
        self.current_relevance_at(half_lives, taskstore::now_ms())
    }

    /// Same as [`Self::current_relevance`] but evaluated at an explicit
    /// instant, for deterministic tests.
    pub fn current_relevance_at(&self, half_lives: &HalfLives, now_ms_value: i64) -> f64 {
        let half_life = half_lives.for_type(self.context_type);
        let age = self.age_hours(now_ms_value);
        let decayed = self.base_relevance * 0.5_f64.powf(age / half_life);
        (decayed + self.access_boost(now_ms_value)).clamp(0.0, 1.0)
    }
}

/// Merge `source` into `target` key-wise when both are JSON objects;
/// otherwise `source` (if not null) overwrites `target` wholesale (§4.1
/// "deep-merge of entity_data").
fn deep_merge(target: &mut Value, source: &Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(key) {
                    Some(target_value) => deep_merge(target_value, source_value),
                    None => {
                        target_map.insert(key.clone(), source_value.clone());
                    }
                }
            }
        }
        (target, Value::Null) => {
            let _ = target;
        }
        (target, source) => {
            *target = source.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_at(created_at: i64, accessed_at: i64, base: f64, ctx: ContextType) -> MemoryNode {
        MemoryNode {
            id: "n1".to_string(),
            content: Value::Null,
            context_type: ctx,
            created_at,
            last_accessed_at: accessed_at,
            access_count: 0,
            base_relevance: base,
            tags: HashSet::new(),
            summary: String::new(),
            entity_ref: None,
            update_count: 0,
            embedding: None,
            metadata: Value::Null,
        }
    }

    #[test]
    fn relevance_decays_over_half_life() {
        let hl = HalfLives::default();
        let now = 100 * 3_600_000;
        // created 12h ago (completed_action half-life), accessed long enough ago
        // that access_boost is zero.
        let node = node_at(now - 12 * 3_600_000, now - 25 * 3_600_000, 1.0, ContextType::CompletedAction);
        let r = node.current_relevance_at(&hl, now);
        assert!((r - 0.5).abs() < 1e-9, "expected half decay, got {r}");
    }

    #[test]
    fn access_never_strictly_decreases_relevance() {
        let hl = HalfLives::default();
        let now = 1_000_000_000_i64;
        let mut node = node_at(now - 10 * 3_600_000, now - 10 * 3_600_000, 0.5, ContextType::ConversationFact);
        let before = node.current_relevance_at(&hl, now);
        node.access();
        let after = node.current_relevance_at(&hl, now + 1);
        assert!(after >= before, "access decreased relevance: {before} -> {after}");
    }

    #[test]
    fn access_boost_clamped_to_range() {
        let hl = HalfLives::default();
        let now = 1_000_000_000_i64;
        let node = node_at(now, now, 0.0, ContextType::TemporaryState);
        let r = node.current_relevance_at(&hl, now);
        assert!(r <= 1.0 && r >= 0.05, "relevance {r} outside expected just-accessed range");
    }

    #[test]
    fn tags_are_lowercased_and_empty_dropped() {
        let node = MemoryNode::new("n1", Value::Null, ContextType::DomainEntity)
            .with_tags(vec!["CRM".to_string(), "".to_string(), "Salesforce".to_string()]);
        assert_eq!(node.tags.len(), 2);
        assert!(node.tags.contains("crm"));
        assert!(node.tags.contains("salesforce"));
    }

    #[test]
    fn merge_from_deep_merges_objects_and_bumps_update_count() {
        let mut node = MemoryNode::new("n1", serde_json::json!({"stage": "proposal", "amount": 100}), ContextType::DomainEntity);
        node.merge_from(&serde_json::json!({"stage": "closed_won"}), &serde_json::json!({"owner": "alice"}), Some("Deal closed"));
        assert_eq!(node.content["stage"], "closed_won");
        assert_eq!(node.content["amount"], 100);
        assert_eq!(node.metadata["owner"], "alice");
        assert_eq!(node.summary, "Deal closed");
        assert_eq!(node.update_count, 1);
    }

    #[test]
    fn merge_from_ignores_empty_summary() {
        let mut node = MemoryNode::new("n1", serde_json::json!({}), ContextType::DomainEntity).with_summary("original");
        node.merge_from(&serde_json::json!({}), &serde_json::json!({}), Some(""));
        assert_eq!(node.summary, "original");
    }
}
