//! Scoring Engine (§4.3): per-node keyword, semantic, recency, context,
//! graph, and base-relevance components, combined into a single
//! non-negative weighted score minus penalties.

use std::collections::{HashMap, HashSet};

use crate::config::{ScoringConfig, generic_terms, spam_tags};
use crate::node::MemoryNode;
use crate::text::{EntityMatch, QueryType, has_positional_phrasing, tokenize_set};

/// Anything the scoring engine needs to know about shortest paths on the
/// labelled graph, without depending on the graph's concrete backing
/// structure.
pub trait PathLookup {
    fn shortest_path_len(&self, from: &str, to: &str) -> Option<usize>;
}

/// A recently-accessed node and the recency weight it contributes to the
/// Graph score (§4.3: "sum over recently accessed nodes of time_weight *
/// 1/(1+shortest_path_len)").
#[derive(Debug, Clone)]
pub struct RecentAccess {
    pub node_id: String,
    pub time_weight: f64,
    pub accessed_ms_ago: i64,
}

/// Everything about the query needed to score a candidate node.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub raw: String,
    pub tokens: Vec<String>,
    pub entities: Vec<EntityMatch>,
    pub query_type: QueryType,
    pub positional: bool,
    pub recent_accesses: Vec<RecentAccess>,
}

impl QueryContext {
    pub fn new(raw: &str, min_token_len: usize, entities: Vec<EntityMatch>, query_type: QueryType, recent_accesses: Vec<RecentAccess>) -> Self {
        Self {
            raw: raw.to_string(),
            tokens: crate::text::tokenize(raw, min_token_len),
            entities,
            query_type,
            positional: has_positional_phrasing(raw),
            recent_accesses,
        }
    }
}

/// Per-component breakdown of a single node's score, kept for
/// explainability in the CLI and for the prune-rule's top/mean
/// computation.
#[derive(Debug, Clone, Default)]
pub struct ScoreBreakdown {
    pub keyword: f64,
    pub semantic: f64,
    pub recency: f64,
    pub context: f64,
    pub graph: f64,
    pub base: f64,
    pub penalty: f64,
    pub total: f64,
}

fn node_haystack(node: &MemoryNode) -> String {
    let content = node.content.to_string();
    format!("{} {} {}", node.summary, content, node.tags.iter().cloned().collect::<Vec<_>>().join(" ")).to_lowercase()
}

/// Tag/keyword score component (§4.3).
fn keyword_score(node: &MemoryNode, query: &QueryContext, cfg: &ScoringConfig) -> f64 {
    let haystack = node_haystack(node);
    let mut score = 0.0;

    let mut entity_hit = false;
    for entity in &query.entities {
        let value_lower = entity.value.to_lowercase();
        if node
            .entity_ref
            .as_ref()
            .is_some_and(|er| er.entity_id.to_lowercase() == value_lower)
        {
            score += 3.0;
            entity_hit = true;
        } else if haystack.contains(&value_lower) {
            score += 1.5;
            entity_hit = true;
        }
    }
    if !query.entities.is_empty() && !entity_hit {
        score -= 1.0;
    }

    let generic = generic_terms();
    let mut hits = 0usize;
    for tag in &node.tags {
        if query.tokens.iter().any(|t| t == tag) {
            if generic.contains(tag.as_str()) {
                score += 0.2;
            } else {
                score += 1.0;
            }
            hits += 1;
        }
    }

    if query.tokens.len() > 2 {
        let haystack_tokens = tokenize_set(&haystack, 1);
        let found = query.tokens.iter().filter(|t| haystack_tokens.contains(t.as_str())).count();
        let hit_ratio = found as f64 / query.tokens.len() as f64;
        if hit_ratio < 0.5 {
            let miss_ratio = 1.0 - hit_ratio;
            score -= miss_ratio * 2.0;
        }
    }

    let _ = hits;
    score.max(0.0)
}

/// Semantic score: cosine similarity of query/node embeddings, `0.0` if
/// either is absent (§4.3).
fn semantic_score(node: &MemoryNode, query_embedding: Option<&[f32]>) -> f64 {
    let (Some(q), Some(n)) = (query_embedding, node.embedding.as_deref()) else {
        return 0.0;
    };
    if q.len() != n.len() || q.is_empty() {
        return 0.0;
    }
    let dot: f32 = q.iter().zip(n).map(|(a, b)| a * b).sum();
    let norm_q: f32 = q.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_n: f32 = n.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_q == 0.0 || norm_n == 0.0 {
        return 0.0;
    }
    (dot / (norm_q * norm_n)) as f64
}

/// Recency boost: piecewise by age, doubled under positional phrasing
/// (§4.3).
fn recency_score(node: &MemoryNode, now_ms: i64, cfg: &ScoringConfig, positional: bool) -> f64 {
    let age_hours = ((now_ms - node.created_at).max(0) as f64) / 3_600_000.0;

    let base = if age_hours < cfg.very_recent_threshold_hours {
        2.0
    } else if age_hours < cfg.recent_threshold_hours {
        1.0
    } else if age_hours < cfg.somewhat_recent_threshold_hours {
        0.5
    } else if age_hours < 24.0 {
        // linear 0.2 -> 0.1 over the 2h..24h window
        let t = ((age_hours - cfg.somewhat_recent_threshold_hours) / (24.0 - cfg.somewhat_recent_threshold_hours)).clamp(0.0, 1.0);
        0.2 - t * 0.1
    } else {
        0.05
    };

    if positional { base * cfg.positional_recency_multiplier } else { base }
}

/// Context score: recent-access boost plus entity overlap with the recent
/// access set (§4.3).
fn context_score(node: &MemoryNode, now_ms: i64, query: &QueryContext, cfg: &ScoringConfig) -> f64 {
    let mut score = 0.0;
    let secs_since_access = ((now_ms - node.last_accessed_at).max(0) as f64) / 1000.0;
    if secs_since_access <= cfg.access_recency_window_secs as f64 {
        score += 2.0;
    }

    if !query.entities.is_empty() {
        let recent_ids: HashSet<&str> = query.recent_accesses.iter().map(|r| r.node_id.as_str()).collect();
        if recent_ids.contains(node.id.as_str()) {
            score += 1.5;
        }
    }
    score
}

/// Graph score: sum over recently accessed nodes of `time_weight *
/// 1/(1+shortest_path_len)` (§4.3).
fn graph_score(node: &MemoryNode, query: &QueryContext, paths: &dyn PathLookup) -> f64 {
    query
        .recent_accesses
        .iter()
        .filter_map(|ra| {
            paths
                .shortest_path_len(&ra.node_id, &node.id)
                .map(|len| ra.time_weight * (1.0 / (1.0 + len as f64)))
        })
        .sum()
}

/// Spam penalty: tag-based, keyword-density-based, and suspicious-access
/// based (§4.3).
fn spam_penalty(node: &MemoryNode, query: &QueryContext, now_ms: i64, cfg: &ScoringConfig) -> f64 {
    let mut penalty = 0.0;
    let spam = spam_tags();
    if node.tags.iter().any(|t| spam.contains(t.as_str())) {
        penalty += cfg.spam_tag_penalty;
    }

    let haystack = node_haystack(node);
    let haystack_tokens: Vec<&str> = haystack.split_whitespace().collect();
    if !haystack_tokens.is_empty() && !query.tokens.is_empty() {
        let hits = haystack_tokens.iter().filter(|w| query.tokens.iter().any(|t| t == *w)).count();
        let density = hits as f64 / haystack_tokens.len() as f64;
        if density > cfg.keyword_density_threshold {
            penalty += cfg.keyword_density_penalty;
        }
    }

    let created_to_access_secs = ((node.last_accessed_at - node.created_at).max(0) as f64) / 1000.0;
    if node.access_count > 0 && created_to_access_secs < 1.0 {
        penalty += cfg.suspicious_access_penalty;
    }
    let _ = now_ms;
    penalty
}

/// Score a single candidate node. `query_embedding` may be `None` when no
/// embedding backend is configured, per §3's "feature-gated stub" note.
pub fn score_node(
    node: &MemoryNode,
    query: &QueryContext,
    half_lives: &crate::config::HalfLives,
    cfg: &ScoringConfig,
    paths: &dyn PathLookup,
    query_embedding: Option<&[f32]>,
    now_ms: i64,
) -> ScoreBreakdown {
    let profile = cfg.profile_for(query.query_type);

    let keyword = keyword_score(node, query, cfg);
    let semantic = semantic_score(node, query_embedding);
    let recency = recency_score(node, now_ms, cfg, query.positional);
    let context = context_score(node, now_ms, query, cfg);
    let graph = graph_score(node, query, paths);
    let base = node.current_relevance_at(half_lives, now_ms);
    let penalty = spam_penalty(node, query, now_ms, cfg);

    let weighted = profile.keyword * keyword
        + profile.semantic * semantic
        + profile.recency * recency
        + profile.context * context
        + profile.graph * graph
        + profile.base * base;

    let total = (weighted - penalty).max(0.0);

    ScoreBreakdown {
        keyword,
        semantic,
        recency,
        context,
        graph,
        base,
        penalty,
        total,
    }
}

/// Minimum-score floor for this query (§4.3: 0.3 default, 0.5 when the
/// query has more than 3 tokens).
pub fn min_score_floor(query: &QueryContext, cfg: &ScoringConfig) -> f64 {
    if query.tokens.len() > 3 {
        cfg.min_score_floor_long_query
    } else {
        cfg.min_score_floor_default
    }
}

/// Top-score prune rule (§4.3, applied per Open Question b's resolved
/// ordering: after the floor, before `max_results` truncation). Returns the
/// subset of `(id, score)` pairs that survive.
pub fn prune_long_tail(scored: Vec<(String, f64)>, cfg: &ScoringConfig) -> Vec<(String, f64)> {
    if scored.is_empty() {
        return scored;
    }
    let top = scored.iter().map(|(_, s)| *s).fold(f64::MIN, f64::max);
    let mean = scored.iter().map(|(_, s)| *s).sum::<f64>() / scored.len() as f64;

    if top > cfg.prune_top_over_mean_ratio * mean && top > cfg.prune_top_score_floor {
        let floor = cfg.prune_score_ratio * top;
        scored.into_iter().filter(|(_, s)| *s >= floor).collect()
    } else {
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HalfLives;
    use crate::node::ContextType;
    use serde_json::json;

    struct NoPaths;
    impl PathLookup for NoPaths {
        fn shortest_path_len(&self, _from: &str, _to: &str) -> Option<usize> {
            None
        }
    }

    fn ctx(raw: &str, query_type: QueryType) -> QueryContext {
        QueryContext::new(raw, 3, crate::text::extract_entities(raw), query_type, vec![])
    }

    #[test]
    fn keyword_score_rewards_tag_hits() {
        let node = MemoryNode::new("n1", json!({"x": 1}), ContextType::DomainEntity).with_tags(vec!["salesforce".to_string()]);
        let query = ctx("salesforce opportunity details", QueryType::Default);
        let score = keyword_score(&node, &query, &ScoringConfig::default());
        assert!(score > 0.0);
    }

    #[test]
    fn semantic_score_zero_without_embeddings() {
        let node = MemoryNode::new("n1", json!({}), ContextType::DomainEntity);
        assert_eq!(semantic_score(&node, Some(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn semantic_score_cosine_similarity() {
        let mut node = MemoryNode::new("n1", json!({}), ContextType::DomainEntity);
        node.embedding = Some(vec![1.0, 0.0]);
        let s = semantic_score(&node, Some(&[1.0, 0.0]));
        assert!((s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn score_is_never_negative() {
        let node = MemoryNode::new("n1", json!({}), ContextType::TemporaryState).with_tags(vec!["spam".to_string(), "hub".to_string()]);
        let query = ctx("totally unrelated query text here", QueryType::Default);
        let breakdown = score_node(&node, &query, &HalfLives::default(), &ScoringConfig::default(), &NoPaths, None, taskstore::now_ms());
        assert!(breakdown.total >= 0.0);
    }

    #[test]
    fn prune_removes_long_tail_when_top_dominates() {
        let cfg = ScoringConfig::default();
        let scored = vec![
            ("a".to_string(), 3.0),
            ("b".to_string(), 0.1),
            ("c".to_string(), 0.05),
        ];
        let pruned = prune_long_tail(scored, &cfg);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].0, "a");
    }

    #[test]
    fn prune_keeps_all_when_scores_are_close() {
        let cfg = ScoringConfig::default();
        let scored = vec![("a".to_string(), 1.0), ("b".to_string(), 0.9)];
        let pruned = prune_long_tail(scored, &cfg);
        assert_eq!(pruned.len(), 2);
    }

    #[test]
    fn positional_phrasing_doubles_recency() {
        let cfg = ScoringConfig::default();
        let node = MemoryNode::new("n1", json!({}), ContextType::SearchResult);
        let now = node.created_at;
        let with_positional = recency_score(&node, now, &cfg, true);
        let without = recency_score(&node, now, &cfg, false);
        assert!((with_positional - without * 2.0).abs() < 1e-9);
    }
}
