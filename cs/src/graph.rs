//! The Memory Graph (§4.1/§4.4): a single thread's (or user's) working set of
//! [`MemoryNode`]s and [`MemoryEdge`]s, backed by [`petgraph`]'s stable graph
//! so that deletions during cleanup never invalidate another node's index
//! (SPEC_FULL §4.4 "stable indices" rationale).

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use serde_json::Value;

use crate::algorithms::{self, Adjacency};
use crate::config::Config;
use crate::edge::{EdgeLabel, MemoryEdge};
use crate::error::{MemoryError, Result};
use crate::node::{ContextType, MemoryNode};
use crate::scoring::{self, PathLookup, QueryContext, RecentAccess, ScoreBreakdown};
use crate::text::{analyze_query, tokenize_set};

/// Cap on the recent-access log used to feed the Context/Graph score
/// components (§4.3). Bounded so the log itself never becomes a memory
/// leak across a long-lived thread.
const RECENT_ACCESS_LOG_CAP: usize = 50;

/// A scored retrieval result: the node plus the breakdown that produced its
/// rank, so callers (the CLI, the workflow engine's context builder) can
/// explain why a memory surfaced.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub node: MemoryNode,
    pub score: ScoreBreakdown,
}

#[derive(Debug, Clone)]
struct MetricsCache {
    write_counter: u64,
    computed_at_ms: i64,
    pagerank: HashMap<String, f64>,
    betweenness: HashMap<String, f64>,
    communities: HashMap<String, usize>,
}

/// A bounded recent-access log entry.
#[derive(Debug, Clone, Copy)]
struct AccessLogEntry {
    at_ms: i64,
}

/// The in-process conversational memory graph for one scope (thread or
/// user), per §4.1. Construction is cheap; persistence to the hot/durable
/// stores is the caller's job (`storage::local`/`storage::durable`), not
/// this type's.
pub struct MemoryGraph {
    graph: StableDiGraph<MemoryNode, MemoryEdge>,
    index_of: HashMap<String, NodeIndex>,
    entity_index: HashMap<(String, String), String>,
    text_index: crate::index::InvertedIndex,
    access_log: HashMap<String, VecDeque<AccessLogEntry>>,
    write_counter: u64,
    metrics_cache: Option<MetricsCache>,
}

impl MemoryGraph {
    pub fn new(min_token_len: usize) -> Self {
        Self {
            graph: StableDiGraph::new(),
            index_of: HashMap::new(),
            entity_index: HashMap::new(),
            text_index: crate::index::InvertedIndex::new(min_token_len),
            access_log: HashMap::new(),
            write_counter: 0,
            metrics_cache: None,
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn get_node(&self, id: &str) -> Option<&MemoryNode> {
        self.index_of.get(id).and_then(|&ix| self.graph.node_weight(ix))
    }

    fn reindex_text(&mut self, ix: NodeIndex) {
        let node = &self.graph[ix];
        let haystack = format!("{} {}", node.summary, node.content);
        self.text_index.index(&node.id, &haystack);
    }

    fn record_access(&mut self, id: &str, at_ms: i64) {
        let log = self.access_log.entry(id.to_string()).or_default();
        log.push_back(AccessLogEntry { at_ms });
        while log.len() > RECENT_ACCESS_LOG_CAP {
            log.pop_front();
        }
    }

    /// Store (insert or merge) a node. If `entity_ref` names an
    /// `(entity_id, entity_system)` pair already present in this scope, the
    /// incoming content/metadata/summary are deep-merged into the existing
    /// node rather than creating a duplicate (§4.1 "Entity deduplication").
    /// Returns the id of the node that now holds the data: the new node's id
    /// on insert, the existing node's id on merge.
    pub fn store(&mut self, mut node: MemoryNode, now_ms: i64) -> String {
        if let Some(entity_ref) = node.entity_ref.clone() {
            let key = (entity_ref.entity_id.clone(), entity_ref.entity_system.clone());
            if let Some(existing_id) = self.entity_index.get(&key).cloned() {
                if let Some(&ix) = self.index_of.get(&existing_id) {
                    let content = std::mem::replace(&mut node.content, Value::Null);
                    let metadata = std::mem::replace(&mut node.metadata, Value::Null);
                    let summary = node.summary.clone();
                    let merged_tags: Vec<String> = node.tags.into_iter().collect();
                    let existing = &mut self.graph[ix];
                    existing.merge_from(&content, &metadata, Some(summary.as_str()));
                    for tag in merged_tags {
                        existing.tags.insert(tag);
                    }
                    self.reindex_text(ix);
                    self.record_access(&existing_id, now_ms);
                    self.write_counter += 1;
                    return existing_id;
                }
            }
            let id = node.id.clone();
            self.entity_index.insert(key, id);
        }

        let id = node.id.clone();
        let ix = self.graph.add_node(node);
        self.index_of.insert(id.clone(), ix);
        self.reindex_text(ix);
        self.record_access(&id, now_ms);
        self.write_counter += 1;
        id
    }

    /// Add a labelled relationship. Idempotent: a second call for the same
    /// `(from, to, label)` takes the larger of the two strengths rather than
    /// inserting a parallel edge (§4.1 "Relationship idempotence"). Rejects
    /// self-loops and dangling endpoints (§3 invariant).
    pub fn add_relationship(&mut self, from: &str, to: &str, label: EdgeLabel, strength: f64) -> Result<()> {
        if from == to {
            return Err(MemoryError::SelfLoop(from.to_string()));
        }
        let from_ix = *self.index_of.get(from).ok_or_else(|| MemoryError::DanglingEdgeEndpoint(from.to_string()))?;
        let to_ix = *self.index_of.get(to).ok_or_else(|| MemoryError::DanglingEdgeEndpoint(to.to_string()))?;

        let existing_edge = self
            .graph
            .edges_directed(from_ix, Direction::Outgoing)
            .find(|e| e.target() == to_ix && e.weight().label == label)
            .map(|e| e.id());
        if let Some(edge_ix) = existing_edge {
            let current = self.graph[edge_ix].strength;
            self.graph[edge_ix].strength = current.max(strength.clamp(0.0, 1.0));
            self.write_counter += 1;
            return Ok(());
        }

        self.graph.add_edge(from_ix, to_ix, MemoryEdge::new(from, to, label, strength));
        self.write_counter += 1;
        Ok(())
    }

    fn undirected_adjacency(&self) -> Adjacency {
        let mut adj: Adjacency = HashMap::new();
        for ix in self.graph.node_indices() {
            adj.entry(self.graph[ix].id.clone()).or_default();
        }
        for edge in self.graph.edge_references() {
            let (a, b) = (self.graph[edge.source()].id.clone(), self.graph[edge.target()].id.clone());
            adj.entry(a.clone()).or_default().push(b.clone());
            adj.entry(b).or_default().push(a);
        }
        adj
    }

    fn directed_adjacency(&self) -> Adjacency {
        let mut adj: Adjacency = HashMap::new();
        for ix in self.graph.node_indices() {
            adj.entry(self.graph[ix].id.clone()).or_default();
        }
        for edge in self.graph.edge_references() {
            let (a, b) = (self.graph[edge.source()].id.clone(), self.graph[edge.target()].id.clone());
            adj.entry(a).or_default().push(b);
        }
        adj
    }

    fn shortest_path_len_inner(&self, from: &str, to: &str) -> Option<usize> {
        if from == to {
            return Some(0);
        }
        let start = *self.index_of.get(from)?;
        let target = *self.index_of.get(to)?;
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        visited.insert(start);
        let mut queue = VecDeque::new();
        queue.push_back((start, 0usize));
        while let Some((current, dist)) = queue.pop_front() {
            if current == target {
                return Some(dist);
            }
            for neighbor in self.graph.neighbors_undirected(current) {
                if visited.insert(neighbor) {
                    queue.push_back((neighbor, dist + 1));
                }
            }
        }
        None
    }

    /// Retrieve nodes relevant to `query`, scored per §4.3 and filtered per
    /// the resolved Open Question (b) order: score, apply the minimum-score
    /// floor, prune the long tail, then truncate to `max_results`.
    pub fn retrieve_relevant(
        &mut self,
        query: &str,
        cfg: &Config,
        query_embedding: Option<&[f32]>,
        max_results: usize,
        now_ms: i64,
    ) -> Vec<RetrievalResult> {
        let embeddings_available = query_embedding.is_some();
        let (entities, query_type) = analyze_query(query, embeddings_available);
        let query_tokens = tokenize_set(query, cfg.min_token_len);

        if crate::text::is_nonsense_query(
            &query_tokens.iter().cloned().collect::<Vec<_>>(),
            |t| self.text_index.contains_token(t),
            self.len(),
            cfg.nonsense_bypass_node_count,
        ) {
            return Vec::new();
        }

        let recent_accesses: Vec<RecentAccess> = self
            .access_log
            .iter()
            .filter_map(|(id, log)| {
                let last = log.back()?;
                let hours_ago = ((now_ms - last.at_ms).max(0) as f64) / 3_600_000.0;
                let time_weight = 0.5_f64.powf(hours_ago / 2.0);
                Some(RecentAccess {
                    node_id: id.clone(),
                    time_weight,
                    accessed_ms_ago: (now_ms - last.at_ms).max(0),
                })
            })
            .collect();

        let query_ctx = QueryContext::new(query, cfg.min_token_len, entities, query_type, recent_accesses);
        let floor = scoring::min_score_floor(&query_ctx, &cfg.scoring);

        let candidate_ids: Vec<String> = if query_tokens.is_empty() {
            self.graph.node_indices().map(|ix| self.graph[ix].id.clone()).collect()
        } else {
            let mut ids: HashSet<String> = self.text_index.candidates(&query_tokens.into_iter().collect::<Vec<_>>());
            if ids.is_empty() {
                ids = self.graph.node_indices().map(|ix| self.graph[ix].id.clone()).collect();
            }
            ids.into_iter().collect()
        };

        let mut scored: Vec<(String, ScoreBreakdown)> = candidate_ids
            .into_iter()
            .filter_map(|id| {
                let node = self.get_node(&id)?;
                let breakdown = scoring::score_node(node, &query_ctx, &cfg.half_lives, &cfg.scoring, &*self, query_embedding, now_ms);
                Some((id, breakdown))
            })
            .filter(|(_, b)| b.total >= floor)
            .collect();

        let pruned_ids = scoring::prune_long_tail(scored.iter().map(|(id, b)| (id.clone(), b.total)).collect(), &cfg.scoring);
        let surviving: HashSet<&str> = pruned_ids.iter().map(|(id, _)| id.as_str()).collect();
        scored.retain(|(id, _)| surviving.contains(id.as_str()));

        scored.sort_by(|a, b| b.1.total.partial_cmp(&a.1.total).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);

        let results: Vec<RetrievalResult> = scored
            .into_iter()
            .filter_map(|(id, score)| {
                let ix = *self.index_of.get(&id)?;
                self.graph[ix].access();
                Some(RetrievalResult { node: self.graph[ix].clone(), score })
            })
            .collect();

        for r in &results {
            self.record_access(&r.node.id, now_ms);
        }
        results
    }

    /// Bidirectional BFS from `node_id` out to `max_distance` hops,
    /// optionally restricted to a single edge label (§4.1 "related nodes").
    pub fn get_related_nodes(&self, node_id: &str, max_distance: usize, label_filter: Option<EdgeLabel>) -> Vec<&MemoryNode> {
        let Some(&start) = self.index_of.get(node_id) else {
            return Vec::new();
        };
        let mut visited: HashMap<NodeIndex, usize> = HashMap::new();
        visited.insert(start, 0);
        let mut queue = VecDeque::new();
        queue.push_back(start);

        while let Some(current) = queue.pop_front() {
            let dist = visited[&current];
            if dist >= max_distance {
                continue;
            }
            for dir in [Direction::Outgoing, Direction::Incoming] {
                for edge in self.graph.edges_directed(current, dir) {
                    if let Some(label) = label_filter {
                        if edge.weight().label != label {
                            continue;
                        }
                    }
                    let neighbor = if dir == Direction::Outgoing { edge.target() } else { edge.source() };
                    visited.entry(neighbor).or_insert_with(|| {
                        queue.push_back(neighbor);
                        dist + 1
                    });
                }
            }
        }

        visited
            .keys()
            .filter(|&&ix| ix != start)
            .map(|&ix| &self.graph[ix])
            .collect()
    }

    fn metrics(&mut self, cfg: &Config, now_ms: i64) -> &MetricsCache {
        let stale = match &self.metrics_cache {
            None => true,
            Some(cache) => cache.write_counter != self.write_counter || now_ms - cache.computed_at_ms > cfg.metrics_cache_secs * 1000,
        };
        if stale {
            let directed = self.directed_adjacency();
            let undirected = self.undirected_adjacency();
            let pagerank = algorithms::pagerank(&directed, 0.85, 100);
            let betweenness = algorithms::betweenness_centrality(&undirected);
            let communities = algorithms::label_propagation(&undirected, 50);
            self.metrics_cache = Some(MetricsCache {
                write_counter: self.write_counter,
                computed_at_ms: now_ms,
                pagerank,
                betweenness,
                communities,
            });
        }
        self.metrics_cache.as_ref().expect("metrics cache populated above")
    }

    /// The `top_n` nodes by PageRank over the directed relationship graph
    /// (§4.4 "importance").
    pub fn find_important_memories(&mut self, cfg: &Config, top_n: usize, now_ms: i64) -> Vec<(MemoryNode, f64)> {
        let ranks = self.metrics(cfg, now_ms).pagerank.clone();
        let mut ranked: Vec<(String, f64)> = ranks.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
            .into_iter()
            .take(top_n)
            .filter_map(|(id, score)| self.get_node(&id).cloned().map(|n| (n, score)))
            .collect()
    }

    /// Community groupings via label propagation (§4.4 "clusters"), grouped
    /// by assigned label.
    pub fn find_memory_clusters(&mut self, cfg: &Config, now_ms: i64) -> Vec<Vec<MemoryNode>> {
        let communities = self.metrics(cfg, now_ms).communities.clone();
        let mut by_label: HashMap<usize, Vec<MemoryNode>> = HashMap::new();
        for (id, label) in communities {
            if let Some(node) = self.get_node(&id) {
                by_label.entry(label).or_default().push(node.clone());
            }
        }
        let mut clusters: Vec<Vec<MemoryNode>> = by_label.into_values().collect();
        clusters.sort_by_key(|c| std::cmp::Reverse(c.len()));
        clusters
    }

    /// The `top_n` nodes by betweenness centrality (§4.4 "bridges"): nodes
    /// whose removal would disconnect otherwise-related parts of the graph.
    pub fn find_bridge_memories(&mut self, cfg: &Config, top_n: usize, now_ms: i64) -> Vec<(MemoryNode, f64)> {
        let betweenness = self.metrics(cfg, now_ms).betweenness.clone();
        let mut ranked: Vec<(String, f64)> = betweenness.into_iter().filter(|(_, s)| *s > 0.0).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked
            .into_iter()
            .take(top_n)
            .filter_map(|(id, score)| self.get_node(&id).cloned().map(|n| (n, score)))
            .collect()
    }

    /// Drop nodes older than retention that are not cleanup-preserved (§8
    /// "Cleanup preservation"): `domain_entity`/`conversation_fact` nodes,
    /// and anything still within the retention window, survive regardless
    /// of relevance. Returns the number of nodes removed.
    pub fn cleanup_stale_nodes(&mut self, retention_hours: i64, now_ms: i64) -> usize {
        let cutoff = now_ms - retention_hours * 3_600_000;
        let stale: Vec<String> = self
            .graph
            .node_indices()
            .filter_map(|ix| {
                let node = &self.graph[ix];
                if node.context_type.is_cleanup_preserved() {
                    return None;
                }
                if node.last_accessed_at < cutoff { Some(node.id.clone()) } else { None }
            })
            .collect();

        for id in &stale {
            if let Some(ix) = self.index_of.remove(id) {
                self.graph.remove_node(ix);
                self.text_index.remove(id);
                self.access_log.remove(id);
                self.write_counter += 1;
            }
        }
        self.entity_index.retain(|_, v| self.index_of.contains_key(v));
        stale.len()
    }
}

impl PathLookup for MemoryGraph {
    fn shortest_path_len(&self, from: &str, to: &str) -> Option<usize> {
        self.shortest_path_len_inner(from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use serde_json::json;

    fn node(id: &str, ctx: ContextType) -> MemoryNode {
        MemoryNode::new(id, json!({"title": id}), ctx).with_summary(id)
    }

    #[test]
    fn store_and_get_roundtrip() {
        let mut graph = MemoryGraph::new(3);
        graph.store(node("n1", ContextType::ToolOutput), 1000);
        assert!(graph.get_node("n1").is_some());
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn store_merges_on_matching_entity_ref() {
        let mut graph = MemoryGraph::new(3);
        let entity = crate::node::EntityRef {
            entity_id: "ACC-1".to_string(),
            entity_type: "account".to_string(),
            entity_system: "salesforce".to_string(),
        };
        let n1 = node("n1", ContextType::DomainEntity).with_entity_ref(entity.clone());
        let n2 = MemoryNode::new("n2", json!({"stage": "won"}), ContextType::DomainEntity).with_entity_ref(entity);

        let id1 = graph.store(n1, 1000);
        let id2 = graph.store(n2, 2000);
        assert_eq!(id1, id2);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.get_node(&id1).unwrap().update_count, 1);
    }

    #[test]
    fn add_relationship_rejects_self_loop() {
        let mut graph = MemoryGraph::new(3);
        graph.store(node("n1", ContextType::ToolOutput), 1000);
        let err = graph.add_relationship("n1", "n1", EdgeLabel::RelatesTo, 0.5);
        assert!(matches!(err, Err(MemoryError::SelfLoop(_))));
    }

    #[test]
    fn add_relationship_is_idempotent_and_takes_max_strength() {
        let mut graph = MemoryGraph::new(3);
        graph.store(node("n1", ContextType::ToolOutput), 1000);
        graph.store(node("n2", ContextType::ToolOutput), 1000);
        graph.add_relationship("n1", "n2", EdgeLabel::RelatesTo, 0.3).unwrap();
        graph.add_relationship("n1", "n2", EdgeLabel::RelatesTo, 0.8).unwrap();
        assert_eq!(graph.graph.edge_count(), 1);
    }

    #[test]
    fn get_related_nodes_respects_max_distance() {
        let mut graph = MemoryGraph::new(3);
        for id in ["a", "b", "c"] {
            graph.store(node(id, ContextType::ToolOutput), 1000);
        }
        graph.add_relationship("a", "b", EdgeLabel::RelatesTo, 0.5).unwrap();
        graph.add_relationship("b", "c", EdgeLabel::RelatesTo, 0.5).unwrap();

        let one_hop = graph.get_related_nodes("a", 1, None);
        assert_eq!(one_hop.len(), 1);
        let two_hop = graph.get_related_nodes("a", 2, None);
        assert_eq!(two_hop.len(), 2);
    }

    #[test]
    fn cleanup_preserves_domain_entities_past_retention() {
        let mut graph = MemoryGraph::new(3);
        let now = 1_000_000_000_i64;
        let old = now - 200 * 3_600_000;
        graph.store(node("stale", ContextType::ToolOutput), old);
        graph.store(node("entity", ContextType::DomainEntity), old);
        let removed = graph.cleanup_stale_nodes(72, now);
        assert_eq!(removed, 1);
        assert!(graph.get_node("stale").is_none());
        assert!(graph.get_node("entity").is_some());
    }

    #[test]
    fn retrieve_relevant_finds_keyword_match() {
        let mut graph = MemoryGraph::new(3);
        graph.store(
            MemoryNode::new("n1", json!({"details": "renewal opportunity for acme corp"}), ContextType::DomainEntity)
                .with_summary("Acme renewal"),
            1000,
        );
        graph.store(node("n2", ContextType::ToolOutput), 1000);

        let cfg = Config::default();
        let results = graph.retrieve_relevant("acme renewal opportunity", &cfg, None, 10, 2000);
        assert!(results.iter().any(|r| r.node.id == "n1"));
    }

    #[test]
    fn find_important_memories_ranks_hub_highest() {
        let mut graph = MemoryGraph::new(3);
        for id in ["hub", "a", "b", "c"] {
            graph.store(node(id, ContextType::ToolOutput), 1000);
        }
        graph.add_relationship("a", "hub", EdgeLabel::RelatesTo, 0.5).unwrap();
        graph.add_relationship("b", "hub", EdgeLabel::RelatesTo, 0.5).unwrap();
        graph.add_relationship("c", "hub", EdgeLabel::RelatesTo, 0.5).unwrap();

        let cfg = Config::default();
        let important = graph.find_important_memories(&cfg, 1, 2000);
        assert_eq!(important[0].0.id, "hub");
    }
}
