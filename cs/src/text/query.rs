//! Query typing (§4.2): determines which scoring weight profile applies.

use super::entities::{EntityMatch, extract_entities};
use super::tokenizer::tokenize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    EntityLookup,
    RecentContext,
    GraphNavigation,
    SemanticSearch,
    Default,
}

/// Positional phrasing that doubles the recency-boost component (§4.3).
const POSITIONAL_PHRASES: &[&str] = &["first", "second", "last", "that", "this one", "next", "previous"];

const RECENT_PHRASES: &[&str] = &["recent", "latest", "last", "previous", "earlier"];
const GRAPH_PHRASES: &[&str] = &["related", "connected", "linked", "associated"];

fn is_pure_upper_or_digits(query: &str) -> bool {
    let stripped: String = query.chars().filter(|c| !c.is_whitespace()).collect();
    !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
}

/// Classify a query per §4.2's decision order: entity lookup first, then
/// recent-context/graph-navigation phrasing, then semantic search (only
/// when embeddings are available and the query is long), else default.
pub fn classify_query(query: &str, entities: &[EntityMatch], embeddings_available: bool) -> QueryType {
    if !entities.is_empty() || is_pure_upper_or_digits(query) {
        return QueryType::EntityLookup;
    }

    let lower = query.to_lowercase();
    if RECENT_PHRASES.iter().any(|p| lower.contains(p)) {
        return QueryType::RecentContext;
    }
    if GRAPH_PHRASES.iter().any(|p| lower.contains(p)) {
        return QueryType::GraphNavigation;
    }

    let token_count = tokenize(query, 1).len();
    if embeddings_available && token_count > 3 {
        return QueryType::SemanticSearch;
    }

    QueryType::Default
}

/// Entities extracted plus the classified type, computed together since
/// typing depends on extraction (§4.2).
pub fn analyze_query(query: &str, embeddings_available: bool) -> (Vec<EntityMatch>, QueryType) {
    let entities = extract_entities(query);
    let query_type = classify_query(query, &entities, embeddings_available);
    (entities, query_type)
}

/// Whether the query carries positional phrasing, doubling the recency
/// boost (§4.3).
pub fn has_positional_phrasing(query: &str) -> bool {
    let lower = query.to_lowercase();
    POSITIONAL_PHRASES.iter().any(|p| lower.contains(p))
}

/// A query is "nonsense" only when none of its tokens appear in the index
/// and the graph holds more than the configured bypass threshold of nodes
/// (§4.2, §9 Open Question c).
pub fn is_nonsense_query(query_tokens: &[String], any_token_indexed: impl Fn(&str) -> bool, node_count: usize, bypass_below: usize) -> bool {
    if node_count <= bypass_below {
        return false;
    }
    !query_tokens.iter().any(|t| any_token_indexed(t))
}
