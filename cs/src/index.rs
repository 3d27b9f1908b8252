//! Inverted text index (§4.1/§4.2): token -> node ids, with per-node token
//! sets kept alongside so deletions are exact (no need to rescan every
//! other node's content to decide whether a token is still referenced).

use std::collections::{HashMap, HashSet};

use crate::text::tokenize_set;

#[derive(Debug, Default)]
pub struct InvertedIndex {
    token_to_nodes: HashMap<String, HashSet<String>>,
    node_to_tokens: HashMap<String, HashSet<String>>,
    min_token_len: usize,
}

impl InvertedIndex {
    pub fn new(min_token_len: usize) -> Self {
        Self {
            token_to_nodes: HashMap::new(),
            node_to_tokens: HashMap::new(),
            min_token_len,
        }
    }

    /// Index `text` under `node_id`, replacing any previous indexing for
    /// that node.
    pub fn index(&mut self, node_id: &str, text: &str) {
        self.remove(node_id);
        let tokens = tokenize_set(text, self.min_token_len);
        for token in &tokens {
            self.token_to_nodes.entry(token.clone()).or_default().insert(node_id.to_string());
        }
        self.node_to_tokens.insert(node_id.to_string(), tokens);
    }

    /// Remove every posting for `node_id`, dropping now-empty token
    /// entries.
    pub fn remove(&mut self, node_id: &str) {
        if let Some(tokens) = self.node_to_tokens.remove(node_id) {
            for token in tokens {
                if let Some(nodes) = self.token_to_nodes.get_mut(&token) {
                    nodes.remove(node_id);
                    if nodes.is_empty() {
                        self.token_to_nodes.remove(&token);
                    }
                }
            }
        }
    }

    pub fn nodes_for_token(&self, token: &str) -> Option<&HashSet<String>> {
        self.token_to_nodes.get(token)
    }

    pub fn contains_token(&self, token: &str) -> bool {
        self.token_to_nodes.contains_key(token)
    }

    pub fn tokens_for_node(&self, node_id: &str) -> Option<&HashSet<String>> {
        self.node_to_tokens.get(node_id)
    }

    /// Union of node ids whose indexed text contains at least one of
    /// `query_tokens`.
    pub fn candidates(&self, query_tokens: &[String]) -> HashSet<String> {
        let mut out = HashSet::new();
        for token in query_tokens {
            if let Some(nodes) = self.token_to_nodes.get(token) {
                out.extend(nodes.iter().cloned());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_and_lookup_roundtrip() {
        let mut idx = InvertedIndex::new(3);
        idx.index("n1", "found 1 opportunity about renewal");
        assert!(idx.contains_token("opportunity"));
        assert!(idx.nodes_for_token("opportunity").unwrap().contains("n1"));
    }

    #[test]
    fn reindexing_replaces_old_tokens() {
        let mut idx = InvertedIndex::new(3);
        idx.index("n1", "alpha beta");
        idx.index("n1", "gamma delta");
        assert!(!idx.contains_token("alpha"));
        assert!(idx.contains_token("gamma"));
    }

    #[test]
    fn remove_drops_empty_token_entries() {
        let mut idx = InvertedIndex::new(3);
        idx.index("n1", "unique_token_xyz");
        assert!(idx.contains_token("unique_token_xyz"));
        idx.remove("n1");
        assert!(!idx.contains_token("unique_token_xyz"));
    }

    #[test]
    fn candidates_is_union_across_tokens() {
        let mut idx = InvertedIndex::new(3);
        idx.index("n1", "alpha beta");
        idx.index("n2", "gamma delta");
        let candidates = idx.candidates(&["alpha".to_string(), "gamma".to_string()]);
        assert_eq!(candidates.len(), 2);
    }
}
