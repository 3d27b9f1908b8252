//! Graph Algorithms (§4.4): PageRank for importance, Brandes' betweenness
//! for bridges, and label propagation for community detection. All three
//! operate over a plain adjacency map so they stay testable independent of
//! the graph's concrete backing structure (petgraph, in `graph.rs`).

use std::collections::{HashMap, VecDeque};

/// Undirected, label-agnostic adjacency: node id -> neighbor ids. Built by
/// the caller from the labelled graph's edges (§4.4 "undirected projection").
pub type Adjacency = HashMap<String, Vec<String>>;

/// PageRank over the (directed) adjacency, damping factor `damping` (0.85
/// per §4.4), run to convergence or `max_iterations`.
pub fn pagerank(directed_adjacency: &Adjacency, damping: f64, max_iterations: usize) -> HashMap<String, f64> {
    let n = directed_adjacency.len();
    if n == 0 {
        return HashMap::new();
    }

    let mut ranks: HashMap<String, f64> = directed_adjacency.keys().map(|id| (id.clone(), 1.0 / n as f64)).collect();

    // Reverse adjacency: who points at me.
    let mut incoming: HashMap<String, Vec<String>> = HashMap::new();
    for (src, outs) in directed_adjacency {
        for dst in outs {
            incoming.entry(dst.clone()).or_default().push(src.clone());
        }
        incoming.entry(src.clone()).or_default();
    }

    let out_degree: HashMap<String, usize> = directed_adjacency.iter().map(|(id, outs)| (id.clone(), outs.len())).collect();

    for _ in 0..max_iterations {
        let mut next: HashMap<String, f64> = HashMap::new();
        let dangling_sum: f64 = directed_adjacency
            .keys()
            .filter(|id| out_degree.get(*id).copied().unwrap_or(0) == 0)
            .map(|id| ranks[id])
            .sum();

        for node in directed_adjacency.keys() {
            let mut score = (1.0 - damping) / n as f64;
            score += damping * dangling_sum / n as f64;
            if let Some(srcs) = incoming.get(node) {
                for src in srcs {
                    let deg = out_degree.get(src).copied().unwrap_or(0);
                    if deg > 0 {
                        score += damping * ranks[src] / deg as f64;
                    }
                }
            }
            next.insert(node.clone(), score);
        }

        let delta: f64 = next.iter().map(|(k, v)| (v - ranks[k]).abs()).sum();
        ranks = next;
        if delta < 1e-9 {
            break;
        }
    }

    ranks
}

/// Brandes' algorithm for betweenness centrality over an undirected
/// adjacency, normalized to `[0, 1]` by dividing by the number of ordered
/// pairs excluding the node itself, `(n-1)(n-2)`.
pub fn betweenness_centrality(undirected_adjacency: &Adjacency) -> HashMap<String, f64> {
    let nodes: Vec<&String> = undirected_adjacency.keys().collect();
    let n = nodes.len();
    let mut centrality: HashMap<String, f64> = nodes.iter().map(|id| ((*id).clone(), 0.0)).collect();
    if n < 3 {
        return centrality;
    }

    for s in &nodes {
        let mut stack = Vec::new();
        let mut preds: HashMap<&String, Vec<&String>> = HashMap::new();
        let mut sigma: HashMap<&String, f64> = nodes.iter().map(|id| (*id, 0.0)).collect();
        let mut dist: HashMap<&String, i64> = nodes.iter().map(|id| (*id, -1)).collect();
        sigma.insert(s, 1.0);
        dist.insert(s, 0);

        let mut queue = VecDeque::new();
        queue.push_back(*s);

        while let Some(v) = queue.pop_front() {
            stack.push(v);
            if let Some(neighbors) = undirected_adjacency.get(v) {
                for w in neighbors {
                    if dist[&w] < 0 {
                        dist.insert(w, dist[v] + 1);
                        queue.push_back(w);
                    }
                    if dist[&w] == dist[v] + 1 {
                        sigma.insert(w, sigma[&w] + sigma[v]);
                        preds.entry(w).or_default().push(v);
                    }
                }
            }
        }

        let mut delta: HashMap<&String, f64> = nodes.iter().map(|id| (*id, 0.0)).collect();
        while let Some(w) = stack.pop() {
            if let Some(ps) = preds.get(w) {
                for v in ps {
                    let contrib = (sigma[v] / sigma[&w]) * (1.0 + delta[w]);
                    *delta.get_mut(v).unwrap() += contrib;
                }
            }
            if w != s {
                *centrality.get_mut(w).unwrap() += delta[w];
            }
        }
    }

    let norm = ((n - 1) * (n - 2)) as f64;
    if norm > 0.0 {
        for v in centrality.values_mut() {
            *v /= norm;
        }
    }
    centrality
}

/// Label propagation community detection over an undirected adjacency.
/// Deterministic given a fixed iteration cap: nodes are visited in sorted
/// id order each round, and ties among the most frequent neighbor labels
/// are broken by choosing the smallest label (§4.4 resolved open
/// question).
pub fn label_propagation(undirected_adjacency: &Adjacency, max_iterations: usize) -> HashMap<String, usize> {
    let mut order: Vec<String> = undirected_adjacency.keys().cloned().collect();
    order.sort();

    let mut labels: HashMap<String, usize> = order.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();

    for _ in 0..max_iterations {
        let mut changed = false;
        for node in &order {
            let Some(neighbors) = undirected_adjacency.get(node) else {
                continue;
            };
            if neighbors.is_empty() {
                continue;
            }
            let mut counts: HashMap<usize, usize> = HashMap::new();
            for nb in neighbors {
                if let Some(label) = labels.get(nb) {
                    *counts.entry(*label).or_default() += 1;
                }
            }
            if counts.is_empty() {
                continue;
            }
            let max_count = *counts.values().max().unwrap();
            let best_label = counts.iter().filter(|(_, c)| **c == max_count).map(|(l, _)| *l).min().unwrap();

            if labels.get(node) != Some(&best_label) {
                labels.insert(node.clone(), best_label);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjacency(pairs: &[(&str, &str)]) -> Adjacency {
        let mut adj: Adjacency = HashMap::new();
        for (a, b) in pairs {
            adj.entry(a.to_string()).or_default().push(b.to_string());
            adj.entry(b.to_string()).or_default();
        }
        adj
    }

    fn undirected(pairs: &[(&str, &str)]) -> Adjacency {
        let mut adj: Adjacency = HashMap::new();
        for (a, b) in pairs {
            adj.entry(a.to_string()).or_default().push(b.to_string());
            adj.entry(b.to_string()).or_default().push(a.to_string());
        }
        adj
    }

    #[test]
    fn pagerank_ranks_sum_close_to_one() {
        let adj = adjacency(&[("a", "b"), ("b", "c"), ("c", "a")]);
        let ranks = pagerank(&adj, 0.85, 100);
        let sum: f64 = ranks.values().sum();
        assert!((sum - 1.0).abs() < 0.05, "sum={sum}");
    }

    #[test]
    fn pagerank_hub_outranks_leaves() {
        // a <- b, a <- c, a <- d: "a" should accrue the most rank.
        let adj = adjacency(&[("b", "a"), ("c", "a"), ("d", "a")]);
        let ranks = pagerank(&adj, 0.85, 100);
        assert!(ranks["a"] > ranks["b"]);
    }

    #[test]
    fn betweenness_bridge_node_scores_highest() {
        // a-b-c: "b" sits on the only path between a and c.
        let adj = undirected(&[("a", "b"), ("b", "c")]);
        let bc = betweenness_centrality(&adj);
        assert!(bc["b"] > bc["a"]);
        assert!(bc["b"] > bc["c"]);
    }

    #[test]
    fn label_propagation_is_deterministic() {
        let adj = undirected(&[("a", "b"), ("b", "c"), ("d", "e")]);
        let first = label_propagation(&adj, 20);
        let second = label_propagation(&adj, 20);
        assert_eq!(first, second);
        // a/b/c should share a label distinct from d/e.
        assert_eq!(first["a"], first["b"]);
        assert_ne!(first["a"], first["d"]);
    }
}
