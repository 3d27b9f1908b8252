//! Configuration for the memory subsystem: storage paths plus the scoring,
//! decay, and text-processing constants from §3/§4.2/§4.3 of the design.
//! Kept as data (not scattered literals) so tests can inject alternates and
//! operators can override via YAML, per the design's constructor-injection
//! note.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use eyre::Result;
use serde::{Deserialize, Serialize};

use crate::node::ContextType;
use crate::text::query::QueryType;

/// Half-life, in hours, used by the exponential decay term of current
/// relevance. Indexed by [`ContextType`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HalfLives {
    pub temporary_state: f64,
    pub search_result: f64,
    pub tool_output: f64,
    pub completed_action: f64,
    pub conversation_fact: f64,
    pub user_selection: f64,
    pub domain_entity: f64,
    pub default: f64,
}

impl Default for HalfLives {
    fn default() -> Self {
        Self {
            temporary_state: 3.0,
            search_result: 6.0,
            tool_output: 8.0,
            completed_action: 12.0,
            conversation_fact: 24.0,
            user_selection: 36.0,
            domain_entity: 48.0,
            default: 12.0,
        }
    }
}

impl HalfLives {
    pub fn for_type(&self, ctx: ContextType) -> f64 {
        match ctx {
            ContextType::TemporaryState => self.temporary_state,
            ContextType::SearchResult => self.search_result,
            ContextType::ToolOutput => self.tool_output,
            ContextType::CompletedAction => self.completed_action,
            ContextType::ConversationFact => self.conversation_fact,
            ContextType::UserSelection => self.user_selection,
            ContextType::DomainEntity => self.domain_entity,
        }
    }
}

/// Per-query-type scoring weight profile (§4.3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WeightProfile {
    pub keyword: f64,
    pub semantic: f64,
    pub context: f64,
    pub graph: f64,
    pub recency: f64,
    pub base: f64,
}

/// All scoring constants, keyed by query type plus the shared recency/spam
/// literals. Values are taken verbatim from the design's pinned constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub default_profile: WeightProfile,
    pub entity_lookup_profile: WeightProfile,
    pub semantic_search_profile: WeightProfile,
    pub recent_context_profile: WeightProfile,
    pub graph_navigation_profile: WeightProfile,

    /// Recency-boost time bands, in hours.
    pub very_recent_threshold_hours: f64,
    pub recent_threshold_hours: f64,
    pub somewhat_recent_threshold_hours: f64,
    pub positional_recency_multiplier: f64,

    /// Window, in seconds, within which a node counts as "recently accessed"
    /// for the Context and Graph score components.
    pub access_recency_window_secs: i64,

    pub spam_tag_penalty: f64,
    pub keyword_density_threshold: f64,
    pub keyword_density_penalty: f64,
    pub suspicious_access_penalty: f64,

    /// Floor applied after per-node scoring; doubled when the query has
    /// more than three tokens (§4.3).
    pub min_score_floor_default: f64,
    pub min_score_floor_long_query: f64,

    /// Top-score prune rule thresholds (§4.3 / Open Question b).
    pub prune_top_over_mean_ratio: f64,
    pub prune_top_score_floor: f64,
    pub prune_score_ratio: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            default_profile: WeightProfile {
                keyword: 0.40,
                semantic: 0.25,
                context: 0.15,
                graph: 0.10,
                recency: 0.20,
                base: 0.15,
            },
            entity_lookup_profile: WeightProfile {
                keyword: 0.60,
                semantic: 0.10,
                context: 0.10,
                graph: 0.05,
                recency: 0.10,
                base: 0.05,
            },
            semantic_search_profile: WeightProfile {
                keyword: 0.20,
                semantic: 0.50,
                context: 0.10,
                graph: 0.05,
                recency: 0.10,
                base: 0.05,
            },
            recent_context_profile: WeightProfile {
                keyword: 0.20,
                semantic: 0.20,
                context: 0.25,
                graph: 0.15,
                recency: 0.40,
                base: 0.00,
            },
            graph_navigation_profile: WeightProfile {
                keyword: 0.10,
                semantic: 0.10,
                context: 0.20,
                graph: 0.40,
                recency: 0.15,
                base: 0.05,
            },
            very_recent_threshold_hours: 0.1,
            recent_threshold_hours: 0.5,
            somewhat_recent_threshold_hours: 2.0,
            positional_recency_multiplier: 2.0,
            access_recency_window_secs: 300,
            spam_tag_penalty: 0.3,
            keyword_density_threshold: 0.3,
            keyword_density_penalty: 0.2,
            suspicious_access_penalty: 0.1,
            min_score_floor_default: 0.3,
            min_score_floor_long_query: 0.5,
            prune_top_over_mean_ratio: 2.0,
            prune_top_score_floor: 0.5,
            prune_score_ratio: 0.6,
        }
    }
}

impl ScoringConfig {
    pub fn profile_for(&self, query_type: QueryType) -> WeightProfile {
        match query_type {
            QueryType::EntityLookup => self.entity_lookup_profile,
            QueryType::SemanticSearch => self.semantic_search_profile,
            QueryType::RecentContext => self.recent_context_profile,
            QueryType::GraphNavigation => self.graph_navigation_profile,
            QueryType::Default => self.default_profile,
        }
    }
}

/// Closed stop-word list for tokenization (§4.2). Deliberately small: only
/// words common enough to pollute every query's keyword score.
pub fn stop_words() -> &'static HashSet<&'static str> {
    static WORDS: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    WORDS.get_or_init(|| {
        [
            "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one", "our", "out",
            "day", "get", "has", "him", "his", "how", "man", "new", "now", "old", "see", "two", "way", "who", "boy",
            "did", "its", "let", "put", "say", "she", "too", "use", "that", "this", "with", "from", "they", "what",
            "have", "been", "were", "will", "would", "there", "their", "about",
        ]
        .into_iter()
        .collect()
    })
}

/// Generic tags/terms that still count toward the keyword score but at a
/// much lower weight than a specific entity/domain term (§4.3 "+0.2 per
/// generic-term hit").
pub fn generic_terms() -> &'static HashSet<&'static str> {
    static TERMS: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    TERMS.get_or_init(|| {
        [
            "opportunity", "account", "case", "ticket", "issue", "task", "record", "item", "request", "update",
            "status", "customer", "contact",
        ]
        .into_iter()
        .collect()
    })
}

/// Spam-like tags that trigger the §4.3 spam penalty.
pub fn spam_tags() -> &'static HashSet<&'static str> {
    static TAGS: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    TAGS.get_or_init(|| ["spam", "noise", "pollution", "malicious", "hub", "connector"].into_iter().collect())
}

fn default_local_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskdaemon")
        .join("memory.sqlite3")
}

fn default_durable_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskdaemon")
        .join("memory-durable.sqlite3")
}

/// Top-level memory subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_local_store_path")]
    pub local_store_path: PathBuf,

    #[serde(default = "default_durable_store_path")]
    pub durable_store_path: PathBuf,

    #[serde(default)]
    pub half_lives: HalfLives,

    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Minimum token length to survive tokenization (§4.2).
    #[serde(default = "default_min_token_len")]
    pub min_token_len: usize,

    /// Graph size below which the "nonsense query" short-circuit is
    /// bypassed (§4.2, §9 Open Question c).
    #[serde(default = "default_nonsense_bypass_node_count")]
    pub nonsense_bypass_node_count: usize,

    /// Seconds a cached graph-metrics result (PageRank/betweenness/
    /// community) remains valid before lazy recompute (§4.4).
    #[serde(default = "default_metrics_cache_secs")]
    pub metrics_cache_secs: i64,

    /// Hours of thread inactivity before its local graph is dropped (§4.5).
    #[serde(default = "default_thread_retention_hours")]
    pub thread_retention_hours: i64,

    /// Days of durable-store retention per user before cleanup purges a
    /// node (§4.5).
    #[serde(default = "default_durable_retention_days")]
    pub durable_retention_days: i64,
}

fn default_min_token_len() -> usize {
    3
}

fn default_nonsense_bypass_node_count() -> usize {
    100
}

fn default_metrics_cache_secs() -> i64 {
    300
}

fn default_thread_retention_hours() -> i64 {
    72
}

fn default_durable_retention_days() -> i64 {
    90
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_store_path: default_local_store_path(),
            durable_store_path: default_durable_store_path(),
            half_lives: HalfLives::default(),
            scoring: ScoringConfig::default(),
            min_token_len: default_min_token_len(),
            nonsense_bypass_node_count: default_nonsense_bypass_node_count(),
            metrics_cache_secs: default_metrics_cache_secs(),
            thread_retention_hours: default_thread_retention_hours(),
            durable_retention_days: default_durable_retention_days(),
        }
    }
}

impl Config {
    /// Load config from an explicit path, or the default XDG location, or
    /// built-in defaults.
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)?;
            return Ok(serde_yaml::from_str(&content)?);
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("taskdaemon").join("memory.yaml")),
            Some(PathBuf::from("memory.yaml")),
        ];
        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                return Ok(serde_yaml::from_str(&content)?);
            }
        }

        Ok(Config::default())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_life_lookup_matches_spec_constants() {
        let hl = HalfLives::default();
        assert_eq!(hl.for_type(ContextType::TemporaryState), 3.0);
        assert_eq!(hl.for_type(ContextType::DomainEntity), 48.0);
    }

    #[test]
    fn weight_profiles_sum_close_to_one() {
        let cfg = ScoringConfig::default();
        let p = cfg.profile_for(QueryType::Default);
        let sum = p.keyword + p.semantic + p.context + p.graph + p.recency + p.base;
        assert!((sum - 1.25).abs() < 1e-9, "unexpected weight sum: {sum}");
    }
}
