//! CLI argument parsing for the `mem` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::edge::EdgeLabel;
use crate::node::ContextType;

#[derive(Parser, Debug)]
#[command(name = "mem")]
#[command(author, version, about = "Conversational memory graph store", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store (or entity-merge) a memory node
    Store {
        /// Thread/conversation scope the node belongs to
        #[arg(long)]
        scope: String,

        /// User id, required for context types that are globally shared
        #[arg(long)]
        user_id: Option<String>,

        /// Lifecycle class of the node
        #[arg(long, value_enum)]
        context_type: ContextTypeArg,

        /// JSON content body
        #[arg(long)]
        content: String,

        /// Optional free-text summary
        #[arg(long)]
        summary: Option<String>,

        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Entity system, e.g. `salesforce` (requires --entity-id)
        #[arg(long, requires = "entity_id")]
        entity_system: Option<String>,

        /// Entity id within `entity_system`
        #[arg(long)]
        entity_id: Option<String>,

        /// Entity type, e.g. `account`
        #[arg(long, default_value = "record")]
        entity_type: String,
    },

    /// Add a directed relationship between two existing nodes
    Relate {
        #[arg(long)]
        scope: String,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        #[arg(long, value_enum)]
        label: EdgeLabelArg,

        /// Relationship strength in [0, 1]
        #[arg(long, default_value = "1.0")]
        strength: f64,
    },

    /// Retrieve the most relevant nodes for a query
    Query {
        #[arg(long)]
        scope: String,

        query: String,

        #[arg(long, default_value = "10")]
        max_results: usize,
    },

    /// Walk the graph from a node out to `max_distance` hops
    Related {
        #[arg(long)]
        scope: String,

        node_id: String,

        #[arg(long, default_value = "2")]
        max_distance: usize,

        #[arg(long, value_enum)]
        label: Option<EdgeLabelArg>,
    },

    /// Rank nodes by PageRank over the relationship graph
    Important {
        #[arg(long)]
        scope: String,

        #[arg(long, default_value = "10")]
        top_n: usize,
    },

    /// Group nodes into communities via label propagation
    Clusters {
        #[arg(long)]
        scope: String,
    },

    /// Rank nodes by betweenness centrality ("bridge" memories)
    Bridges {
        #[arg(long)]
        scope: String,

        #[arg(long, default_value = "10")]
        top_n: usize,
    },

    /// Evict idle scopes and purge stale durable entities
    Cleanup,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ContextTypeArg {
    SearchResult,
    UserSelection,
    ToolOutput,
    DomainEntity,
    CompletedAction,
    ConversationFact,
    TemporaryState,
}

impl From<ContextTypeArg> for ContextType {
    fn from(value: ContextTypeArg) -> Self {
        match value {
            ContextTypeArg::SearchResult => ContextType::SearchResult,
            ContextTypeArg::UserSelection => ContextType::UserSelection,
            ContextTypeArg::ToolOutput => ContextType::ToolOutput,
            ContextTypeArg::DomainEntity => ContextType::DomainEntity,
            ContextTypeArg::CompletedAction => ContextType::CompletedAction,
            ContextTypeArg::ConversationFact => ContextType::ConversationFact,
            ContextTypeArg::TemporaryState => ContextType::TemporaryState,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum EdgeLabelArg {
    LedTo,
    RelatesTo,
    DependsOn,
    Contradicts,
    Refines,
    Answers,
}

impl From<EdgeLabelArg> for EdgeLabel {
    fn from(value: EdgeLabelArg) -> Self {
        match value {
            EdgeLabelArg::LedTo => EdgeLabel::LedTo,
            EdgeLabelArg::RelatesTo => EdgeLabel::RelatesTo,
            EdgeLabelArg::DependsOn => EdgeLabel::DependsOn,
            EdgeLabelArg::Contradicts => EdgeLabel::Contradicts,
            EdgeLabelArg::Refines => EdgeLabel::Refines,
            EdgeLabelArg::Answers => EdgeLabel::Answers,
        }
    }
}
