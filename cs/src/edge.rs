//! Memory Edge (§3): a directed, labelled relationship between two nodes.

use serde::{Deserialize, Serialize};

/// The closed set of relationship labels a memory edge may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeLabel {
    LedTo,
    RelatesTo,
    DependsOn,
    Contradicts,
    Refines,
    Answers,
}

impl std::fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::LedTo => "led_to",
            Self::RelatesTo => "relates_to",
            Self::DependsOn => "depends_on",
            Self::Contradicts => "contradicts",
            Self::Refines => "refines",
            Self::Answers => "answers",
        };
        write!(f, "{s}")
    }
}

/// A directed edge. Multi-edges with distinct labels between the same pair
/// are permitted; self-loops are not (§3 invariant).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEdge {
    pub from: String,
    pub to: String,
    pub label: EdgeLabel,
    pub strength: f64,
}

impl MemoryEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, label: EdgeLabel, strength: f64) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label,
            strength: strength.clamp(0.0, 1.0),
        }
    }
}
