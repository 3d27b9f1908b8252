//! Plan: the Planner's top-level record grouping an [`super::ExecutionTask`] DAG
//! under one instruction, owned by the orchestrator session that requested it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};

use super::id::generate_id;

/// Lifecycle of a Plan. Terminal when every task is `completed` or `cancelled`
/// (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Active,
    Completed,
    Cancelled,
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A Planner-generated task DAG: the original instruction plus conversation
/// context it was decomposed from, and bookkeeping for replanning.
///
/// Tasks themselves are stored separately (`ExecutionTask::plan_id` points
/// back here) rather than embedded, so the Planner can list/update individual
/// tasks through `taskstore::Store` without rewriting the whole plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,

    /// The instruction this plan was decomposed from.
    pub instruction: String,

    pub status: PlanStatus,

    /// Number of times `replan` has been invoked against this plan.
    #[serde(default)]
    pub replan_count: u32,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Plan {
    pub fn new(instruction: impl Into<String>) -> Self {
        let instruction = instruction.into();
        let now = now_ms();
        Self {
            id: generate_id("plan", &instruction),
            instruction,
            status: PlanStatus::Active,
            replan_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn mark_replanned(&mut self) {
        self.replan_count += 1;
        self.updated_at = now_ms();
    }

    pub fn set_status(&mut self, status: PlanStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }
}

impl Record for Plan {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "plans"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields
    }
}
