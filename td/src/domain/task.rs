//! Execution Task: a single node in a Planner-generated task DAG.
//!
//! Distinct from the scheduler's [`super::Priority`], which only orders
//! Agent RPC calls. `TaskPriority` orders which *task* the Planner should
//! hand to the scheduler next when several are ready simultaneously.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskstore::{IndexValue, Record, now_ms};
use tracing::debug;

use super::id::generate_id;

/// Priority of a Planner task, independent of Agent RPC scheduling priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

/// Status of a single task within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Ready,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One node of a Planner-generated DAG: a unit of work dispatched to an
/// agent via the Agent RPC Client, gated on its `depends_on` tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTask {
    pub id: String,

    /// Id of the `Plan` (and, transitively, the `WorkflowInstance`) this
    /// task belongs to.
    pub plan_id: String,

    /// Human-readable description the Planner generated, given verbatim to
    /// the agent as the task's objective.
    pub description: String,

    pub status: TaskStatus,

    pub priority: TaskPriority,

    /// Ids of tasks that must be `Completed` before this one becomes `Ready`.
    pub depends_on: Vec<String>,

    /// Free-form structured input handed to the agent alongside
    /// `description` (entity ids, form fields, prior step outputs).
    #[serde(default)]
    pub input: Value,

    /// Structured result returned by the agent once the task completes.
    #[serde(default)]
    pub result: Option<Value>,

    /// Error message if the task failed.
    #[serde(default)]
    pub error: Option<String>,

    /// Number of attempts made so far (for retry/backoff accounting).
    #[serde(default)]
    pub attempts: u32,

    pub created_at: i64,
    pub updated_at: i64,
}

impl ExecutionTask {
    pub fn new(plan_id: impl Into<String>, description: impl Into<String>, priority: TaskPriority) -> Self {
        let plan_id = plan_id.into();
        let description = description.into();
        let now = now_ms();
        debug!(%plan_id, %description, ?priority, "ExecutionTask::new: called");
        Self {
            id: generate_id("task", &description),
            plan_id,
            description,
            status: TaskStatus::Pending,
            priority,
            depends_on: Vec::new(),
            input: Value::Null,
            result: None,
            error: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    /// True if every dependency id in `completed` is satisfied and the task
    /// is still pending.
    pub fn is_ready(&self, completed: &std::collections::HashSet<String>) -> bool {
        self.status == TaskStatus::Pending && self.depends_on.iter().all(|d| completed.contains(d))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
    }

    pub fn mark_ready(&mut self) {
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Ready;
            self.updated_at = now_ms();
        }
    }

    pub fn mark_in_progress(&mut self) {
        self.status = TaskStatus::InProgress;
        self.attempts += 1;
        self.updated_at = now_ms();
    }

    pub fn mark_completed(&mut self, result: Value) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.updated_at = now_ms();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.updated_at = now_ms();
    }
}

impl Record for ExecutionTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "execution_tasks"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("plan_id".to_string(), IndexValue::String(self.plan_id.clone()));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("priority".to_string(), IndexValue::String(self.priority.to_string()));
        fields
    }
}
