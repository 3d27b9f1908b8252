//! Workflow Instance: the runtime record of one execution of a
//! [`super::definition::WorkflowDefinition`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskstore::{IndexValue, Record, now_ms};
use tracing::debug;

use super::id::generate_id;

/// Instance lifecycle, per the state machine in §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Pending,
    Running,
    Waiting,
    WaitingForHuman,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::WaitingForHuman => "waiting_for_human",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_suspended(self) -> bool {
        matches!(self, Self::Waiting | Self::WaitingForHuman | Self::Paused)
    }
}

/// Outcome recorded for a completed step in the history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcomeKind {
    Completed,
    Failed,
    Skipped,
    Interrupted,
}

/// One append-only entry in a `WorkflowInstance`'s step history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step_id: String,
    pub step_type: String,
    pub started_at: i64,
    pub duration_ms: u64,
    pub outcome: StepOutcomeKind,
    pub next: Option<String>,
}

/// A structured interrupt payload handed back to the caller when an
/// instance suspends on a `human` step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptPayload {
    pub step_id: String,
    pub step_name: String,
    pub description: String,
    pub workflow_id: String,
    pub context: Value,
    pub metadata: Value,
}

/// Runtime state of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub definition_id: String,
    pub status: InstanceStatus,
    pub current_step_id: String,

    /// Merged initial + accumulated per-step `*_result`/`last_*` variables.
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    pub history: Vec<HistoryEntry>,

    /// Pending interrupt payload, present only while `status ==
    /// waiting_for_human`.
    #[serde(default)]
    pub interrupt: Option<InterruptPayload>,

    /// Parent instance id, for sub-workflows invoked from a step.
    #[serde(default)]
    pub parent_instance_id: Option<String>,

    /// External thread id this instance was dispatched under (`<agent>-<task_id>`),
    /// used by the Manager to correlate resume requests.
    pub triggered_by: String,

    pub created_at: i64,
    pub updated_at: i64,

    #[serde(default)]
    pub completed_at: Option<i64>,
}

impl WorkflowInstance {
    pub fn new(definition_id: impl Into<String>, entry_step: impl Into<String>, triggered_by: impl Into<String>) -> Self {
        let definition_id = definition_id.into();
        let now = now_ms();
        Self {
            id: generate_id("wfinst", &definition_id),
            definition_id,
            status: InstanceStatus::Pending,
            current_step_id: entry_step.into(),
            variables: HashMap::new(),
            history: Vec::new(),
            interrupt: None,
            parent_instance_id: None,
            triggered_by: triggered_by.into(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_parent(mut self, parent_instance_id: impl Into<String>) -> Self {
        self.parent_instance_id = Some(parent_instance_id.into());
        self
    }

    pub fn set_status(&mut self, status: InstanceStatus) {
        debug!(%self.id, ?status, "WorkflowInstance::set_status: called");
        self.status = status;
        self.updated_at = now_ms();
        if status.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
        self.updated_at = now_ms();
    }

    pub fn get_variable(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
        self.updated_at = now_ms();
    }

    pub fn suspend_for_human(&mut self, payload: InterruptPayload) {
        self.interrupt = Some(payload);
        self.set_status(InstanceStatus::WaitingForHuman);
    }

    /// Resume from a human interrupt: clears the pending payload, writes
    /// the supplied value under `<step_id>_response` and `last_human_response`,
    /// and advances to `running`.
    pub fn resume_with_human_input(&mut self, value: Value) -> Option<String> {
        let Some(payload) = self.interrupt.take() else {
            return None;
        };
        self.set_variable(format!("{}_response", payload.step_id), value.clone());
        self.set_variable("last_human_response", value);
        self.set_status(InstanceStatus::Running);
        Some(payload.step_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Record for WorkflowInstance {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "workflow_instances"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("definition_id".to_string(), IndexValue::String(self.definition_id.clone()));
        fields.insert("triggered_by".to_string(), IndexValue::String(self.triggered_by.clone()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_instance_is_pending() {
        let inst = WorkflowInstance::new("wf-1", "start", "salesforce-task-1");
        assert_eq!(inst.status, InstanceStatus::Pending);
        assert_eq!(inst.current_step_id, "start");
    }

    #[test]
    fn terminal_status_sets_completed_at() {
        let mut inst = WorkflowInstance::new("wf-1", "start", "t1");
        assert!(inst.completed_at.is_none());
        inst.set_status(InstanceStatus::Completed);
        assert!(inst.completed_at.is_some());
    }

    #[test]
    fn interrupt_round_trip() {
        let mut inst = WorkflowInstance::new("wf-1", "select_opportunity", "salesforce-task-1");
        inst.suspend_for_human(InterruptPayload {
            step_id: "select_opportunity".to_string(),
            step_name: "Select Opportunity".to_string(),
            description: "Pick one".to_string(),
            workflow_id: "wf-1".to_string(),
            context: Value::Null,
            metadata: Value::Null,
        });
        assert_eq!(inst.status, InstanceStatus::WaitingForHuman);
        assert!(inst.interrupt.is_some());

        let resumed_step = inst.resume_with_human_input(Value::String("006XYZ".to_string()));
        assert_eq!(resumed_step, Some("select_opportunity".to_string()));
        assert_eq!(inst.status, InstanceStatus::Running);
        assert!(inst.interrupt.is_none());
        assert_eq!(
            inst.get_variable("select_opportunity_response"),
            Some(&Value::String("006XYZ".to_string()))
        );
        assert_eq!(
            inst.get_variable("last_human_response"),
            Some(&Value::String("006XYZ".to_string()))
        );
    }

    #[test]
    fn resume_without_pending_interrupt_is_noop() {
        let mut inst = WorkflowInstance::new("wf-1", "start", "t1");
        assert_eq!(inst.resume_with_human_input(Value::Null), None);
    }
}
