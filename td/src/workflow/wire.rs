//! Wire types for the Agent RPC JSON envelope (§6). Everything here is
//! explicit serde structs except `state_snapshot`, which stays opaque
//! `serde_json::Value` since the Engine never interprets it, only forwards
//! and restores it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    pub workflow_id: String,
    pub workflow_name: String,
    pub step_id: String,
    pub step_name: String,
    pub variables: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: String,
    pub instruction: String,
    pub context: TaskContext,
    pub state_snapshot: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub task_id: String,
    pub content: Value,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponseMetadata {
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub interrupt_data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    pub status: TaskStatus,
    #[serde(default)]
    pub metadata: Option<TaskResponseMetadata>,
}

impl TaskRequest {
    /// Build a task id of the form `workflow-<wf>-<step>`, per §4.8.
    pub fn workflow_task_id(workflow_id: &str, step_id: &str) -> String {
        format!("workflow-{workflow_id}-{step_id}")
    }

    /// Build a task id of the form `wf_<agent>_<epoch>`, used when a step
    /// dispatches outside the context of a specific workflow step (e.g. the
    /// Planner dispatching a standalone task).
    pub fn agent_task_id(agent: &str, epoch_ms: i64) -> String {
        format!("wf_{agent}_{epoch_ms}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_task_id_format() {
        assert_eq!(
            TaskRequest::workflow_task_id("onboarding", "select_opportunity"),
            "workflow-onboarding-select_opportunity"
        );
    }

    #[test]
    fn response_deserializes_without_metadata() {
        let json = r#"{"artifacts":[],"status":"completed"}"#;
        let resp: TaskResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.status, TaskStatus::Completed);
        assert!(resp.metadata.is_none());
    }
}
