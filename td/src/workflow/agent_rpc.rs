//! Agent RPC Client (§4.8): dispatches a single unit of work to a named
//! remote agent endpoint over the JSON envelope in §6.
//!
//! Mirrors the `LlmClient`/`MockLlmClient` shape exactly: a trait plus an
//! HTTP implementation plus a `mock` implementation for tests. No retry
//! lives here — retry is the Engine's concern (§4.7).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::error::WorkflowError;
use super::wire::{TaskContext, TaskRequest, TaskResponse, TaskStatus};

fn epoch_ms() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or(0)
}

/// Builds a task envelope id. Preferred form names the workflow and step
/// directly (`workflow-<wf>-<step>`); the `wf_<agent>_<epoch>` fallback
/// covers dispatches with no workflow/step context (e.g. ad hoc Planner
/// tasks) per §4.8.
pub fn task_id(workflow_id: Option<&str>, step_id: Option<&str>, agent: &str) -> String {
    match (workflow_id, step_id) {
        (Some(wf), Some(step)) => format!("workflow-{wf}-{step}"),
        _ => format!("wf_{agent}_{}", epoch_ms()),
    }
}

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Dispatch `request` to `agent` and return its first artifact's content,
    /// or the raw response body if no artifact is present.
    async fn dispatch(&self, agent: &str, request: TaskRequest) -> Result<Value, WorkflowError>;
}

/// Maps agent names to base URLs; overridable by environment (§6) at the
/// call site that constructs this map, not by this type.
pub type AgentEndpoints = HashMap<String, String>;

pub struct HttpAgentClient {
    http: reqwest::Client,
    endpoints: AgentEndpoints,
}

impl HttpAgentClient {
    pub fn new(endpoints: AgentEndpoints) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoints,
        }
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn dispatch(&self, agent: &str, request: TaskRequest) -> Result<Value, WorkflowError> {
        debug!(%agent, task_id = %request.id, "HttpAgentClient::dispatch: called");
        let base = self
            .endpoints
            .get(agent)
            .ok_or_else(|| WorkflowError::ResourceNotFound(format!("no endpoint configured for agent '{agent}'")))?;

        let resp = self
            .http
            .post(base)
            .json(&request)
            .send()
            .await
            .map_err(|e| WorkflowError::TransientAgentFailure(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(WorkflowError::TransientAgentFailure(format!(
                "agent '{agent}' returned HTTP {}",
                resp.status()
            )));
        }

        let body: TaskResponse = resp
            .json()
            .await
            .map_err(|e| WorkflowError::TransientAgentFailure(e.to_string()))?;

        response_to_value(body, agent)
    }
}

fn response_to_value(body: TaskResponse, agent: &str) -> Result<Value, WorkflowError> {
    match body.status {
        TaskStatus::Failed => Err(WorkflowError::TransientAgentFailure(format!(
            "agent '{agent}' reported status=failed"
        ))),
        TaskStatus::Completed | TaskStatus::Interrupted => Ok(body
            .artifacts
            .into_iter()
            .next()
            .map(|a| a.content)
            .unwrap_or(serde_json::json!({ "status": body.status, "metadata": body.metadata }))),
    }
}

/// Builds a `TaskRequest` envelope (§6) for one step dispatch.
pub fn build_request(
    workflow_id: &str,
    workflow_name: &str,
    step_id: &str,
    step_name: &str,
    instruction: String,
    variables: HashMap<String, Value>,
    state_snapshot: Value,
    agent: &str,
) -> TaskRequest {
    TaskRequest {
        id: task_id(Some(workflow_id), Some(step_id), agent),
        instruction,
        context: TaskContext {
            workflow_id: workflow_id.to_string(),
            workflow_name: workflow_name.to_string(),
            step_id: step_id.to_string(),
            step_name: step_name.to_string(),
            variables,
        },
        state_snapshot,
    }
}

/// Canned-response client for tests, mirroring `llm::client::mock::MockLlmClient`.
pub struct MockAgentClient {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<Value, String>>>,
}

impl MockAgentClient {
    pub fn new(responses: Vec<Result<Value, String>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl AgentClient for MockAgentClient {
    async fn dispatch(&self, agent: &str, _request: TaskRequest) -> Result<Value, WorkflowError> {
        let mut responses = self.responses.lock().unwrap();
        match responses.pop_front() {
            Some(Ok(v)) => Ok(v),
            Some(Err(e)) => Err(WorkflowError::TransientAgentFailure(e)),
            None => Err(WorkflowError::TransientAgentFailure(format!("no more mock responses for '{agent}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_prefers_workflow_step_form() {
        let id = task_id(Some("wf-1"), Some("create_case"), "salesforce");
        assert_eq!(id, "workflow-wf-1-create_case");
    }

    #[test]
    fn task_id_falls_back_without_context() {
        let id = task_id(None, None, "salesforce");
        assert!(id.starts_with("wf_salesforce_"));
    }

    #[tokio::test]
    async fn mock_client_returns_queued_responses_in_order() {
        let client = MockAgentClient::new(vec![Ok(serde_json::json!({"ok": 1})), Err("boom".to_string())]);
        let req = build_request("wf-1", "Onboarding", "s1", "Step 1", "do it".into(), HashMap::new(), Value::Null, "sf");

        let first = client.dispatch("sf", req.clone()).await.unwrap();
        assert_eq!(first, serde_json::json!({"ok": 1}));

        let second = client.dispatch("sf", req).await;
        assert!(second.is_err());
    }

    #[test]
    fn response_to_value_prefers_first_artifact() {
        use super::super::wire::Artifact;
        let body = TaskResponse {
            artifacts: vec![Artifact {
                id: "a1".into(),
                task_id: "t1".into(),
                content: serde_json::json!("found 1 opportunity id=006A"),
                content_type: "text/plain".into(),
            }],
            status: TaskStatus::Completed,
            metadata: None,
        };
        let value = response_to_value(body, "salesforce").unwrap();
        assert_eq!(value, serde_json::json!("found 1 opportunity id=006A"));
    }

    #[test]
    fn response_to_value_failed_status_is_transient_error() {
        let body = TaskResponse {
            artifacts: vec![],
            status: TaskStatus::Failed,
            metadata: None,
        };
        assert!(response_to_value(body, "jira").is_err());
    }
}
