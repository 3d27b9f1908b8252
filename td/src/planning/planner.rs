//! LLM-driven task decomposition (§4.10), grounded on the orchestrator's
//! plan-and-execute manager: build a planning prompt naming the available
//! agents, ask the model for a JSON task list, and fall back to a single
//! catch-all task if the response doesn't parse.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::PlannerConfig;
use crate::domain::{ExecutionTask, Plan, PlanStatus, TaskPriority, TaskStatus};
use crate::llm::{CompletionRequest, LlmClient, Message};

/// One entry in the static agent roster handed to the planning prompt.
#[derive(Debug, Clone, Copy)]
pub struct AgentCapability {
    pub name: &'static str,
    pub description: &'static str,
}

/// Agents the Planner can assign tasks to. Mirrors the fixed roster the
/// original orchestrator hands to its planning prompt; a real deployment
/// would source this from the Agent RPC Client's configured endpoints, but
/// the prompt only needs names and one-line descriptions.
pub const AVAILABLE_AGENTS: &[AgentCapability] = &[
    AgentCapability {
        name: "salesforce",
        description: "Handles Salesforce CRM operations: accounts, contacts, opportunities, leads, cases.",
    },
    AgentCapability {
        name: "jira",
        description: "Handles Jira issue tracking: bugs, stories, tasks, epics, sprints.",
    },
    AgentCapability {
        name: "servicenow",
        description: "Handles ServiceNow ITSM: incidents, changes, problems, requests.",
    },
    AgentCapability {
        name: "web_search",
        description: "Searches the web for current information and answers.",
    },
];

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    reasoning: String,
    tasks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    content: String,
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    depends_on: Vec<DependencyRef>,
}

/// A dependency can name a prior task either by its position in this same
/// response or by an already-generated id (used when replanning).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DependencyRef {
    Index(usize),
    Id(String),
}

fn parse_priority(raw: Option<&str>) -> TaskPriority {
    match raw.map(str::to_lowercase).as_deref() {
        Some("urgent") => TaskPriority::Urgent,
        Some("high") => TaskPriority::High,
        Some("low") => TaskPriority::Low,
        _ => TaskPriority::Medium,
    }
}

fn agents_roster() -> String {
    AVAILABLE_AGENTS.iter().map(|a| format!("- {}: {}", a.name, a.description)).collect::<Vec<_>>().join("\n")
}

fn planning_prompt(instruction: &str, context: &HashMap<String, Value>, max_tasks: u32) -> String {
    let memory_context = context
        .get("memory")
        .map(|m| format!("\n\nRelevant context from memory:\n{m}"))
        .unwrap_or_default();

    format!(
        "You are an expert task planner for a multi-agent system. Break down the user's \
         instruction into specific, actionable tasks that can be executed by specialized agents.\n\n\
         Available agents:\n{agents}\n\n\
         User instruction: {instruction}{memory_context}\n\n\
         Each task should be specific, name the agent that handles it, and list dependencies on \
         other tasks by position (0-based index into this response's task list).\n\n\
         Return only a JSON object of this shape, no other text:\n\
         {{\"reasoning\": \"...\", \"tasks\": [{{\"content\": \"...\", \"agent\": \"agent_name\", \
         \"priority\": \"low|medium|high|urgent\", \"depends_on\": [0]}}]}}\n\n\
         Maximum {max_tasks} tasks. Start with information-gathering tasks before action tasks.",
        agents = agents_roster()
    )
}

fn replanning_prompt(plan: &Plan, completed: &[ExecutionTask], pending: &[ExecutionTask], modification: &str) -> String {
    let completed_summary = completed.iter().map(|t| format!("- {} (done)", t.description)).collect::<Vec<_>>().join("\n");
    let pending_summary = pending
        .iter()
        .map(|t| format!("- {} (priority: {})", t.description, t.priority))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are updating an existing execution plan based on user feedback.\n\n\
         Original instruction: {instruction}\n\
         Requested modification: {modification}\n\n\
         COMPLETED TASKS (do not modify or remove these):\n{completed_summary}\n\n\
         PENDING TASKS (replace these with your updated set):\n{pending_summary}\n\n\
         Return only a JSON object describing the new PENDING task list (completed tasks are kept \
         automatically), same shape as before:\n\
         {{\"reasoning\": \"...\", \"tasks\": [{{\"content\": \"...\", \"agent\": \"agent_name\", \
         \"priority\": \"low|medium|high|urgent\", \"depends_on\": [0]}}]}}",
        instruction = plan.instruction,
    )
}

fn parse_tasks(plan_id: &str, content: &str) -> Option<Vec<ExecutionTask>> {
    let raw: RawPlan = serde_json::from_str(content.trim()).ok()?;
    debug!(reasoning = %raw.reasoning, task_count = raw.tasks.len(), "Planner: parsed LLM plan response");

    let mut tasks = Vec::with_capacity(raw.tasks.len());
    let mut ids_by_index = Vec::with_capacity(raw.tasks.len());

    for raw_task in &raw.tasks {
        let task = ExecutionTask::new(plan_id, raw_task.content.clone(), parse_priority(raw_task.priority.as_deref()));
        ids_by_index.push(task.id.clone());
        tasks.push(task);
    }

    for (task, raw_task) in tasks.iter_mut().zip(raw.tasks.iter()) {
        let mut depends_on = Vec::new();
        for dep in &raw_task.depends_on {
            match dep {
                DependencyRef::Index(i) => {
                    if let Some(id) = ids_by_index.get(*i) {
                        depends_on.push(id.clone());
                    }
                }
                DependencyRef::Id(id) => {
                    if ids_by_index.contains(id) {
                        depends_on.push(id.clone());
                    }
                }
            }
        }
        task.depends_on = depends_on;
        if let Some(agent) = &raw_task.agent {
            task.input = Value::Object(serde_json::Map::from_iter([("agent".to_string(), Value::String(agent.clone()))]));
        }
    }

    Some(tasks)
}

fn fallback_task(plan_id: &str, instruction: &str) -> Vec<ExecutionTask> {
    vec![ExecutionTask::new(
        plan_id,
        format!("Handle the following request: {instruction}"),
        TaskPriority::Medium,
    )]
}

/// Decomposes instructions into task DAGs and re-plans around user feedback.
/// Unlike the Engine/Manager, the Planner has no ordering requirement over
/// concurrent callers (each `create_plan`/`replan` call is independent), so
/// it is a plain struct rather than an actor.
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, config: PlannerConfig) -> Self {
        Self { llm, config }
    }

    /// Build a new plan from an instruction. On LLM-JSON-parse failure,
    /// returns a single catch-all task rather than failing the call (§4.10:
    /// "on failure a single-task fallback plan is emitted").
    pub async fn create_plan(&self, instruction: &str, context: &HashMap<String, Value>) -> (Plan, Vec<ExecutionTask>) {
        let plan = Plan::new(instruction);
        let prompt = planning_prompt(instruction, context, self.config.max_tasks_per_plan);

        let request = CompletionRequest {
            system_prompt: prompt,
            messages: vec![Message::user(format!("Create execution plan for: {instruction}"))],
            tools: vec![],
            max_tokens: self.config.max_tokens,
        };

        let tasks = match self.llm.complete(request).await {
            Ok(response) => match response.content {
                Some(content) => parse_tasks(&plan.id, &content).unwrap_or_else(|| {
                    warn!(plan_id = %plan.id, "Planner::create_plan: LLM response was not valid JSON, using fallback task");
                    fallback_task(&plan.id, instruction)
                }),
                None => fallback_task(&plan.id, instruction),
            },
            Err(e) => {
                warn!(plan_id = %plan.id, error = %e, "Planner::create_plan: LLM call failed, using fallback task");
                fallback_task(&plan.id, instruction)
            }
        };

        debug!(plan_id = %plan.id, task_count = tasks.len(), "Planner::create_plan: done");
        (plan, tasks)
    }

    /// Re-plan around a modification instruction, preserving already
    /// `Completed`/`Cancelled` tasks unchanged and replacing only the
    /// pending set (§4.10).
    pub async fn replan(&self, plan: &mut Plan, existing_tasks: Vec<ExecutionTask>, modification: &str) -> Vec<ExecutionTask> {
        let (completed, pending): (Vec<_>, Vec<_>) = existing_tasks.into_iter().partition(|t| t.is_terminal());
        let prompt = replanning_prompt(plan, &completed, &pending, modification);

        let request = CompletionRequest {
            system_prompt: prompt,
            messages: vec![Message::user(format!("Update the plan based on: {modification}"))],
            tools: vec![],
            max_tokens: self.config.max_tokens,
        };

        let new_pending = match self.llm.complete(request).await {
            Ok(response) => match response.content {
                Some(content) => parse_tasks(&plan.id, &content).unwrap_or_else(|| {
                    warn!(plan_id = %plan.id, "Planner::replan: LLM response was not valid JSON, keeping existing pending tasks");
                    pending.clone()
                }),
                None => pending.clone(),
            },
            Err(e) => {
                warn!(plan_id = %plan.id, error = %e, "Planner::replan: LLM call failed, keeping existing pending tasks");
                pending.clone()
            }
        };

        plan.mark_replanned();

        let mut tasks = completed;
        tasks.extend(new_pending);
        tasks
    }

    /// Highest-priority pending task whose dependencies are all completed.
    pub fn ready_task<'a>(&self, tasks: &'a [ExecutionTask]) -> Option<&'a ExecutionTask> {
        let completed: HashSet<String> = tasks.iter().filter(|t| t.status == TaskStatus::Completed).map(|t| t.id.clone()).collect();

        tasks.iter().filter(|t| t.is_ready(&completed)).max_by_key(|t| t.priority)
    }

    /// A plan is terminal once every task is `Completed` or `Cancelled`
    /// (§4.10).
    pub fn is_terminal(tasks: &[ExecutionTask]) -> bool {
        tasks.iter().all(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Cancelled))
    }

    /// Resolve a plan's status from its tasks: `Completed` once terminal and
    /// no task failed, `Active` otherwise. Cancellation is driven externally
    /// (an operator cancelling the plan), not inferred here.
    pub fn resolve_status(tasks: &[ExecutionTask]) -> PlanStatus {
        if Self::is_terminal(tasks) {
            PlanStatus::Completed
        } else {
            PlanStatus::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::mock::MockLlmClient;
    use crate::llm::{CompletionResponse, StopReason, TokenUsage};

    fn mock_response(content: &str) -> CompletionResponse {
        CompletionResponse {
            content: Some(content.to_string()),
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }
    }

    #[tokio::test]
    async fn create_plan_parses_tasks_and_resolves_index_dependencies() {
        let json = r#"{"reasoning":"r","tasks":[
            {"content":"find account","agent":"salesforce","priority":"high","depends_on":[]},
            {"content":"create case","agent":"salesforce","priority":"medium","depends_on":[0]}
        ]}"#;
        let llm = Arc::new(MockLlmClient::new(vec![mock_response(json)]));
        let planner = Planner::new(llm, PlannerConfig::default());

        let (plan, tasks) = planner.create_plan("onboard Acme", &HashMap::new()).await;
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].depends_on, vec![tasks[0].id.clone()]);
        assert_eq!(plan.instruction, "onboard Acme");
    }

    #[tokio::test]
    async fn create_plan_falls_back_on_invalid_json() {
        let llm = Arc::new(MockLlmClient::new(vec![mock_response("not json at all")]));
        let planner = Planner::new(llm, PlannerConfig::default());

        let (_plan, tasks) = planner.create_plan("do something complicated", &HashMap::new()).await;
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].description.contains("do something complicated"));
    }

    #[test]
    fn ready_task_picks_highest_priority_with_satisfied_deps() {
        let llm = Arc::new(MockLlmClient::new(vec![]));
        let planner = Planner::new(llm, PlannerConfig::default());

        let a = ExecutionTask::new("p1", "a", TaskPriority::Low);
        let mut b = ExecutionTask::new("p1", "b", TaskPriority::Urgent).with_depends_on(vec![a.id.clone()]);
        b.status = TaskStatus::Pending;
        let tasks = vec![a, b.clone()];

        let ready = planner.ready_task(&tasks).unwrap();
        assert_eq!(ready.description, "a");

        let mut completed_a = tasks[0].clone();
        completed_a.mark_completed(Value::Null);
        let tasks2 = vec![completed_a, b];
        let ready2 = planner.ready_task(&tasks2).unwrap();
        assert_eq!(ready2.description, "b");
    }

    #[test]
    fn is_terminal_requires_all_tasks_done() {
        let mut a = ExecutionTask::new("p1", "a", TaskPriority::Medium);
        let b = ExecutionTask::new("p1", "b", TaskPriority::Medium);
        assert!(!Planner::is_terminal(&[a.clone(), b.clone()]));
        a.mark_completed(Value::Null);
        assert!(!Planner::is_terminal(&[a.clone(), b.clone()]));
        let mut b2 = b;
        b2.mark_failed("x");
        b2.status = TaskStatus::Cancelled;
        assert!(Planner::is_terminal(&[a, b2]));
    }
}
