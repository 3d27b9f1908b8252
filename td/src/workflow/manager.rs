//! Workflow Manager (§4.9): owns the compiled template catalog, routes
//! incoming instructions to a template, and tracks interrupted instances by
//! external thread id so a later dispatch resumes instead of restarting.
//!
//! Implemented as an actor exactly like `cs::MemoryManager` — a
//! `tokio::sync::mpsc` command channel plus a per-call `oneshot` reply,
//! giving single-writer ordering over the in-memory instance table without a
//! `Mutex` at the API boundary (§5).

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::domain::{END, InstanceStatus, WorkflowDefinition, WorkflowInstance};
use crate::llm::{CompletionRequest, LlmClient, Message};

use super::compiler::CompiledWorkflow;
use super::engine::WorkflowEngine;
use super::error::WorkflowError;

/// Result of matching an instruction against the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingOutcome {
    Matched(String),
    NoMatch,
}

enum Command {
    Execute {
        name: Option<String>,
        instruction: String,
        context: HashMap<String, Value>,
        thread_id: String,
        reply: oneshot::Sender<Result<WorkflowInstance, WorkflowError>>,
    },
    Resume {
        name: String,
        human_input: Value,
        thread_id: String,
        reply: oneshot::Sender<Result<WorkflowInstance, WorkflowError>>,
    },
    ListTemplates {
        reply: oneshot::Sender<Vec<String>>,
    },
    Shutdown,
}

/// Handle to the Workflow Manager actor. Cheap to clone.
#[derive(Clone)]
pub struct WorkflowManager {
    tx: mpsc::Sender<Command>,
}

impl WorkflowManager {
    /// Compile every template (failures logged, not fatal — §4.9), build the
    /// routing table, and spawn the actor.
    pub fn spawn(templates: Vec<WorkflowDefinition>, engine: WorkflowEngine, store: taskstore::Store, llm: Option<Arc<dyn LlmClient>>) -> Self {
        let mut catalog = HashMap::new();
        for def in templates {
            let id = def.id.clone();
            match CompiledWorkflow::compile(def) {
                Ok(compiled) => {
                    catalog.insert(id, compiled);
                }
                Err(e) => warn!(template_id = %id, error = %e, "WorkflowManager::spawn: template failed to compile, skipping"),
            }
        }
        let routing = build_routing_table(&catalog);

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(catalog, routing, engine, store, llm, rx));
        debug!("WorkflowManager::spawn: actor started");
        Self { tx }
    }

    pub async fn execute_workflow(
        &self,
        name: Option<&str>,
        instruction: &str,
        context: HashMap<String, Value>,
        thread_id: &str,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Execute {
                name: name.map(str::to_string),
                instruction: instruction.to_string(),
                context,
                thread_id: thread_id.to_string(),
                reply,
            })
            .await
            .map_err(channel_closed)?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn resume_workflow(&self, name: &str, human_input: Value, thread_id: &str) -> Result<WorkflowInstance, WorkflowError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Resume {
                name: name.to_string(),
                human_input,
                thread_id: thread_id.to_string(),
                reply,
            })
            .await
            .map_err(channel_closed)?;
        rx.await.map_err(channel_closed)?
    }

    pub async fn list_templates(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::ListTemplates { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

fn channel_closed<T>(_: T) -> WorkflowError {
    WorkflowError::PersistedStoreUnavailable("WorkflowManager actor channel closed".to_string())
}

/// Build the deterministic regex routing table, sorted by descending
/// trigger priority (ties broken by catalog iteration order). A template
/// whose trigger pattern fails to compile is logged and excluded, matching
/// the "compile every template at startup, failures logged" policy (§4.9).
fn build_routing_table(catalog: &HashMap<String, CompiledWorkflow>) -> Vec<(Regex, String, i32)> {
    let mut table = Vec::new();
    for (id, compiled) in catalog {
        let trigger = &compiled.definition.trigger;
        match Regex::new(&trigger.pattern) {
            Ok(re) => table.push((re, id.clone(), trigger.priority)),
            Err(e) => warn!(template_id = %id, pattern = %trigger.pattern, error = %e, "WorkflowManager: trigger pattern failed to compile, excluding from routing table"),
        }
    }
    table.sort_by(|a, b| b.2.cmp(&a.2));
    table
}

fn route_by_regex(table: &[(Regex, String, i32)], instruction: &str) -> RoutingOutcome {
    match table.iter().find(|(re, _, _)| re.is_match(instruction)) {
        Some((_, id, _)) => RoutingOutcome::Matched(id.clone()),
        None => RoutingOutcome::NoMatch,
    }
}

async fn route_by_llm(llm: &Arc<dyn LlmClient>, instruction: &str, known_ids: &[String]) -> RoutingOutcome {
    let system_prompt = format!(
        "You route customer service instructions to a workflow template. Known templates: {}. \
         Respond with exactly one template id, or the word \"none\" if none apply. No other text.",
        known_ids.join(", ")
    );
    let request = CompletionRequest {
        system_prompt,
        messages: vec![Message::user(instruction.to_string())],
        tools: vec![],
        max_tokens: 32,
    };
    match llm.complete(request).await {
        Ok(response) => match response.content {
            Some(text) => {
                let picked = text.trim();
                if picked.eq_ignore_ascii_case("none") || !known_ids.iter().any(|id| id == picked) {
                    RoutingOutcome::NoMatch
                } else {
                    RoutingOutcome::Matched(picked.to_string())
                }
            }
            None => RoutingOutcome::NoMatch,
        },
        Err(e) => {
            warn!(error = %e, "WorkflowManager: LLM routing fallback failed");
            RoutingOutcome::NoMatch
        }
    }
}

/// Message carried by the synthetic `completed` instance returned when no
/// template matches an instruction (§8 scenario 1 — a dead end in routing is
/// not an error, it is a completed no-op run).
const NO_MATCH_MESSAGE: &str = "No matching workflow found for this instruction";

/// What an instruction resolved to: a template to run, or a fall-through
/// that still needs to be reported to the caller as a completed instance.
enum Resolution<'a> {
    Template(&'a CompiledWorkflow),
    NoMatch,
}

/// Build the synthetic `completed` instance for a routing fall-through,
/// carrying the no-match message as a variable the caller can read back
/// (examples/original_source/src/agents/workflow/main.py's
/// `{"status":"completed", artifacts:[{content:"No matching workflow..."}]}`).
fn no_match_instance(instruction: &str, thread_id: &str) -> WorkflowInstance {
    let mut instance = WorkflowInstance::new("none", END, thread_id);
    instance.set_variable("message", json!(NO_MATCH_MESSAGE));
    instance.set_variable("instruction", json!(instruction));
    instance.set_status(InstanceStatus::Completed);
    instance
}

async fn resolve_template<'a>(
    catalog: &'a HashMap<String, CompiledWorkflow>,
    routing: &[(Regex, String, i32)],
    llm: &Option<Arc<dyn LlmClient>>,
    name: Option<&str>,
    instruction: &str,
) -> Result<Resolution<'a>, WorkflowError> {
    if let Some(name) = name {
        return catalog
            .get(name)
            .map(Resolution::Template)
            .ok_or_else(|| WorkflowError::ResourceNotFound(format!("no template named '{name}'")));
    }

    let outcome = match route_by_regex(routing, instruction) {
        RoutingOutcome::Matched(id) => RoutingOutcome::Matched(id),
        RoutingOutcome::NoMatch => match llm {
            Some(llm) => route_by_llm(llm, instruction, &catalog.keys().cloned().collect::<Vec<_>>()).await,
            None => RoutingOutcome::NoMatch,
        },
    };

    match outcome {
        RoutingOutcome::Matched(id) => catalog
            .get(&id)
            .map(Resolution::Template)
            .ok_or_else(|| WorkflowError::ResourceNotFound(format!("routed to unknown template '{id}'"))),
        RoutingOutcome::NoMatch => Ok(Resolution::NoMatch),
    }
}

fn checkpoint(store: &taskstore::Store, instance: &WorkflowInstance) {
    if let Err(e) = store.upsert(instance.clone()) {
        warn!(instance_id = %instance.id, error = %e, "WorkflowManager: failed to checkpoint instance");
    }
}

async fn actor_loop(
    catalog: HashMap<String, CompiledWorkflow>,
    routing: Vec<(Regex, String, i32)>,
    engine: WorkflowEngine,
    store: taskstore::Store,
    llm: Option<Arc<dyn LlmClient>>,
    mut rx: mpsc::Receiver<Command>,
) {
    debug!(templates = catalog.len(), "WorkflowManager actor_loop: started");
    let mut instances: HashMap<String, WorkflowInstance> = HashMap::new();
    let mut interrupts: HashMap<String, String> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Execute {
                name,
                instruction,
                context,
                thread_id,
                reply,
            } => {
                if let Some(instance_id) = interrupts.get(&thread_id) {
                    if let Some(existing) = instances.get(instance_id) {
                        debug!(%thread_id, "WorkflowManager: dispatch for thread with a pending interrupt, returning existing instance");
                        let _ = reply.send(Ok(existing.clone()));
                        continue;
                    }
                }

                let outcome = match resolve_template(&catalog, &routing, &llm, name.as_deref(), &instruction).await {
                    Ok(Resolution::Template(compiled)) => {
                        let mut instance = compiled.new_instance(context, thread_id.clone());
                        engine.run_until_blocked(compiled, &mut instance).await;
                        checkpoint(&store, &instance);
                        if instance.status.is_suspended() {
                            interrupts.insert(thread_id.clone(), instance.id.clone());
                        }
                        instances.insert(instance.id.clone(), instance.clone());
                        Ok(instance)
                    }
                    Ok(Resolution::NoMatch) => {
                        let instance = no_match_instance(&instruction, &thread_id);
                        checkpoint(&store, &instance);
                        instances.insert(instance.id.clone(), instance.clone());
                        Ok(instance)
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(outcome);
            }

            Command::Resume {
                name,
                human_input,
                thread_id,
                reply,
            } => {
                let outcome = resume_one(&catalog, &engine, &store, &mut instances, &mut interrupts, &name, human_input, &thread_id).await;
                let _ = reply.send(outcome);
            }

            Command::ListTemplates { reply } => {
                let _ = reply.send(catalog.keys().cloned().collect());
            }

            Command::Shutdown => {
                debug!("WorkflowManager actor_loop: shutdown");
                break;
            }
        }
    }
    debug!("WorkflowManager actor_loop: stopped");
}

async fn resume_one(
    catalog: &HashMap<String, CompiledWorkflow>,
    engine: &WorkflowEngine,
    store: &taskstore::Store,
    instances: &mut HashMap<String, WorkflowInstance>,
    interrupts: &mut HashMap<String, String>,
    name: &str,
    human_input: Value,
    thread_id: &str,
) -> Result<WorkflowInstance, WorkflowError> {
    let instance_id = interrupts
        .get(thread_id)
        .cloned()
        .ok_or_else(|| WorkflowError::ResourceNotFound(format!("no pending interrupt for thread '{thread_id}'")))?;
    let mut instance = instances
        .remove(&instance_id)
        .ok_or_else(|| WorkflowError::ResourceNotFound(format!("instance '{instance_id}' not tracked")))?;

    if instance.definition_id != name {
        warn!(expected = %instance.definition_id, got = %name, "WorkflowManager::resume_one: resume name does not match tracked instance's template");
    }

    let compiled = catalog
        .get(&instance.definition_id)
        .ok_or_else(|| WorkflowError::ResourceNotFound(format!("template '{}' not in catalog", instance.definition_id)))?;

    let result = match instance.status {
        InstanceStatus::WaitingForHuman => engine.resume_human(compiled, &mut instance, human_input).await,
        InstanceStatus::Waiting => match human_input.as_str() {
            Some(event_name) => engine.resume_event(compiled, &mut instance, event_name).await,
            None => Err(WorkflowError::SchemaValidationFailure(
                "resuming an event wait requires a string event name".to_string(),
            )),
        },
        other => Err(WorkflowError::ResourceNotFound(format!("instance is not suspended (status={other})"))),
    };

    checkpoint(store, &instance);
    if instance.status.is_suspended() {
        interrupts.insert(thread_id.to_string(), instance.id.clone());
    } else {
        interrupts.remove(thread_id);
    }
    instances.insert(instance.id.clone(), instance.clone());

    result.map(|()| instance)
}
