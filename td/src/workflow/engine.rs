//! Workflow Engine (§4.7): step dispatch, variable substitution, retry, and
//! interrupt/resume.
//!
//! Per design note 9, execution is a state machine advanced by a driver loop
//! (`run_until_blocked`) rather than nested awaits: every step dispatch
//! returns a first-class [`StepControl`], and "interrupt" is a status the
//! instance is left in, not an exception unwound through the call stack.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::config::WorkflowConfig;
use crate::domain::{
    ConditionDescriptor, HistoryEntry, InstanceStatus, LegacyOperator, OnComplete, RetryPolicy, Step, StepCommon,
    StepOutcomeKind, TypedOperator, WaitPredicate, WorkflowInstance, END,
};

use super::agent_rpc::{self, AgentClient};
use super::compiler::CompiledWorkflow;
use super::error::WorkflowError;
use super::extractor::Extractor;

/// Substrings that mark a resolved placeholder value as an error cascading
/// from a previous step; replaced by the sentinel below rather than
/// substituted verbatim (§4.7, design note 9 — "load-bearing").
const ERROR_LIKE_MARKERS: [&str; 4] = ["error processing", "recursion limit", "failed to", "error:"];

/// What a step dispatch tells the driver loop to do next. The instance's own
/// `status` field (not this enum) is the source of truth for *why* execution
/// stopped — `Stop` just means "don't advance `current_step_id` again".
enum StepControl {
    Advance(String),
    Stop,
}

fn step_type_name(step: &Step) -> &'static str {
    match step {
        Step::Action { .. } => "action",
        Step::Condition { .. } => "condition",
        Step::Wait { .. } => "wait",
        Step::Parallel { .. } => "parallel",
        Step::Human { .. } => "human",
        Step::Switch { .. } => "switch",
        Step::ForEach { .. } => "for_each",
        Step::Extract { .. } => "extract",
    }
}

/// Drives `WorkflowInstance`s against a `CompiledWorkflow`: dispatches the
/// current step, applies retry, and advances `current_step_id` until the
/// instance reaches a terminal or suspended status.
pub struct WorkflowEngine {
    agent_client: Arc<dyn AgentClient>,
    extractor: Arc<dyn Extractor>,
    config: WorkflowConfig,
}

impl WorkflowEngine {
    pub fn new(agent_client: Arc<dyn AgentClient>, extractor: Arc<dyn Extractor>, config: WorkflowConfig) -> Self {
        Self {
            agent_client,
            extractor,
            config,
        }
    }

    /// Advance `instance` through `compiled` until it is `completed`,
    /// `failed`, `cancelled`, `waiting`, or `waiting_for_human` (§4.7 state
    /// machine). Safe to call again after a `waiting`/`waiting_for_human`
    /// instance has been resumed (`resume_human`/`resume_event`/
    /// `resume_deadline`).
    pub async fn run_until_blocked(&self, compiled: &CompiledWorkflow, instance: &mut WorkflowInstance) {
        loop {
            if instance.is_terminal() || instance.status.is_suspended() {
                return;
            }
            if instance.history.len() as u32 > self.config.max_steps_per_instance {
                warn!(instance_id = %instance.id, "WorkflowEngine::run_until_blocked: exceeded max_steps_per_instance");
                instance.set_status(InstanceStatus::Failed);
                instance.set_variable("failure_reason", json!("exceeded max_steps_per_instance"));
                return;
            }

            let step_id = instance.current_step_id.clone();
            let Some(step) = compiled.step(&step_id).cloned() else {
                warn!(instance_id = %instance.id, %step_id, "WorkflowEngine::run_until_blocked: step routing error");
                instance.set_status(InstanceStatus::Failed);
                instance.set_variable("failure_reason", json!(format!("step routing error: no such step '{step_id}'")));
                return;
            };

            let common = step.common().clone();
            let started_at = taskstore::now_ms();
            let control = self.dispatch_step(&step, compiled, instance).await;
            let duration_ms = (taskstore::now_ms() - started_at).max(0) as u64;
            let step_type = step_type_name(&step).to_string();

            match control {
                Ok(StepControl::Advance(next)) => {
                    instance.push_history(HistoryEntry {
                        step_id: common.id.clone(),
                        step_type,
                        started_at,
                        duration_ms,
                        outcome: StepOutcomeKind::Completed,
                        next: Some(next.clone()),
                    });
                    if next == END {
                        instance.set_status(InstanceStatus::Completed);
                        return;
                    }
                    instance.current_step_id = next;
                }
                Ok(StepControl::Stop) => {
                    let outcome = match instance.status {
                        InstanceStatus::WaitingForHuman | InstanceStatus::Waiting => StepOutcomeKind::Interrupted,
                        InstanceStatus::Failed => StepOutcomeKind::Failed,
                        _ => StepOutcomeKind::Completed,
                    };
                    instance.push_history(HistoryEntry {
                        step_id: common.id.clone(),
                        step_type,
                        started_at,
                        duration_ms,
                        outcome,
                        next: None,
                    });
                    return;
                }
                Err(e) => {
                    warn!(instance_id = %instance.id, step_id = %common.id, error = %e, "WorkflowEngine::run_until_blocked: step failed fatally");
                    instance.set_status(InstanceStatus::Failed);
                    instance.set_variable("failure_reason", json!(format!("step '{}' failed: {}", common.name, e)));
                    instance.push_history(HistoryEntry {
                        step_id: common.id.clone(),
                        step_type,
                        started_at,
                        duration_ms,
                        outcome: StepOutcomeKind::Failed,
                        next: None,
                    });
                    return;
                }
            }
        }
    }

    /// Resume a `waiting_for_human` instance with the supplied value and run
    /// until the next block point.
    pub async fn resume_human(&self, compiled: &CompiledWorkflow, instance: &mut WorkflowInstance, value: Value) -> Result<(), WorkflowError> {
        if instance.resume_with_human_input(value).is_none() {
            return Err(WorkflowError::ResourceNotFound("instance has no pending human interrupt".to_string()));
        }
        if let Some(next) = instance.variables.remove("__human_next__").and_then(|v| v.as_str().map(str::to_string)) {
            instance.current_step_id = next;
        }
        self.run_until_blocked(compiled, instance).await;
        Ok(())
    }

    /// Resume a `waiting` instance suspended on a named event.
    pub async fn resume_event(&self, compiled: &CompiledWorkflow, instance: &mut WorkflowInstance, event_name: &str) -> Result<(), WorkflowError> {
        let waiting_on = instance.get_variable("__wait_event__").and_then(|v| v.as_str()).map(str::to_string);
        if waiting_on.as_deref() != Some(event_name) {
            return Err(WorkflowError::ResourceNotFound(format!(
                "instance is not waiting on event '{event_name}'"
            )));
        }
        instance.variables.remove("__wait_event__");
        instance.set_status(InstanceStatus::Running);
        self.run_until_blocked(compiled, instance).await;
        Ok(())
    }

    /// Resume a `waiting` instance whose deadline has passed, if `now_ms` is
    /// past it.
    pub async fn resume_deadline(&self, compiled: &CompiledWorkflow, instance: &mut WorkflowInstance, now_ms: i64) -> Result<(), WorkflowError> {
        let deadline = instance.get_variable("__wait_deadline_ms__").and_then(|v| v.as_i64());
        match deadline {
            Some(d) if now_ms >= d => {
                instance.variables.remove("__wait_deadline_ms__");
                instance.set_status(InstanceStatus::Running);
                self.run_until_blocked(compiled, instance).await;
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(WorkflowError::ResourceNotFound("instance has no pending deadline wait".to_string())),
        }
    }

    fn dispatch_step<'a>(
        &'a self,
        step: &'a Step,
        compiled: &'a CompiledWorkflow,
        instance: &'a mut WorkflowInstance,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<StepControl, WorkflowError>> + Send + 'a>> {
        Box::pin(async move {
            match step {
                Step::Action {
                    common,
                    agent,
                    instruction_template,
                    on_complete,
                    next_step,
                    retry,
                } => self.handle_action(common, agent, instruction_template, on_complete, next_step, retry, compiled, instance).await,
                Step::Condition {
                    descriptor,
                    true_next,
                    false_next,
                    ..
                } => Ok(StepControl::Advance(if evaluate_condition(descriptor, instance) {
                    true_next.clone()
                } else {
                    false_next.clone()
                })),
                Step::Wait {
                    common,
                    predicate,
                    compile_fields,
                    next_step,
                } => Ok(self.handle_wait(common, predicate, compile_fields, next_step, instance)),
                Step::Parallel { common, substeps, next_step } => {
                    self.handle_parallel(common, substeps, next_step, compiled, instance).await
                }
                Step::Human {
                    common,
                    description_template,
                    context_from,
                    next_step,
                } => Ok(self.handle_human(common, description_template, context_from, next_step, compiled, instance)),
                Step::Switch { cases, default_next, .. } => {
                    for case in cases {
                        if evaluate_condition(&case.when, instance) {
                            return Ok(StepControl::Advance(case.next.clone()));
                        }
                    }
                    Ok(StepControl::Advance(default_next.clone()))
                }
                Step::ForEach {
                    common,
                    collection_var,
                    iterator_var,
                    loop_steps,
                    max_iterations,
                    next_step,
                } => {
                    self.handle_for_each(common, collection_var, iterator_var, loop_steps, *max_iterations, next_step, compiled, instance)
                        .await
                }
                Step::Extract {
                    common,
                    source_var,
                    prompt,
                    schema_name,
                    next_step,
                } => self.handle_extract(common, source_var, prompt, schema_name, next_step, instance).await,
            }
        })
    }

    async fn handle_action(
        &self,
        common: &StepCommon,
        agent: &str,
        instruction_template: &str,
        on_complete: &Option<OnComplete>,
        next_step: &Option<String>,
        retry: &RetryPolicy,
        compiled: &CompiledWorkflow,
        instance: &mut WorkflowInstance,
    ) -> Result<StepControl, WorkflowError> {
        let instruction = substitute(instruction_template, instance);
        let mut last_err = None;

        for attempt in 1..=retry.max_attempts.max(1) {
            let request = agent_rpc::build_request(
                &compiled.definition.id,
                &compiled.definition.name,
                &common.id,
                &common.name,
                instruction.clone(),
                instance.variables.clone(),
                Value::Null,
                agent,
            );
            debug!(step_id = %common.id, %attempt, "WorkflowEngine::handle_action: dispatching");
            match self.dispatch_with_timeout(common, agent, request).await {
                Ok(result) => {
                    instance.set_variable(format!("{}_result", common.id), result.clone());
                    instance.set_variable("last_action_result", result);
                    return Ok(match on_complete {
                        Some(OnComplete { condition, true_next, false_next }) => {
                            StepControl::Advance(if evaluate_condition(condition, instance) {
                                true_next.clone()
                            } else {
                                false_next.clone()
                            })
                        }
                        None => StepControl::Advance(next_step.clone().unwrap_or_else(|| END.to_string())),
                    });
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt < retry.max_attempts.max(1) {
                        tokio::time::sleep(Duration::from_millis(retry.backoff_ms * attempt as u64)).await;
                    }
                }
            }
        }

        let err = last_err.expect("loop runs at least once");
        if common.critical {
            Err(err)
        } else {
            instance.set_variable(format!("{}_error", common.id), json!(err.to_string()));
            Ok(StepControl::Advance(next_step.clone().unwrap_or_else(|| END.to_string())))
        }
    }

    /// Dispatch through `common.timeout_ms` when set, turning an elapsed
    /// deadline into a retryable [`WorkflowError::Timeout`] rather than
    /// letting the call run unbounded (§5 "cancellable by caller-supplied
    /// timeouts").
    async fn dispatch_with_timeout(&self, common: &StepCommon, agent: &str, request: Value) -> Result<Value, WorkflowError> {
        match common.timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), self.agent_client.dispatch(agent, request))
                .await
                .unwrap_or(Err(WorkflowError::Timeout(Duration::from_millis(ms)))),
            None => self.agent_client.dispatch(agent, request).await,
        }
    }

    fn handle_wait(
        &self,
        _common: &StepCommon,
        predicate: &WaitPredicate,
        compile_fields: &[String],
        next_step: &Option<String>,
        instance: &mut WorkflowInstance,
    ) -> StepControl {
        if predicate.is_compile_event() {
            let mut compiled_results = Map::new();
            let mut summary_lines = Vec::new();
            for field in compile_fields {
                if let Some(value) = instance.get_variable(field).cloned() {
                    summary_lines.push(format!("{field}: {}", stringify_value(&value)));
                    compiled_results.insert(field.clone(), value);
                }
            }
            instance.set_variable("compiled_results", Value::Object(compiled_results));
            instance.set_variable("summary", json!(summary_lines.join("\n")));
            return StepControl::Advance(next_step.clone().unwrap_or_else(|| END.to_string()));
        }

        match predicate {
            WaitPredicate::Event { name } => {
                instance.set_variable("__wait_event__", json!(name));
                instance.set_status(InstanceStatus::Waiting);
            }
            WaitPredicate::Deadline { deadline_ms } => {
                instance.set_variable("__wait_deadline_ms__", json!(deadline_ms));
                instance.set_status(InstanceStatus::Waiting);
            }
        }
        StepControl::Stop
    }

    async fn handle_parallel(
        &self,
        common: &StepCommon,
        substeps: &[String],
        next_step: &Option<String>,
        compiled: &CompiledWorkflow,
        instance: &mut WorkflowInstance,
    ) -> Result<StepControl, WorkflowError> {
        let snapshot = instance.variables.clone();
        let mut tasks = Vec::new();
        for sub_id in substeps {
            let sub_id = sub_id.clone();
            let Some(Step::Action {
                agent,
                instruction_template,
                retry,
                ..
            }) = compiled.step(&sub_id).cloned()
            else {
                tasks.push(Box::pin(async move { (sub_id, Err("substep is not an action step".to_string())) })
                    as std::pin::Pin<Box<dyn std::future::Future<Output = (String, Result<Value, String>)> + Send>>);
                continue;
            };

            let agent_client = Arc::clone(&self.agent_client);
            let wf_id = compiled.definition.id.clone();
            let wf_name = compiled.definition.name.clone();
            let snapshot = snapshot.clone();
            let instruction = substitute_against(&instruction_template, &snapshot);

            tasks.push(Box::pin(async move {
                let mut last_err = String::new();
                for attempt in 1..=retry.max_attempts.max(1) {
                    let request = agent_rpc::build_request(&wf_id, &wf_name, &sub_id, &sub_id, instruction.clone(), snapshot.clone(), Value::Null, &agent);
                    match agent_client.dispatch(&agent, request).await {
                        Ok(v) => return (sub_id, Ok(v)),
                        Err(e) => {
                            last_err = e.to_string();
                            if attempt < retry.max_attempts.max(1) {
                                tokio::time::sleep(Duration::from_millis(retry.backoff_ms * attempt as u64)).await;
                            }
                        }
                    }
                }
                (sub_id, Err(last_err))
            }));
        }

        let results = futures::future::join_all(tasks).await;
        let mut map = Map::new();
        for (sub_id, result) in results {
            match result {
                Ok(value) => {
                    instance.set_variable(format!("{sub_id}_result"), value.clone());
                    map.insert(sub_id, value);
                }
                Err(err) => {
                    instance.set_variable(format!("{sub_id}_error"), json!(err));
                    map.insert(sub_id, json!({ "error": err }));
                }
            }
        }
        instance.set_variable(format!("{}_parallel_results", common.id), Value::Object(map));
        Ok(StepControl::Advance(next_step.clone().unwrap_or_else(|| END.to_string())))
    }

    fn handle_human(
        &self,
        common: &StepCommon,
        description_template: &str,
        context_from: &[String],
        next_step: &Option<String>,
        compiled: &CompiledWorkflow,
        instance: &mut WorkflowInstance,
    ) -> StepControl {
        let description = substitute(description_template, instance);

        let mut context = Map::new();
        context.insert("recent_results".to_string(), recent_results(instance));
        context.insert("history_tail".to_string(), history_tail(instance, 10));
        for key in context_from {
            if let Some(value) = instance.get_variable(key).cloned() {
                context.insert(key.clone(), value);
            }
        }

        let payload = crate::domain::InterruptPayload {
            step_id: common.id.clone(),
            step_name: common.name.clone(),
            description,
            workflow_id: compiled.definition.id.clone(),
            context: Value::Object(context),
            metadata: common.metadata.clone(),
        };
        instance.set_variable("__human_next__", json!(next_step.clone().unwrap_or_else(|| END.to_string())));
        instance.suspend_for_human(payload);
        StepControl::Stop
    }

    async fn handle_for_each(
        &self,
        common: &StepCommon,
        collection_var: &str,
        iterator_var: &str,
        loop_steps: &[String],
        max_iterations: u32,
        next_step: &Option<String>,
        compiled: &CompiledWorkflow,
        instance: &mut WorkflowInstance,
    ) -> Result<StepControl, WorkflowError> {
        let items = instance
            .get_variable(collection_var)
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();

        let mut results = Vec::new();
        for (index, item) in items.into_iter().enumerate().take(max_iterations as usize) {
            instance.set_variable(iterator_var.to_string(), item);
            instance.set_variable(format!("{iterator_var}_index"), json!(index));

            let mut last_step_id = String::new();
            for step_id in loop_steps {
                let Some(inner_step) = compiled.step(step_id).cloned() else {
                    continue;
                };
                last_step_id = step_id.clone();
                if let StepControl::Stop = self.dispatch_step(&inner_step, compiled, instance).await? {
                    // A nested suspension mid-loop is not resumable from here;
                    // surface it to the driver loop directly.
                    return Ok(StepControl::Stop);
                }
            }

            let item_result = instance.get_variable(&format!("{last_step_id}_result")).cloned().unwrap_or(Value::Null);
            results.push(item_result);
        }

        instance.variables.remove(iterator_var);
        instance.variables.remove(&format!("{iterator_var}_index"));
        instance.set_variable(format!("{}_results", common.id), Value::Array(results));
        Ok(StepControl::Advance(next_step.clone().unwrap_or_else(|| END.to_string())))
    }

    async fn handle_extract(
        &self,
        common: &StepCommon,
        source_var: &str,
        prompt: &str,
        schema_name: &Option<String>,
        next_step: &Option<String>,
        instance: &mut WorkflowInstance,
    ) -> Result<StepControl, WorkflowError> {
        let source = instance.get_variable(source_var).cloned().unwrap_or(Value::Null);
        let extraction = self.extractor.extract(&source, prompt, schema_name.as_deref());
        let result = match common.timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), extraction)
                .await
                .unwrap_or(Err(WorkflowError::Timeout(Duration::from_millis(ms))))?,
            None => extraction.await?,
        };
        instance.set_variable(format!("{}_result", common.id), result);
        Ok(StepControl::Advance(next_step.clone().unwrap_or_else(|| END.to_string())))
    }
}

fn recent_results(instance: &WorkflowInstance) -> Value {
    let mut map = Map::new();
    for (key, value) in &instance.variables {
        if key.ends_with("_result") {
            map.insert(key.clone(), value.clone());
        }
    }
    Value::Object(map)
}

fn history_tail(instance: &WorkflowInstance, n: usize) -> Value {
    let tail = instance.history.iter().rev().take(n).rev();
    json!(
        tail.map(|h| json!({
            "step_id": h.step_id,
            "step_type": h.step_type,
            "outcome": h.outcome,
        }))
        .collect::<Vec<_>>()
    )
}

fn stringify_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Condition evaluation (§4.7): on a malformed descriptor this defaults to
/// `false` and logs, per §7 `condition_evaluation_error` — it never
/// propagates as an error to the caller.
pub fn evaluate_condition(descriptor: &ConditionDescriptor, instance: &WorkflowInstance) -> bool {
    match descriptor {
        ConditionDescriptor::Legacy { operator, left, right } => {
            let lv = resolve_operand(left, instance);
            let rv = right.as_deref().map(|r| resolve_operand(r, instance));
            eval_legacy(*operator, &lv, rv.as_ref())
        }
        ConditionDescriptor::Typed { operator, target, value } => {
            eval_typed(*operator, target, value.as_deref(), instance)
        }
    }
}

fn eval_legacy(operator: LegacyOperator, left: &Value, right: Option<&Value>) -> bool {
    match operator {
        LegacyOperator::Exists => !left.is_null(),
        LegacyOperator::NotExists => left.is_null(),
        LegacyOperator::Equals => right.is_some_and(|r| values_equal(left, r)),
        LegacyOperator::NotEquals => right.is_none_or(|r| !values_equal(left, r)),
        LegacyOperator::Contains => right.is_some_and(|r| value_contains(left, r)),
        LegacyOperator::NotContains => right.is_none_or(|r| !value_contains(left, r)),
        LegacyOperator::GreaterThan => compare_numeric(left, right).is_some_and(|o| o == std::cmp::Ordering::Greater),
        LegacyOperator::LessThan => compare_numeric(left, right).is_some_and(|o| o == std::cmp::Ordering::Less),
        LegacyOperator::GreaterEqual => {
            compare_numeric(left, right).is_some_and(|o| o != std::cmp::Ordering::Less)
        }
        LegacyOperator::LessEqual => compare_numeric(left, right).is_some_and(|o| o != std::cmp::Ordering::Greater),
        LegacyOperator::In => right.is_some_and(|r| membership(left, r)),
        LegacyOperator::NotIn => right.is_none_or(|r| !membership(left, r)),
    }
}

fn eval_typed(operator: TypedOperator, target: &str, value: Option<&str>, instance: &WorkflowInstance) -> bool {
    let tv = resolve_operand(target, instance);
    match operator {
        TypedOperator::IsEmpty => is_empty_value(&tv),
        TypedOperator::IsNotEmpty => !is_empty_value(&tv),
        TypedOperator::CountGreaterThan => value
            .and_then(|v| v.parse::<i64>().ok())
            .is_some_and(|n| value_len(&tv) as i64 > n),
        TypedOperator::CountLessThan => value
            .and_then(|v| v.parse::<i64>().ok())
            .is_some_and(|n| (value_len(&tv) as i64) < n),
        TypedOperator::Contains | TypedOperator::ResponseContains => {
            value.is_some_and(|v| value_contains(&tv, &Value::String(v.to_string())))
        }
        TypedOperator::Equals => value.is_some_and(|v| stringify_value(&tv) == v),
        TypedOperator::HasError => {
            let error_key = error_variable_name(target);
            instance.get_variable(&error_key).is_some()
        }
    }
}

fn error_variable_name(target: &str) -> String {
    let stripped = target.strip_prefix('$').unwrap_or(target);
    let stripped = stripped.strip_prefix("variables.").unwrap_or(stripped);
    if stripped.ends_with("_error") {
        stripped.to_string()
    } else {
        format!("{stripped}_error")
    }
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn value_len(v: &Value) -> usize {
    match v {
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        Value::String(s) => s.len(),
        _ => 0,
    }
}

fn value_contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|k| map.contains_key(k)),
        other => stringify_value(other).to_lowercase().contains(&stringify_value(needle).to_lowercase()),
    }
}

fn membership(needle: &Value, haystack: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::String(s) => s.split(',').map(str::trim).any(|part| part == stringify_value(needle)),
        _ => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    stringify_value(a) == stringify_value(b)
}

fn compare_numeric(left: &Value, right: Option<&Value>) -> Option<std::cmp::Ordering> {
    let left = value_as_f64(left)?;
    let right = value_as_f64(right?)?;
    left.partial_cmp(&right)
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Resolve a condition operand: a `$`-prefixed string is a dotted path over
/// `variables`/`step_results`/`human_inputs`; anything else is a literal.
fn resolve_operand(raw: &str, instance: &WorkflowInstance) -> Value {
    match raw.strip_prefix('$') {
        Some(path) => resolve_path(path, &instance.variables).unwrap_or(Value::Null),
        None => Value::String(raw.to_string()),
    }
}

fn resolve_path(path: &str, variables: &HashMap<String, Value>) -> Option<Value> {
    let path = path
        .strip_prefix("variables.")
        .or_else(|| path.strip_prefix("step_results."))
        .or_else(|| path.strip_prefix("human_inputs."))
        .unwrap_or(path);

    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = variables.get(first)?.clone();
    for segment in segments {
        current = match current {
            Value::Object(mut map) => map.remove(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.into_iter().nth(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

fn is_placeholder_name(candidate: &str) -> bool {
    !candidate.is_empty() && candidate.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

fn error_sentinel(placeholder: &str) -> String {
    let name = placeholder.split('.').next().unwrap_or(placeholder);
    format!("[Previous step failed: {name}]")
}

/// Resolve `{name}`/`{name.dotted.path}` placeholders against `variables`.
/// Purely string-level: placeholders are found by literal `{`/`}` scanning,
/// never handed to a regex replace engine, so regex metacharacters inside a
/// resolved value cannot alter the template (§4.7).
fn substitute_against(template: &str, variables: &HashMap<String, Value>) -> String {
    let mut output = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < template.len() {
        if bytes[i] == b'{' {
            if let Some(rel_end) = template[i + 1..].find('}') {
                let end = i + 1 + rel_end;
                let placeholder = &template[i + 1..end];
                if is_placeholder_name(placeholder) {
                    match resolve_path(placeholder, variables) {
                        Some(value) => {
                            let rendered = stringify_value(&value);
                            let lower = rendered.to_lowercase();
                            if ERROR_LIKE_MARKERS.iter().any(|m| lower.contains(m)) {
                                output.push_str(&error_sentinel(placeholder));
                            } else {
                                output.push_str(&rendered);
                            }
                            i = end + 1;
                            continue;
                        }
                        None => {
                            output.push_str(&template[i..=end]);
                            i = end + 1;
                            continue;
                        }
                    }
                }
            }
        }
        let ch = template[i..].chars().next().unwrap();
        output.push(ch);
        i += ch.len_utf8();
    }
    output
}

fn substitute(template: &str, instance: &WorkflowInstance) -> String {
    substitute_against(template, &instance.variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RetryPolicy, StepCommon, TriggerDescriptor, TypedOperator, WorkflowDefinition};
    use crate::workflow::agent_rpc::MockAgentClient;
    use crate::workflow::extractor::MockExtractor;

    fn common(id: &str, critical: bool) -> StepCommon {
        StepCommon {
            id: id.to_string(),
            name: id.to_string(),
            critical,
            timeout_ms: None,
            metadata: Value::Null,
        }
    }

    fn engine_with(agent_responses: Vec<Result<Value, String>>) -> WorkflowEngine {
        WorkflowEngine::new(
            Arc::new(MockAgentClient::new(agent_responses)),
            Arc::new(MockExtractor::new(vec![])),
            WorkflowConfig::default(),
        )
    }

    fn onboarding_definition() -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new("wf-onboarding", "New Customer Onboarding", TriggerDescriptor {
            pattern: "onboard".to_string(),
            priority: 0,
        });
        def.entry_step = "find_opportunity".to_string();
        def.with_step(Step::Action {
            common: common("find_opportunity", true),
            agent: "salesforce".to_string(),
            instruction_template: "find opportunities for {account}".to_string(),
            on_complete: Some(OnComplete {
                condition: ConditionDescriptor::Legacy {
                    operator: LegacyOperator::NotContains,
                    left: "$variables.last_action_result".to_string(),
                    right: Some("found 1".to_string()),
                },
                true_next: "select_opportunity".to_string(),
                false_next: "extract_opportunity".to_string(),
            }),
            next_step: None,
            retry: RetryPolicy::default(),
        })
        .with_step(Step::Human {
            common: common("select_opportunity", false),
            description_template: "Multiple opportunities found for {account}, pick one".to_string(),
            context_from: vec![],
            next_step: Some("extract_opportunity".to_string()),
        })
        .with_step(Step::Extract {
            common: common("extract_opportunity", false),
            source_var: "last_action_result".to_string(),
            prompt: "extract the opportunity id".to_string(),
            schema_name: None,
            next_step: Some("complete_onboarding".to_string()),
        })
        .with_step(Step::Action {
            common: common("complete_onboarding", true),
            agent: "salesforce".to_string(),
            instruction_template: "close onboarding for {account}".to_string(),
            on_complete: None,
            next_step: Some(END.to_string()),
            retry: RetryPolicy::default(),
        })
    }

    #[tokio::test]
    async fn single_opportunity_fast_path_skips_human_step() {
        let compiled = CompiledWorkflow::compile(onboarding_definition()).unwrap();
        let mut instance = compiled.new_instance(HashMap::new(), "salesforce-task-1");

        let engine = WorkflowEngine::new(
            Arc::new(MockAgentClient::new(vec![
                Ok(json!("found 1 opportunity id=006A")),
                Ok(json!("onboarding closed")),
            ])),
            Arc::new(MockExtractor::new(vec![json!({"opportunity_id": "006A"})])),
            WorkflowConfig::default(),
        );

        engine.run_until_blocked(&compiled, &mut instance).await;

        assert_eq!(instance.status, InstanceStatus::Completed);
        assert!(instance.history.iter().all(|h| h.step_id != "select_opportunity"));
    }

    #[tokio::test]
    async fn multiple_opportunities_interrupt_then_resume() {
        let compiled = CompiledWorkflow::compile(onboarding_definition()).unwrap();
        let mut instance = compiled.new_instance(HashMap::new(), "salesforce-task-1");

        let engine = engine_with(vec![Ok(json!("found 3 opportunities"))]);
        engine.run_until_blocked(&compiled, &mut instance).await;

        assert_eq!(instance.status, InstanceStatus::WaitingForHuman);
        let payload = instance.interrupt.clone().expect("interrupt payload present");
        assert_eq!(payload.step_id, "select_opportunity");

        let engine = WorkflowEngine::new(
            Arc::new(MockAgentClient::new(vec![Ok(json!("onboarding closed"))])),
            Arc::new(MockExtractor::new(vec![json!({"opportunity_id": "006XYZ"})])),
            WorkflowConfig::default(),
        );
        engine.resume_human(&compiled, &mut instance, json!("006XYZ")).await.unwrap();

        assert_eq!(instance.get_variable("select_opportunity_response"), Some(&json!("006XYZ")));
        assert_eq!(instance.status, InstanceStatus::Completed);
        assert!(instance.get_variable("extract_opportunity_result").is_some());
    }

    #[tokio::test]
    async fn retry_policy_succeeds_on_third_attempt() {
        let mut def = WorkflowDefinition::new("wf-retry", "Retry Test", TriggerDescriptor {
            pattern: ".*".to_string(),
            priority: 0,
        });
        def.entry_step = "call_agent".to_string();
        let compiled = CompiledWorkflow::compile(def.with_step(Step::Action {
            common: common("call_agent", true),
            agent: "jira".to_string(),
            instruction_template: "create ticket".to_string(),
            on_complete: None,
            next_step: Some(END.to_string()),
            retry: RetryPolicy { max_attempts: 3, backoff_ms: 1 },
        }))
        .unwrap();
        let mut instance = compiled.new_instance(HashMap::new(), "jira-task-1");

        let agent = MockAgentClient::new(vec![
            Err("transient timeout".to_string()),
            Err("transient timeout".to_string()),
            Ok(json!({"ticket": "JIRA-1"})),
        ]);
        let engine = WorkflowEngine::new(Arc::new(agent), Arc::new(MockExtractor::new(vec![])), WorkflowConfig::default());

        engine.run_until_blocked(&compiled, &mut instance).await;

        assert_eq!(instance.status, InstanceStatus::Completed);
        assert_eq!(instance.history.len(), 1);
        assert_eq!(instance.history[0].outcome, StepOutcomeKind::Completed);
    }

    #[tokio::test]
    async fn parallel_step_aggregates_mixed_outcomes() {
        let mut def = WorkflowDefinition::new("wf-parallel", "Parallel Test", TriggerDescriptor {
            pattern: ".*".to_string(),
            priority: 0,
        });
        def.entry_step = "fan_out".to_string();
        let compiled = CompiledWorkflow::compile(
            def.with_step(Step::Parallel {
                common: common("fan_out", false),
                substeps: vec!["a".to_string(), "b".to_string(), "c".to_string()],
                next_step: Some(END.to_string()),
            })
            .with_step(Step::Action {
                common: common("a", false),
                agent: "sf".to_string(),
                instruction_template: "a".to_string(),
                on_complete: None,
                next_step: Some(END.to_string()),
                retry: RetryPolicy { max_attempts: 1, backoff_ms: 1 },
            })
            .with_step(Step::Action {
                common: common("b", false),
                agent: "sf".to_string(),
                instruction_template: "b".to_string(),
                on_complete: None,
                next_step: Some(END.to_string()),
                retry: RetryPolicy { max_attempts: 1, backoff_ms: 1 },
            })
            .with_step(Step::Action {
                common: common("c", false),
                agent: "sf".to_string(),
                instruction_template: "c".to_string(),
                on_complete: None,
                next_step: Some(END.to_string()),
                retry: RetryPolicy { max_attempts: 1, backoff_ms: 1 },
            }),
        )
        .unwrap();
        let mut instance = compiled.new_instance(HashMap::new(), "sf-task-1");

        // Order doesn't matter to MockAgentClient's FIFO queue only if dispatch
        // order is deterministic; substeps dispatch concurrently so we give each
        // a distinguishable ok/err regardless of completion order via 1 response
        // each (a, b succeed; c fails) consumed across 3 concurrent calls.
        let agent = MockAgentClient::new(vec![Ok(json!("ok")), Ok(json!("ok")), Err("boom".to_string())]);
        let engine = WorkflowEngine::new(Arc::new(agent), Arc::new(MockExtractor::new(vec![])), WorkflowConfig::default());

        engine.run_until_blocked(&compiled, &mut instance).await;

        assert_eq!(instance.status, InstanceStatus::Completed);
        let results = instance.get_variable("fan_out_parallel_results").unwrap();
        assert_eq!(results.as_object().unwrap().len(), 3);
    }

    #[test]
    fn substitute_replaces_dotted_path_placeholders() {
        let mut instance = WorkflowInstance::new("wf-1", "start", "t1");
        instance.set_variable("account", json!({"name": "Acme"}));
        let rendered = substitute("hello {account.name}", &instance);
        assert_eq!(rendered, "hello Acme");
    }

    #[test]
    fn substitute_leaves_unknown_placeholder_untouched() {
        let instance = WorkflowInstance::new("wf-1", "start", "t1");
        let rendered = substitute("hello {unknown}", &instance);
        assert_eq!(rendered, "hello {unknown}");
    }

    #[test]
    fn substitute_replaces_error_like_values_with_sentinel() {
        let mut instance = WorkflowInstance::new("wf-1", "start", "t1");
        instance.set_variable("prior_result", json!("Error: failed to reach agent"));
        let rendered = substitute("context: {prior_result}", &instance);
        assert_eq!(rendered, "context: [Previous step failed: prior_result]");
    }

    #[test]
    fn evaluate_condition_typed_is_empty() {
        let mut instance = WorkflowInstance::new("wf-1", "start", "t1");
        instance.set_variable("items", json!([]));
        let descriptor = ConditionDescriptor::Typed {
            operator: TypedOperator::IsEmpty,
            target: "$variables.items".to_string(),
            value: None,
        };
        assert!(evaluate_condition(&descriptor, &instance));
    }

    #[test]
    fn evaluate_condition_has_error_checks_sibling_error_variable() {
        let mut instance = WorkflowInstance::new("wf-1", "start", "t1");
        instance.set_variable("find_opportunity_error", json!("timeout"));
        let descriptor = ConditionDescriptor::Typed {
            operator: TypedOperator::HasError,
            target: "$variables.find_opportunity".to_string(),
            value: None,
        };
        assert!(evaluate_condition(&descriptor, &instance));
    }

    /// Never replies; used to prove a step's `timeout_ms` cuts the call off
    /// rather than waiting on it forever.
    struct HangingAgentClient;

    #[async_trait::async_trait]
    impl AgentClient for HangingAgentClient {
        async fn dispatch(&self, _agent: &str, _request: crate::workflow::wire::TaskRequest) -> Result<Value, WorkflowError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn timeout_ms_cuts_off_a_hanging_dispatch() {
        let mut def = WorkflowDefinition::new("wf-timeout", "Timeout Test", TriggerDescriptor {
            pattern: ".*".to_string(),
            priority: 0,
        });
        def.entry_step = "call_agent".to_string();
        let compiled = CompiledWorkflow::compile(def.with_step(Step::Action {
            common: StepCommon {
                id: "call_agent".to_string(),
                name: "call_agent".to_string(),
                critical: true,
                timeout_ms: Some(10),
                metadata: Value::Null,
            },
            agent: "jira".to_string(),
            instruction_template: "create ticket".to_string(),
            on_complete: None,
            next_step: Some(END.to_string()),
            retry: RetryPolicy { max_attempts: 1, backoff_ms: 1 },
        }))
        .unwrap();
        let mut instance = compiled.new_instance(HashMap::new(), "jira-task-timeout");

        let engine = WorkflowEngine::new(Arc::new(HangingAgentClient), Arc::new(MockExtractor::new(vec![])), WorkflowConfig::default());
        engine.run_until_blocked(&compiled, &mut instance).await;

        assert_eq!(instance.status, InstanceStatus::Failed);
        assert!(instance.get_variable("failure_reason").unwrap().as_str().unwrap().contains("timed out"));
    }

    #[test]
    fn evaluate_condition_malformed_path_defaults_false() {
        let instance = WorkflowInstance::new("wf-1", "start", "t1");
        let descriptor = ConditionDescriptor::Typed {
            operator: TypedOperator::IsNotEmpty,
            target: "$variables.nonexistent.deeply.nested".to_string(),
            value: None,
        };
        assert!(!evaluate_condition(&descriptor, &instance));
    }
}
