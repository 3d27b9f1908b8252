//! Workflow Compiler (§4.6): turns an immutable [`WorkflowDefinition`] into
//! something the Engine can drive.
//!
//! Per design note 9, this is not a literal graph data structure with
//! allocated edges — routing for `condition`/`switch` steps has to
//! re-evaluate against *live* instance state on every visit, so "compiling"
//! here means: validate once at registration time (rejecting the definition
//! up front, §7 `invalid_workflow_definition`), and hand back a thin wrapper
//! that seeds the synthetic init state for new instances. The actual routing
//! function lives in [`super::engine`], which is what "the routing function
//! re-evaluates the predicate on live state" (§4.6) requires.

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::domain::{DefinitionError, HistoryEntry, InstanceStatus, Step, StepOutcomeKind, WorkflowDefinition, WorkflowInstance};

/// A validated, ready-to-drive workflow definition.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub definition: WorkflowDefinition,
}

impl CompiledWorkflow {
    /// Validate `definition` (§3 invariants) and wrap it. Rejected
    /// definitions never reach the Manager's catalog (§4.9: "failures
    /// logged, do not crash" refers to the *catalog load*, not silently
    /// accepting a broken definition).
    pub fn compile(definition: WorkflowDefinition) -> Result<Self, DefinitionError> {
        definition.validate()?;
        Ok(Self { definition })
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.definition.steps.get(id)
    }

    /// Build a new instance seeded by the synthetic init node: status
    /// `running`, `workflow_id` set, definition variables merged under
    /// instance-supplied ones, and an initial history entry.
    pub fn new_instance(&self, variables: HashMap<String, Value>, triggered_by: impl Into<String>) -> WorkflowInstance {
        let mut merged = self.definition.variables.clone();
        merged.extend(variables);
        merged.insert("workflow_id".to_string(), json!(self.definition.id));
        merged.insert("workflow_name".to_string(), json!(self.definition.name));

        let mut instance = WorkflowInstance::new(&self.definition.id, &self.definition.entry_step, triggered_by)
            .with_variables(merged);
        instance.set_status(InstanceStatus::Running);
        instance.push_history(HistoryEntry {
            step_id: "__init__".to_string(),
            step_type: "init".to_string(),
            started_at: instance.created_at,
            duration_ms: 0,
            outcome: StepOutcomeKind::Completed,
            next: Some(self.definition.entry_step.clone()),
        });
        instance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RetryPolicy, StepCommon, TriggerDescriptor};
    use serde_json::json;

    fn sample_definition() -> WorkflowDefinition {
        WorkflowDefinition::new("wf-onboarding", "New Customer Onboarding", TriggerDescriptor {
            pattern: "onboard".to_string(),
            priority: 0,
        })
        .with_variable("tier", json!("standard"))
        .with_step(Step::Action {
            common: StepCommon {
                id: "start".to_string(),
                name: "Find Opportunity".to_string(),
                critical: true,
                timeout_ms: None,
                metadata: Value::Null,
            },
            agent: "salesforce".to_string(),
            instruction_template: "find opportunities for {account}".to_string(),
            on_complete: None,
            next_step: Some("end".to_string()),
            retry: RetryPolicy::default(),
        })
    }

    #[test]
    fn compile_accepts_valid_definition() {
        let compiled = CompiledWorkflow::compile(sample_definition()).unwrap();
        assert_eq!(compiled.definition.id, "wf-onboarding");
    }

    #[test]
    fn new_instance_seeds_running_status_and_merged_variables() {
        let compiled = CompiledWorkflow::compile(sample_definition()).unwrap();
        let mut vars = HashMap::new();
        vars.insert("account".to_string(), json!("Acme Corp"));

        let instance = compiled.new_instance(vars, "salesforce-task-1");

        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(instance.current_step_id, "start");
        assert_eq!(instance.get_variable("tier"), Some(&json!("standard")));
        assert_eq!(instance.get_variable("account"), Some(&json!("Acme Corp")));
        assert_eq!(instance.history.len(), 1);
        assert_eq!(instance.history[0].step_id, "__init__");
    }

    #[test]
    fn instance_variables_override_definition_defaults() {
        let compiled = CompiledWorkflow::compile(sample_definition()).unwrap();
        let mut vars = HashMap::new();
        vars.insert("tier".to_string(), json!("gold"));

        let instance = compiled.new_instance(vars, "t1");
        assert_eq!(instance.get_variable("tier"), Some(&json!("gold")));
    }
}
