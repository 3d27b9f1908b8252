//! Workflow Definition: an immutable template registered with the Workflow
//! Manager and compiled into an executable graph at startup.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::step::{END, Step};

/// How a workflow definition is selected by the Manager's routing table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDescriptor {
    /// Regex matched against the incoming instruction string.
    pub pattern: String,
    /// Priority among triggers when several patterns match (higher wins).
    #[serde(default)]
    pub priority: i32,
}

/// Error produced while validating a definition at registration time.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("workflow '{0}' has no entry step (expected one named 'start' or a first declared step)")]
    NoEntryStep(String),

    #[error("step '{0}' references undefined step '{1}'")]
    DanglingReference(String, String),

    #[error("step '{0}' references itself as its own immediate successor")]
    SelfReference(String),
}

/// An immutable workflow template: id, name, trigger descriptor, default
/// variables, and the step graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub trigger: TriggerDescriptor,

    /// Default variable values merged under instance-supplied variables at
    /// compile time.
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    pub steps: HashMap<String, Step>,

    /// Id of the first step to execute. Required in YAML; `new()` defaults it
    /// to `"start"` for programmatic construction, but `validate()` rejects
    /// any definition whose `entry_step` isn't one of its declared steps.
    pub entry_step: String,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, trigger: TriggerDescriptor) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            trigger,
            variables: HashMap::new(),
            steps: HashMap::new(),
            entry_step: "start".to_string(),
        }
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.insert(step.id().to_string(), step);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// Validate every invariant from §3: an entry step exists, every
    /// reference resolves to a defined step or `end`, and no step names
    /// itself as its own immediate successor.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        debug!(workflow_id = %self.id, "WorkflowDefinition::validate: called");
        if !self.steps.contains_key(&self.entry_step) {
            return Err(DefinitionError::NoEntryStep(self.id.clone()));
        }

        for (step_id, step) in &self.steps {
            for target in step.referenced_step_ids() {
                if target == step_id {
                    return Err(DefinitionError::SelfReference(step_id.clone()));
                }
                if target != END && !self.steps.contains_key(target) {
                    return Err(DefinitionError::DanglingReference(step_id.clone(), target.to_string()));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::step::{RetryPolicy, StepCommon};

    fn common(id: &str) -> StepCommon {
        StepCommon {
            id: id.to_string(),
            name: id.to_string(),
            critical: false,
            timeout_ms: None,
            metadata: Value::Null,
        }
    }

    fn action(id: &str, next: Option<&str>) -> Step {
        Step::Action {
            common: common(id),
            agent: "salesforce".to_string(),
            instruction_template: "do {thing}".to_string(),
            on_complete: None,
            next_step: next.map(|s| s.to_string()),
            retry: RetryPolicy::default(),
        }
    }

    #[test]
    fn validate_accepts_well_formed_definition() {
        let def = WorkflowDefinition::new("wf-1", "test", TriggerDescriptor {
            pattern: ".*".to_string(),
            priority: 0,
        })
        .with_step(action("start", Some("end")));

        assert!(def.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_entry_step() {
        let def = WorkflowDefinition::new("wf-1", "test", TriggerDescriptor {
            pattern: ".*".to_string(),
            priority: 0,
        });
        assert_eq!(def.validate(), Err(DefinitionError::NoEntryStep("wf-1".to_string())));
    }

    #[test]
    fn validate_rejects_dangling_reference() {
        let def = WorkflowDefinition::new("wf-1", "test", TriggerDescriptor {
            pattern: ".*".to_string(),
            priority: 0,
        })
        .with_step(action("start", Some("nowhere")));

        assert_eq!(
            def.validate(),
            Err(DefinitionError::DanglingReference("start".to_string(), "nowhere".to_string()))
        );
    }

    #[test]
    fn validate_rejects_self_reference() {
        let def = WorkflowDefinition::new("wf-1", "test", TriggerDescriptor {
            pattern: ".*".to_string(),
            priority: 0,
        })
        .with_step(action("start", Some("start")));

        assert_eq!(def.validate(), Err(DefinitionError::SelfReference("start".to_string())));
    }
}
