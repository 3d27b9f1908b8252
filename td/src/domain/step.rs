//! The `Step` tagged variant and its dispatch-relevant descriptors.
//!
//! Per the workflow design note on dynamic dispatch, step behavior is not
//! modeled as a trait hierarchy: `Step` is a plain enum, and the Engine
//! (`crate::workflow::engine`) matches on its tag to find a handler. Fields
//! common to every step live in [`StepCommon`]; type-specific fields live on
//! the matching variant only.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved terminal step id. A `next_step`/`true_next`/`false_next` of
/// `"end"` routes to the workflow sink rather than another step.
pub const END: &str = "end";

/// Fields shared by every step type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepCommon {
    pub id: String,
    pub name: String,

    /// If true, this step's failure is fatal to the instance; if false,
    /// failure is recorded and execution proceeds.
    #[serde(default)]
    pub critical: bool,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub metadata: Value,
}

/// Linear backoff retry policy: the Nth attempt (1-indexed) waits
/// `backoff_ms * N` before retrying.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1_000,
        }
    }
}

/// Legacy `{operator, left, right}` condition form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegacyOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
    Contains,
    NotContains,
    Exists,
    NotExists,
    In,
    NotIn,
}

/// Typed condition form, operating on a single target value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypedOperator {
    IsEmpty,
    IsNotEmpty,
    CountGreaterThan,
    CountLessThan,
    Contains,
    Equals,
    ResponseContains,
    HasError,
}

/// A condition, in either of the two forms the spec allows. Operand strings
/// beginning with `$` are resolved as dotted paths over
/// `variables`/`step_results`/`human_inputs` before comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum ConditionDescriptor {
    Legacy {
        operator: LegacyOperator,
        left: String,
        #[serde(default)]
        right: Option<String>,
    },
    Typed {
        operator: TypedOperator,
        target: String,
        #[serde(default)]
        value: Option<String>,
    },
}

/// Conditional routing attached to an `Action` step's completion, evaluated
/// in place of the plain `next_step` when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnComplete {
    pub condition: ConditionDescriptor,
    pub true_next: String,
    pub false_next: String,
}

/// What a `Wait` step suspends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitPredicate {
    /// Resume once `deadline_ms` (unix ms) has passed.
    Deadline { deadline_ms: i64 },
    /// Resume once an event with this name fires. A name ending in
    /// `"_complete"` is the reserved "compile" convention (§9 Open
    /// Question a): on reaching this wait, the engine gathers
    /// `compile_fields` into `compiled_results` and a rendered `summary`
    /// immediately, without actually suspending.
    Event { name: String },
}

impl WaitPredicate {
    /// Convention: an event name ending in `_complete` triggers the
    /// synchronous "compile" fallthrough instead of a real suspension.
    pub fn is_compile_event(&self) -> bool {
        matches!(self, WaitPredicate::Event { name } if name.ends_with("_complete"))
    }
}

/// One case of a `Switch` step: first matching case (in declared order)
/// wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    pub when: ConditionDescriptor,
    pub next: String,
}

/// A single node of a workflow definition. See module docs for the dispatch
/// model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    Action {
        #[serde(flatten)]
        common: StepCommon,
        agent: String,
        instruction_template: String,
        #[serde(default)]
        on_complete: Option<OnComplete>,
        #[serde(default)]
        next_step: Option<String>,
        #[serde(default)]
        retry: RetryPolicy,
    },
    Condition {
        #[serde(flatten)]
        common: StepCommon,
        descriptor: ConditionDescriptor,
        true_next: String,
        false_next: String,
    },
    Wait {
        #[serde(flatten)]
        common: StepCommon,
        predicate: WaitPredicate,
        #[serde(default)]
        compile_fields: Vec<String>,
        #[serde(default)]
        next_step: Option<String>,
    },
    Parallel {
        #[serde(flatten)]
        common: StepCommon,
        substeps: Vec<String>,
        #[serde(default)]
        next_step: Option<String>,
    },
    Human {
        #[serde(flatten)]
        common: StepCommon,
        description_template: String,
        /// Metadata keys whose values are copied verbatim into the
        /// interrupt payload's context bundle.
        #[serde(default)]
        context_from: Vec<String>,
        #[serde(default)]
        next_step: Option<String>,
    },
    Switch {
        #[serde(flatten)]
        common: StepCommon,
        cases: Vec<SwitchCase>,
        default_next: String,
    },
    ForEach {
        #[serde(flatten)]
        common: StepCommon,
        collection_var: String,
        iterator_var: String,
        loop_steps: Vec<String>,
        #[serde(default = "default_max_iterations")]
        max_iterations: u32,
        #[serde(default)]
        next_step: Option<String>,
    },
    Extract {
        #[serde(flatten)]
        common: StepCommon,
        source_var: String,
        prompt: String,
        #[serde(default)]
        schema_name: Option<String>,
        #[serde(default)]
        next_step: Option<String>,
    },
}

fn default_max_iterations() -> u32 {
    100
}

impl Step {
    pub fn common(&self) -> &StepCommon {
        match self {
            Step::Action { common, .. }
            | Step::Condition { common, .. }
            | Step::Wait { common, .. }
            | Step::Parallel { common, .. }
            | Step::Human { common, .. }
            | Step::Switch { common, .. }
            | Step::ForEach { common, .. }
            | Step::Extract { common, .. } => common,
        }
    }

    pub fn id(&self) -> &str {
        &self.common().id
    }

    pub fn critical(&self) -> bool {
        self.common().critical
    }

    /// Every step id this step's routing could name, excluding `"end"`.
    /// Used by the compiler to validate that every referenced step exists.
    pub fn referenced_step_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        let mut push = |s: &str| {
            if s != END {
                ids.push(s);
            }
        };
        match self {
            Step::Action {
                on_complete, next_step, ..
            } => {
                if let Some(oc) = on_complete {
                    push(&oc.true_next);
                    push(&oc.false_next);
                }
                if let Some(n) = next_step {
                    push(n);
                }
            }
            Step::Condition {
                true_next, false_next, ..
            } => {
                push(true_next);
                push(false_next);
            }
            Step::Wait { next_step, .. }
            | Step::Parallel { next_step, .. }
            | Step::Human { next_step, .. }
            | Step::Extract { next_step, .. }
            | Step::ForEach { next_step, .. } => {
                if let Some(n) = next_step {
                    push(n);
                }
            }
            Step::Switch { cases, default_next, .. } => {
                for c in cases {
                    push(&c.next);
                }
                push(default_next);
            }
        }
        if let Step::Parallel { substeps, .. } = self {
            for s in substeps {
                push(s);
            }
        }
        if let Step::ForEach { loop_steps, .. } = self {
            for s in loop_steps {
                push(s);
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common(id: &str) -> StepCommon {
        StepCommon {
            id: id.to_string(),
            name: id.to_string(),
            critical: false,
            timeout_ms: None,
            metadata: Value::Null,
        }
    }

    #[test]
    fn condition_referenced_ids_exclude_end() {
        let step = Step::Condition {
            common: common("c1"),
            descriptor: ConditionDescriptor::Typed {
                operator: TypedOperator::IsEmpty,
                target: "$variables.x".to_string(),
                value: None,
            },
            true_next: "next_a".to_string(),
            false_next: END.to_string(),
        };
        assert_eq!(step.referenced_step_ids(), vec!["next_a"]);
    }

    #[test]
    fn wait_predicate_compile_convention() {
        let compile = WaitPredicate::Event {
            name: "onboarding_complete".to_string(),
        };
        assert!(compile.is_compile_event());

        let plain = WaitPredicate::Event {
            name: "approval_granted".to_string(),
        };
        assert!(!plain.is_compile_event());
    }

    #[test]
    fn switch_referenced_ids_include_default() {
        let step = Step::Switch {
            common: common("s1"),
            cases: vec![SwitchCase {
                when: ConditionDescriptor::Typed {
                    operator: TypedOperator::Equals,
                    target: "$variables.tier".to_string(),
                    value: Some("gold".to_string()),
                },
                next: "gold_path".to_string(),
            }],
            default_next: "default_path".to_string(),
        };
        assert_eq!(step.referenced_step_ids(), vec!["gold_path", "default_path"]);
    }

    #[test]
    fn retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_ms, 1_000);
    }
}
