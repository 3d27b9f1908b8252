//! Workflow error kinds, per §7 of the design: each variant carries its own
//! propagation policy, enforced by callers rather than by this type.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while compiling, executing, or routing a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Retryable: the Engine applies the step's retry policy.
    #[error("agent call failed (transient): {0}")]
    TransientAgentFailure(String),

    /// A step's `timeout_ms` elapsed before its I/O call returned. Retryable
    /// exactly like a transient agent failure.
    #[error("step timed out after {0:?}")]
    Timeout(Duration),

    /// Not retryable: aborts the instance immediately.
    #[error("agent call failed (critical): {0}")]
    AgentFailureCritical(String),

    /// Rejected at compile time, before any instance is created.
    #[error("invalid workflow definition: {0}")]
    InvalidWorkflowDefinition(#[from] crate::domain::DefinitionError),

    /// A step's routing function could not resolve a next step; treated as
    /// an instance failure.
    #[error("step routing error: step '{0}' has no resolvable next step")]
    StepRoutingError(String),

    /// A condition could not be evaluated; policy is to default to `false`
    /// and log, not to fail the step.
    #[error("condition evaluation error: {0}")]
    ConditionEvaluationError(String),

    /// Not a hard error: the placeholder is left in place verbatim.
    #[error("unresolved substitution: {0}")]
    SubstitutionUnresolved(String),

    /// The hot local store is down; callers should continue with local-only
    /// operation and defer the remote sync.
    #[error("persisted store unavailable: {0}")]
    PersistedStoreUnavailable(String),

    /// Not a true error: signals the driver loop to exit `run_until` and
    /// return an interrupt payload to the caller.
    #[error("interrupt required")]
    InterruptRequired,

    #[error("execution cancelled: {0}")]
    Cancellation(String),

    #[error("schema validation failed: {0}")]
    SchemaValidationFailure(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),
}

impl WorkflowError {
    /// Whether the Engine's retry policy should apply to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::TransientAgentFailure(_) | WorkflowError::Timeout(_))
    }

    /// Whether this error should terminate the instance with status
    /// `failed` rather than being absorbed locally.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WorkflowError::AgentFailureCritical(_)
                | WorkflowError::InvalidWorkflowDefinition(_)
                | WorkflowError::StepRoutingError(_)
                | WorkflowError::SchemaValidationFailure(_)
                | WorkflowError::ResourceNotFound(_)
        )
    }
}
