//! Domain types for the workflow engine: the workflow definition/instance/task
//! model plus a handful of identifier and priority helpers shared with the
//! scheduler. All persistable types implement the `Record` trait for
//! TaskStore persistence.

mod definition;
mod id;
mod plan;
mod priority;
mod step;
mod task;

pub mod instance;

pub use definition::{DefinitionError, TriggerDescriptor, WorkflowDefinition};
pub use id::{DomainId, IdResolver, generate_id};
pub use instance::{HistoryEntry, InstanceStatus, InterruptPayload, StepOutcomeKind, WorkflowInstance};
pub use plan::{Plan, PlanStatus};
pub use priority::Priority;
pub use step::{
    ConditionDescriptor, LegacyOperator, OnComplete, RetryPolicy, Step, StepCommon, SwitchCase, TypedOperator,
    WaitPredicate, END,
};
pub use task::{ExecutionTask, TaskPriority, TaskStatus};

// Re-export taskstore types for convenience
pub use taskstore::{Filter, FilterOp, IndexValue, Record, Store};
