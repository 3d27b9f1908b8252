//! Workflow Execution Engine (§4.6–§4.9): compiles workflow definitions,
//! drives instances through their steps via remote agent RPC, and routes
//! incoming instructions to the right definition.

mod agent_rpc;
mod compiler;
mod engine;
mod error;
mod extractor;
mod manager;
mod wire;

pub use agent_rpc::{AgentClient, AgentEndpoints, HttpAgentClient, MockAgentClient, task_id};
pub use compiler::CompiledWorkflow;
pub use engine::{WorkflowEngine, evaluate_condition};
pub use error::WorkflowError;
pub use extractor::{Extractor, LlmExtractor};
pub use manager::{RoutingOutcome, WorkflowManager};
pub use wire::{Artifact, TaskContext, TaskRequest, TaskResponse, TaskResponseMetadata, TaskStatus};
