//! Workflow Execution Engine
//!
//! Coordinates long-running business workflows across remote CRM/ITSM agents:
//! compiles declarative workflow definitions into executable graphs, dispatches
//! steps via agent RPC with retry and interrupt/resume, and routes incoming
//! instructions to the right template. A Plan-and-Execute Planner decomposes
//! free-form instructions into a task DAG, and a thin Context Builder layers
//! conversational-memory lookups (from the `memory` crate) on top of prompts.
//!
//! # Modules
//!
//! - [`domain`] - workflow definition/instance/task/plan types
//! - [`workflow`] - compiler, engine, agent RPC client, and routing manager
//! - [`planning`] - the Plan-and-Execute Planner
//! - [`context`] - memory-aware prompt context and graph-update observability
//! - [`llm`] - LLM client trait and Anthropic/OpenAI implementations
//! - [`scheduler`] - priority queue, concurrency cap, and rate limiting for agent RPC
//! - [`events`] - activity bus and JSONL event log
//! - [`config`] - configuration types and loading
//! - [`cli`] - operator command-line interface

pub mod cli;
pub mod config;
pub mod context;
pub mod domain;
pub mod events;
pub mod llm;
pub mod planning;
pub mod scheduler;
pub mod workflow;

pub use config::{Config, LlmConfig, PlannerConfig, StorageConfig, WorkflowConfig};
pub use context::{ContextBuilder, ContextSection, GraphEvent, GraphObserver};
pub use domain::{
    DefinitionError, ExecutionTask, Plan, PlanStatus, Priority, Record, Step, TaskPriority, TaskStatus,
    TriggerDescriptor, WorkflowDefinition, WorkflowInstance,
};
pub use events::{EventBus, EventEmitter, EventLogEntry, EventLogger, StepOutcome, TdEvent, create_event_bus};
pub use llm::{AnthropicClient, LlmClient, LlmError, OpenAIClient, create_client};
pub use planning::{AgentCapability, Planner, AVAILABLE_AGENTS};
pub use scheduler::{QueueEntry, QueueEntryStatus, QueueState, ScheduleResult, Scheduler, SchedulerConfig};
pub use workflow::{AgentClient, CompiledWorkflow, HttpAgentClient, RoutingOutcome, WorkflowEngine, WorkflowError, WorkflowManager};
