//! Event Bus Architecture for Live Observability
//!
//! This module provides the event system for real-time visibility into workflow
//! execution and memory graph activity. Every significant action emits an event.
//! The file logger is the built-in consumer; an operator command (`td replay`)
//! reads the same log back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       EVENT BUS                              │
//! │            (tokio::sync::broadcast channel)                  │
//! │                                                              │
//! │  Every action emits an event. Every consumer subscribes.    │
//! └─────────────────────────────────────────────────────────────┘
//!         ↑                    ↑                      ↑
//!   Workflow Manager      Workflow Engine       Memory Manager
//!   emits:                emits:                emits (via
//!   - WorkflowStarted     - StepStarted           GraphObserver):
//!   - WorkflowSuspended   - AgentCallStarted     - MemoryNodeStored
//!   - WorkflowResumed     - StepCompleted        - MemoryRelationshipAdded
//!   - WorkflowCompleted
//!
//!         ↓                    ↓                      ↓
//! ┌───────────┐                                ┌───────────┐
//! │ File Log  │                                │ Metrics   │
//! │ .jsonl    │                                │ (future)  │
//! └───────────┘                                └───────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use workflowd::events::{EventBus, EventEmitter, TdEvent};
//! use std::sync::Arc;
//!
//! // Create event bus (typically at app startup)
//! let event_bus = Arc::new(EventBus::with_default_capacity());
//!
//! // Get emitter for a specific workflow instance
//! let emitter = event_bus.emitter_for("instance-123");
//!
//! // Emit events using convenience methods
//! emitter.workflow_started("thread-1", "onboarding");
//! emitter.step_started("greet");
//! emitter.agent_call_started("greet", "salesforce", "task-1");
//!
//! // Subscribe to events (for loggers, metrics, etc.)
//! let mut rx = event_bus.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     println!("Event: {:?}", event);
//! }
//! ```
//!
//! # Event Types
//!
//! See [`TdEvent`] for the complete list of events:
//! - Workflow lifecycle: `WorkflowStarted`, `StepStarted`, `StepCompleted`,
//!   `WorkflowSuspended`, `WorkflowResumed`, `WorkflowCompleted`
//! - Agent RPC: `AgentCallStarted`, `AgentCallCompleted`
//! - Memory graph: `MemoryNodeStored`, `MemoryRelationshipAdded`, `MemoryScopeCleanedUp`
//! - Errors: `Error`, `Warning`

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use logger::{EventLogger, read_execution_events, replay_execution_events, spawn_event_logger};
pub use types::{EventLogEntry, StepOutcome, TdEvent};
