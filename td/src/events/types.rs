//! Event vocabulary for workflow and memory activity streaming: instance
//! lifecycle, step dispatch, agent RPC calls, and memory graph mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The vocabulary of observable activity in the workflow engine and memory
/// manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TdEvent {
    // === Workflow instance lifecycle ===
    /// A workflow instance started executing, either freshly dispatched or
    /// resumed from a suspended state.
    WorkflowStarted {
        instance_id: String,
        thread_id: String,
        definition_id: String,
    },
    /// A step began executing.
    StepStarted { instance_id: String, step_id: String },
    /// A step finished, successfully or not.
    StepCompleted {
        instance_id: String,
        step_id: String,
        outcome: StepOutcome,
    },
    /// The instance suspended at a `human` or `wait` step and is waiting on
    /// external input before it can continue.
    WorkflowSuspended { instance_id: String, step_id: String },
    /// A suspended instance resumed, either with human input or an event.
    WorkflowResumed { instance_id: String },
    /// The instance reached a terminal status.
    WorkflowCompleted { instance_id: String, status: String },

    // === Agent RPC ===
    /// A task was dispatched to a remote agent.
    AgentCallStarted {
        instance_id: String,
        step_id: String,
        agent: String,
        task_id: String,
    },
    /// A remote agent call returned.
    AgentCallCompleted {
        instance_id: String,
        step_id: String,
        agent: String,
        success: bool,
        duration_ms: u64,
    },

    // === Memory graph ===
    /// A node was stored into a scope's memory graph.
    MemoryNodeStored { scope: String, node_id: String },
    /// A relationship was added between two nodes.
    MemoryRelationshipAdded { scope: String, from: String, to: String },
    /// Idle scopes were evicted from the in-process memory graph.
    MemoryScopeCleanedUp { removed: usize },

    // === Errors & warnings ===
    /// An error occurred.
    Error { instance_id: String, context: String, message: String },
    /// A non-fatal warning occurred.
    Warning { instance_id: String, context: String, message: String },
}

impl TdEvent {
    /// The instance this event concerns, or the memory scope for
    /// memory-graph events (there is no workflow instance to attribute
    /// those to).
    pub fn subject(&self) -> &str {
        match self {
            TdEvent::WorkflowStarted { instance_id, .. }
            | TdEvent::StepStarted { instance_id, .. }
            | TdEvent::StepCompleted { instance_id, .. }
            | TdEvent::WorkflowSuspended { instance_id, .. }
            | TdEvent::WorkflowResumed { instance_id }
            | TdEvent::WorkflowCompleted { instance_id, .. }
            | TdEvent::AgentCallStarted { instance_id, .. }
            | TdEvent::AgentCallCompleted { instance_id, .. }
            | TdEvent::Error { instance_id, .. }
            | TdEvent::Warning { instance_id, .. } => instance_id,
            TdEvent::MemoryNodeStored { scope, .. }
            | TdEvent::MemoryRelationshipAdded { scope, .. } => scope,
            TdEvent::MemoryScopeCleanedUp { .. } => "",
        }
    }

    /// The event type name, for logging and dashboards.
    pub fn event_type(&self) -> &'static str {
        match self {
            TdEvent::WorkflowStarted { .. } => "WorkflowStarted",
            TdEvent::StepStarted { .. } => "StepStarted",
            TdEvent::StepCompleted { .. } => "StepCompleted",
            TdEvent::WorkflowSuspended { .. } => "WorkflowSuspended",
            TdEvent::WorkflowResumed { .. } => "WorkflowResumed",
            TdEvent::WorkflowCompleted { .. } => "WorkflowCompleted",
            TdEvent::AgentCallStarted { .. } => "AgentCallStarted",
            TdEvent::AgentCallCompleted { .. } => "AgentCallCompleted",
            TdEvent::MemoryNodeStored { .. } => "MemoryNodeStored",
            TdEvent::MemoryRelationshipAdded { .. } => "MemoryRelationshipAdded",
            TdEvent::MemoryScopeCleanedUp { .. } => "MemoryScopeCleanedUp",
            TdEvent::Error { .. } => "Error",
            TdEvent::Warning { .. } => "Warning",
        }
    }
}

/// Outcome of a single step dispatch.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "outcome_type")]
pub enum StepOutcome {
    Succeeded,
    Failed { error: String },
    WaitingForHuman,
    WaitingForEvent { event_name: String },
}

/// A timestamped event log entry for file persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: TdEvent,
}

impl EventLogEntry {
    pub fn new(event: TdEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_reads_instance_id() {
        let event = TdEvent::WorkflowStarted {
            instance_id: "inst-123".to_string(),
            thread_id: "thread-1".to_string(),
            definition_id: "onboarding".to_string(),
        };
        assert_eq!(event.subject(), "inst-123");
    }

    #[test]
    fn subject_reads_scope_for_memory_events() {
        let event = TdEvent::MemoryNodeStored {
            scope: "thread-1".to_string(),
            node_id: "n1".to_string(),
        };
        assert_eq!(event.subject(), "thread-1");
    }

    #[test]
    fn event_type_names_match_variant() {
        let event = TdEvent::StepCompleted {
            instance_id: "inst-123".to_string(),
            step_id: "greet".to_string(),
            outcome: StepOutcome::Succeeded,
        };
        assert_eq!(event.event_type(), "StepCompleted");
    }

    #[test]
    fn event_round_trips_through_json() {
        let event = TdEvent::WorkflowCompleted {
            instance_id: "inst-123".to_string(),
            status: "Completed".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("WorkflowCompleted"));

        let parsed: TdEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.subject(), "inst-123");
    }

    #[test]
    fn log_entry_carries_a_timestamp() {
        let event = TdEvent::WorkflowStarted {
            instance_id: "inst-123".to_string(),
            thread_id: "thread-1".to_string(),
            definition_id: "onboarding".to_string(),
        };
        let entry = EventLogEntry::new(event);

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("ts"));
        assert!(json.contains("WorkflowStarted"));
    }
}
