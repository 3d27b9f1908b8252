//! Event Bus - central pub/sub system for workflow and memory activity
//!
//! The EventBus uses tokio broadcast channels to deliver events to all subscribers
//! with minimal latency. Components emit events, consumers (file loggers, metrics)
//! subscribe.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{StepOutcome, TdEvent as Event};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Central event bus for workflow and memory activity streaming.
///
/// Every significant action emits an event to this bus. All consumers (the
/// file logger, future metrics exporters) subscribe to receive events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    #[allow(dead_code)]
    channel_capacity: usize,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            channel_capacity: capacity,
        }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// This is fire-and-forget: if there are no subscribers, the event is dropped.
    /// If the channel is full, oldest events are dropped.
    pub fn emit(&self, event: Event) {
        debug!(event_type = event.event_type(), subject = event.subject(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to receive events
    ///
    /// Returns a receiver that will receive all events emitted after subscription.
    /// Note: Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter handle bound to a workflow instance
    pub fn emitter_for(&self, instance_id: impl Into<String>) -> EventEmitter {
        let instance_id = instance_id.into();
        debug!(%instance_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: self.tx.clone(),
            instance_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for components to emit events without owning the bus.
///
/// Cheap to clone; bound to a single workflow instance id.
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<Event>,
    instance_id: String,
}

impl EventEmitter {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Emit a raw event
    pub fn emit(&self, event: Event) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    pub fn workflow_started(&self, thread_id: &str, definition_id: &str) {
        self.emit(Event::WorkflowStarted {
            instance_id: self.instance_id.clone(),
            thread_id: thread_id.to_string(),
            definition_id: definition_id.to_string(),
        });
    }

    pub fn step_started(&self, step_id: &str) {
        self.emit(Event::StepStarted {
            instance_id: self.instance_id.clone(),
            step_id: step_id.to_string(),
        });
    }

    pub fn step_completed(&self, step_id: &str, outcome: StepOutcome) {
        self.emit(Event::StepCompleted {
            instance_id: self.instance_id.clone(),
            step_id: step_id.to_string(),
            outcome,
        });
    }

    pub fn workflow_suspended(&self, step_id: &str) {
        self.emit(Event::WorkflowSuspended {
            instance_id: self.instance_id.clone(),
            step_id: step_id.to_string(),
        });
    }

    pub fn workflow_resumed(&self) {
        self.emit(Event::WorkflowResumed {
            instance_id: self.instance_id.clone(),
        });
    }

    pub fn workflow_completed(&self, status: &str) {
        self.emit(Event::WorkflowCompleted {
            instance_id: self.instance_id.clone(),
            status: status.to_string(),
        });
    }

    pub fn agent_call_started(&self, step_id: &str, agent: &str, task_id: &str) {
        self.emit(Event::AgentCallStarted {
            instance_id: self.instance_id.clone(),
            step_id: step_id.to_string(),
            agent: agent.to_string(),
            task_id: task_id.to_string(),
        });
    }

    pub fn agent_call_completed(&self, step_id: &str, agent: &str, success: bool, duration_ms: u64) {
        self.emit(Event::AgentCallCompleted {
            instance_id: self.instance_id.clone(),
            step_id: step_id.to_string(),
            agent: agent.to_string(),
            success,
            duration_ms,
        });
    }

    pub fn error(&self, context: &str, message: &str) {
        self.emit(Event::Error {
            instance_id: self.instance_id.clone(),
            context: context.to_string(),
            message: message.to_string(),
        });
    }

    pub fn warning(&self, context: &str, message: &str) {
        self.emit(Event::Warning {
            instance_id: self.instance_id.clone(),
            context: context.to_string(),
            message: message.to_string(),
        });
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn event_bus_creation() {
        let bus = EventBus::new(100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn event_bus_subscribe() {
        let bus = EventBus::new(100);
        let _rx1 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn event_bus_emit_receive() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();

        bus.emit(Event::WorkflowStarted {
            instance_id: "inst-123".to_string(),
            thread_id: "thread-1".to_string(),
            definition_id: "onboarding".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.subject(), "inst-123");
        assert_eq!(event.event_type(), "WorkflowStarted");
    }

    #[tokio::test]
    async fn event_bus_no_subscribers_does_not_panic() {
        let bus = EventBus::new(100);
        bus.emit(Event::WorkflowStarted {
            instance_id: "inst-123".to_string(),
            thread_id: "thread-1".to_string(),
            definition_id: "onboarding".to_string(),
        });
    }

    #[tokio::test]
    async fn event_emitter_binds_instance_id() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("inst-456");

        emitter.workflow_started("thread-1", "onboarding");

        let event = rx.recv().await.unwrap();
        assert_eq!(event.subject(), "inst-456");
        match event {
            Event::WorkflowStarted {
                thread_id, definition_id, ..
            } => {
                assert_eq!(thread_id, "thread-1");
                assert_eq!(definition_id, "onboarding");
            }
            _ => panic!("expected WorkflowStarted event"),
        }
    }

    #[tokio::test]
    async fn emitter_convenience_methods_emit_in_order() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("inst-789");

        emitter.step_started("greet");
        emitter.agent_call_started("greet", "salesforce", "task-1");
        emitter.agent_call_completed("greet", "salesforce", true, 50);
        emitter.step_completed("greet", StepOutcome::Succeeded);
        emitter.workflow_completed("Completed");

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event.event_type().to_string());
        }
        assert_eq!(
            events,
            vec![
                "StepStarted",
                "AgentCallStarted",
                "AgentCallCompleted",
                "StepCompleted",
                "WorkflowCompleted",
            ]
        );
    }

    #[tokio::test]
    async fn multiple_subscribers_both_receive() {
        let bus = EventBus::new(100);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(Event::WorkflowStarted {
            instance_id: "test".to_string(),
            thread_id: "thread-1".to_string(),
            definition_id: "onboarding".to_string(),
        });

        let event1 = rx1.recv().await.unwrap();
        let event2 = rx2.recv().await.unwrap();

        assert_eq!(event1.subject(), "test");
        assert_eq!(event2.subject(), "test");
    }

    #[tokio::test]
    async fn full_workflow_lifecycle_events_in_order() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("lifecycle-test");

        emitter.workflow_started("thread-1", "onboarding");
        emitter.step_started("greet");
        emitter.agent_call_started("greet", "salesforce", "task-1");
        emitter.agent_call_completed("greet", "salesforce", true, 50);
        emitter.step_completed("greet", StepOutcome::Succeeded);
        emitter.step_started("collect_info");
        emitter.workflow_suspended("collect_info");
        emitter.workflow_resumed();
        emitter.step_completed("collect_info", StepOutcome::Succeeded);
        emitter.workflow_completed("Completed");

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event.event_type().to_string());
        }

        assert_eq!(
            events,
            vec![
                "WorkflowStarted",
                "StepStarted",
                "AgentCallStarted",
                "AgentCallCompleted",
                "StepCompleted",
                "StepStarted",
                "WorkflowSuspended",
                "WorkflowResumed",
                "StepCompleted",
                "WorkflowCompleted",
            ]
        );
    }

    #[tokio::test]
    async fn lagged_subscriber_continues() {
        let bus = EventBus::new(5);
        let mut rx = bus.subscribe();

        for i in 0..10 {
            bus.emit(Event::AgentCallStarted {
                instance_id: "lag-test".to_string(),
                step_id: "s".to_string(),
                agent: "salesforce".to_string(),
                task_id: format!("task-{i}"),
            });
        }

        let result = rx.recv().await;
        match result {
            Ok(event) => assert_eq!(event.event_type(), "AgentCallStarted"),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                assert!(n > 0, "should have missed some events");
                let event = rx.recv().await.unwrap();
                assert_eq!(event.event_type(), "AgentCallStarted");
            }
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }

    #[tokio::test]
    async fn error_and_warning_events() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();
        let emitter = bus.emitter_for("error-test");

        emitter.warning("agent_rpc", "retrying after timeout");
        emitter.error("llm", "rate limit exceeded");

        let warning = rx.recv().await.unwrap();
        assert_eq!(warning.event_type(), "Warning");
        if let Event::Warning { context, message, .. } = warning {
            assert_eq!(context, "agent_rpc");
            assert_eq!(message, "retrying after timeout");
        } else {
            panic!("expected Warning event");
        }

        let error = rx.recv().await.unwrap();
        assert_eq!(error.event_type(), "Error");
        if let Event::Error { context, message, .. } = error {
            assert_eq!(context, "llm");
            assert_eq!(message, "rate limit exceeded");
        } else {
            panic!("expected Error event");
        }
    }

    #[tokio::test]
    async fn multiple_instances_interleaved() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();

        let emitter_a = bus.emitter_for("inst-A");
        let emitter_b = bus.emitter_for("inst-B");

        emitter_a.step_started("greet");
        emitter_b.step_started("greet");
        emitter_a.step_completed("greet", StepOutcome::Succeeded);
        emitter_b.step_completed("greet", StepOutcome::Failed { error: "timeout".to_string() });

        let mut inst_a_events = Vec::new();
        let mut inst_b_events = Vec::new();

        while let Ok(event) = rx.try_recv() {
            match event.subject() {
                "inst-A" => inst_a_events.push(event.event_type().to_string()),
                "inst-B" => inst_b_events.push(event.event_type().to_string()),
                other => panic!("unexpected subject: {other}"),
            }
        }

        assert_eq!(inst_a_events, vec!["StepStarted", "StepCompleted"]);
        assert_eq!(inst_b_events, vec!["StepStarted", "StepCompleted"]);
    }

    #[tokio::test]
    async fn emitter_instance_id_accessor() {
        let bus = EventBus::new(100);
        let emitter = bus.emitter_for("my-instance");
        assert_eq!(emitter.instance_id(), "my-instance");
    }

    #[test]
    fn default_channel_capacity_is_10000() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 10_000);
    }

    #[test]
    fn event_bus_default_has_no_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn create_event_bus_helper_works() {
        let bus = create_event_bus();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
