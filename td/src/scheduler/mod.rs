//! Scheduler for agent RPC dispatch (§5 Concurrency).
//!
//! Manages outgoing agent task requests with priority queuing, a concurrency
//! cap, and a sliding-window rate limit in a single component.

mod config;
mod core;
mod queue;

pub use config::SchedulerConfig;
pub use core::Scheduler;
pub use queue::{QueueEntry, QueueEntryStatus, QueueState, ScheduleResult, ScheduledRequest};
