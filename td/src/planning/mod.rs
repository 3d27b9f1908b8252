//! Planner (§4.10): decomposes an instruction plus conversation context into
//! an [`ExecutionTask`] DAG, with a single-task fallback when the LLM's JSON
//! response doesn't parse.

mod planner;

pub use planner::{AVAILABLE_AGENTS, AgentCapability, Planner};
