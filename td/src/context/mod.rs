//! Context Builder & Observer (§2): turns a Memory Manager query into text a
//! step/prompt can use, and republishes graph mutations as events a dashboard
//! or other consumer can subscribe to.

mod builder;
mod observer;

pub use builder::{ContextBuilder, ContextSection};
pub use observer::{GraphEvent, GraphObserver, spawn_graph_observer};
