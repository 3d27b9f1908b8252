//! `taskstore`: generic SQLite+JSONL persistence shared by `taskdaemon` and
//! `contextstore`.
//!
//! Any type implementing [`Record`] can be stored, filtered, and retrieved
//! through a single [`Store`] handle without either crate needing its own
//! bespoke persistence layer. The store keeps one SQLite table per
//! collection for queryable access and mirrors every write to a JSONL file
//! of the same name for a human-diffable audit trail.

pub mod error;
pub mod record;
pub mod store;

pub use error::{Result, StoreError};
pub use record::{Filter, FilterOp, IndexValue, Record, matches_filters, now_ms};
pub use store::Store;
