//! Error kinds for the memory subsystem, per §7 of the design: each variant
//! carries its own propagation policy, enforced by callers rather than by
//! this type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("edge endpoint not found: {0}")]
    DanglingEdgeEndpoint(String),

    #[error("self-loop rejected for node {0}")]
    SelfLoop(String),

    #[error("hot local store unavailable: {0}")]
    PersistedStoreUnavailable(String),

    #[error("durable remote store unavailable: {0}")]
    DurableStoreUnavailable(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schema validation failed: {0}")]
    SchemaValidationFailure(String),

    #[error("taskstore error: {0}")]
    Store(#[from] taskstore::StoreError),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
