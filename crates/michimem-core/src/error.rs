//! Error types for the memory store.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the Store. All are fatal with respect to the caller;
/// the Store makes no attempt at partial recovery.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("memory not found: {0}")]
    NotFound(Uuid),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store init failed: {0}")]
    Init(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
