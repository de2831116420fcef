//! # michimem-core
//!
//! Persistent memory store for an interactive assistant: durable records
//! with full-text search (C1: [`store`]), transcript-derived candidate
//! records (C2: [`extractor`]), session-resume snapshots (C3:
//! [`checkpointer`]), token-budgeted retrieval tiers (C4: [`tiering`]), and
//! the expiry/archival/synthesis engine that compounds short-lived records
//! into longer-lived ones (C5: [`lifecycle`]).
//!
//! This crate is pure with respect to the database it owns: no network I/O,
//! no host-event handling, no tool-protocol framing. Those live in
//! `michimem-mcp`, which borrows [`store::Store`] for the duration of a call.

pub mod checkpointer;
pub mod config;
pub mod error;
pub mod extractor;
pub mod lifecycle;
pub mod migrations;
pub mod model;
pub mod store;
pub mod tiering;
pub mod transcript;

pub use checkpointer::{create_checkpoint, get_latest_checkpoint};
pub use config::Config;
pub use error::{Result, StoreError};
pub use extractor::{extract, Extraction};
pub use lifecycle::{group_by_overlap, run_compounding, run_lifecycle, CompoundingSummary, LifecycleSummary};
pub use model::{Checkpoint, Memory, MemoryInput, MemoryType, MemoryUpdate, SearchHit, Stats, TieredResult};
pub use store::Store;
pub use tiering::{build_l0, build_l0_context, build_l1, build_l2, build_restore_context, estimate_tokens};
pub use transcript::Message;

/// Crate version, exposed for server info / diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        build_l0, build_l0_context, build_l1, build_l2, build_restore_context, create_checkpoint,
        estimate_tokens, extract, get_latest_checkpoint, group_by_overlap, run_compounding,
        run_lifecycle, Checkpoint, CompoundingSummary, Config, Extraction, LifecycleSummary, Memory,
        MemoryInput, MemoryType, MemoryUpdate, Result, SearchHit, Stats, Store, StoreError,
        TieredResult,
    };
}
