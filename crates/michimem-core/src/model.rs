//! Core entities: Memory, Checkpoint, Metric, and the aggregates derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The four kinds of record the store recognizes. Conventionally paired with
/// a priority (diary=2, insight=1, knowledge/shared=0) but the two dimensions
/// are independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Diary,
    Insight,
    Knowledge,
    Shared,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Diary => "diary",
            MemoryType::Insight => "insight",
            MemoryType::Knowledge => "knowledge",
            MemoryType::Shared => "shared",
        }
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "diary" => Ok(MemoryType::Diary),
            "insight" => Ok(MemoryType::Insight),
            "knowledge" => Ok(MemoryType::Knowledge),
            "shared" => Ok(MemoryType::Shared),
            other => Err(format!("unknown memory type: {other}")),
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The primary persisted entity. See module docs for field semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub priority: u8,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub tags: Vec<String>,
    pub agent_id: String,
    pub source_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Input to `Store::insert`. Timestamps and id are assigned by the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryInput {
    pub memory_type: Option<MemoryType>,
    pub priority: u8,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub tags: Vec<String>,
    pub agent_id: String,
    pub source_ids: Vec<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl MemoryInput {
    pub fn new(memory_type: MemoryType, priority: u8, title: impl Into<String>) -> Self {
        Self {
            memory_type: Some(memory_type),
            priority,
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Partial update to an existing Memory. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct MemoryUpdate {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub priority: Option<u8>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
}

/// A search hit: the record plus the FTS5 rank (lower is better, opaque
/// beyond comparability within one search call).
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub memory: Memory,
    pub rank: f64,
}

/// Aggregate counts returned by `Store::stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub total: i64,
    pub by_type: std::collections::BTreeMap<String, i64>,
    pub by_priority: std::collections::BTreeMap<u8, i64>,
    pub expired: i64,
}

/// A session-resume snapshot, written before the host compacts its context.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Checkpoint {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub current_task: String,
    pub decisions: Vec<String>,
    pub files_modified: Vec<String>,
    pub corrections: Vec<String>,
    pub context_summary: String,
}

/// A single rendered unit produced by the tiering pipeline.
#[derive(Debug, Clone)]
pub struct TieredResult {
    pub id: Uuid,
    pub text: String,
}
