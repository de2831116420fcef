//! The Store (C1): durable persistence of Memories and Metrics, full-text
//! search, and the derived aggregates the rest of the system is built on.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::migrations::apply_migrations;
use crate::model::{Memory, MemoryInput, MemoryType, MemoryUpdate, SearchHit, Stats};

/// Owns the database file for the lifetime of the process. One writer
/// connection and one reader connection, each behind its own mutex, so
/// `Store` is `Send + Sync` without wrapping it in `Arc<Mutex<Store>>`.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    data_dir: PathBuf,
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}

#[cfg(unix)]
fn harden_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn harden_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

impl Store {
    /// Open (creating if absent) the store rooted at `data_dir`. Creates the
    /// reserved subdirectories from the persisted state layout and applies
    /// pending migrations on the writer connection only.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        harden_permissions(data_dir, 0o700)?;

        for sub in ["checkpoints", "archive"] {
            std::fs::create_dir_all(data_dir.join(sub))?;
        }
        for kind in ["diary", "insights", "knowledge", "shared"] {
            std::fs::create_dir_all(data_dir.join("memories").join(kind))?;
        }

        let db_path = data_dir.join("index.db");
        let db_existed = db_path.exists();

        let mut writer = Connection::open(&db_path)?;
        configure_connection(&writer)?;
        apply_migrations(&mut writer)?;

        let reader = Connection::open(&db_path)?;
        configure_connection(&reader)?;

        if !db_existed {
            harden_permissions(&db_path, 0o600)?;
        }

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn insert(&self, input: MemoryInput) -> Result<Memory> {
        let now = Utc::now();
        let memory = Memory {
            id: Uuid::new_v4(),
            memory_type: input.memory_type.unwrap_or(MemoryType::Knowledge),
            priority: input.priority,
            title: input.title,
            summary: input.summary,
            content: input.content,
            tags: input.tags,
            agent_id: input.agent_id,
            source_ids: input.source_ids,
            created_at: now,
            updated_at: now,
            expires_at: input.expires_at,
        };

        let conn = self.writer.lock().expect("writer mutex poisoned");
        conn.execute(
            "INSERT INTO memories
                (id, type, priority, title, summary, content, tags, agent_id, source_ids,
                 created_at, updated_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                memory.id.to_string(),
                memory.memory_type.as_str(),
                memory.priority,
                memory.title,
                memory.summary,
                memory.content,
                serde_json::to_string(&memory.tags)?,
                memory.agent_id,
                serde_json::to_string(&memory.source_ids)?,
                memory.created_at.to_rfc3339(),
                memory.updated_at.to_rfc3339(),
                memory.expires_at.map(|ts| ts.to_rfc3339()),
            ],
        )?;

        Ok(memory)
    }

    pub fn get_by_id(&self, id: Uuid) -> Result<Option<Memory>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        conn.query_row(
            "SELECT id, type, priority, title, summary, content, tags, agent_id, source_ids,
                    created_at, updated_at, expires_at
             FROM memories WHERE id = ?1",
            params![id.to_string()],
            row_to_memory,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Native FTS5 query syntax (phrases, boolean operators, prefix `*`).
    /// Results ordered by rank ascending (best match first).
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT m.id, m.type, m.priority, m.title, m.summary, m.content, m.tags,
                    m.agent_id, m.source_ids, m.created_at, m.updated_at, m.expires_at,
                    memories_fts.rank AS rank
             FROM memories_fts
             JOIN memories m ON m.id = memories_fts.id
             WHERE memories_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], |row| {
            let memory = row_to_memory(row)?;
            let rank: f64 = row.get(12)?;
            Ok(SearchHit { memory, rank })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    pub fn get_by_type(&self, memory_type: MemoryType, limit: usize) -> Result<Vec<Memory>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, type, priority, title, summary, content, tags, agent_id, source_ids,
                    created_at, updated_at, expires_at
             FROM memories WHERE type = ?1 ORDER BY updated_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![memory_type.as_str(), limit as i64], row_to_memory)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    pub fn get_by_priority(&self, priority: u8, limit: usize) -> Result<Vec<Memory>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, type, priority, title, summary, content, tags, agent_id, source_ids,
                    created_at, updated_at, expires_at
             FROM memories WHERE priority = ?1 ORDER BY updated_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![priority, limit as i64], row_to_memory)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    pub fn get_expired(&self) -> Result<Vec<Memory>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let now = Utc::now().to_rfc3339();
        let mut stmt = conn.prepare(
            "SELECT id, type, priority, title, summary, content, tags, agent_id, source_ids,
                    created_at, updated_at, expires_at
             FROM memories WHERE expires_at IS NOT NULL AND expires_at < ?1",
        )?;
        let rows = stmt.query_map(params![now], row_to_memory)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    /// Diaries whose id does not appear in any insight's `source_ids`,
    /// oldest first. See the design-notes open question: knowledge
    /// `source_ids` are deliberately not consulted here.
    pub fn get_unprocessed_diaries(&self, limit: usize) -> Result<Vec<Memory>> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, type, priority, title, summary, content, tags, agent_id, source_ids,
                    created_at, updated_at, expires_at
             FROM memories
             WHERE type = 'diary'
               AND id NOT IN (
                   SELECT je.value
                   FROM memories i, json_each(i.source_ids) je
                   WHERE i.type = 'insight'
               )
             ORDER BY created_at ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_memory)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::from)
    }

    /// Partial update. Returns whether a row changed. Note: changing
    /// `priority` does not recompute `expires_at` — see design notes.
    pub fn update(&self, id: Uuid, update: MemoryUpdate) -> Result<bool> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        let existing: Option<Memory> = conn
            .query_row(
                "SELECT id, type, priority, title, summary, content, tags, agent_id, source_ids,
                        created_at, updated_at, expires_at
                 FROM memories WHERE id = ?1",
                params![id.to_string()],
                row_to_memory,
            )
            .optional()?;
        let Some(existing) = existing else {
            return Ok(false);
        };

        let title = update.title.unwrap_or(existing.title);
        let summary = update.summary.unwrap_or(existing.summary);
        let content = update.content.unwrap_or(existing.content);
        let tags = update.tags.unwrap_or(existing.tags);
        let priority = update.priority.unwrap_or(existing.priority);
        let expires_at = update.expires_at.unwrap_or(existing.expires_at);
        let updated_at = Utc::now();

        let changed = conn.execute(
            "UPDATE memories SET title = ?1, summary = ?2, content = ?3, tags = ?4,
                                  priority = ?5, expires_at = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                title,
                summary,
                content,
                serde_json::to_string(&tags)?,
                priority,
                expires_at.map(|ts| ts.to_rfc3339()),
                updated_at.to_rfc3339(),
                id.to_string(),
            ],
        )?;

        Ok(changed > 0)
    }

    pub fn delete(&self, id: Uuid) -> Result<bool> {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        let changed = conn.execute("DELETE FROM memories WHERE id = ?1", params![id.to_string()])?;
        Ok(changed > 0)
    }

    pub fn stats(&self) -> Result<Stats> {
        let conn = self.reader.lock().expect("reader mutex poisoned");
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;

        let mut by_type = std::collections::BTreeMap::new();
        let mut stmt = conn.prepare("SELECT type, COUNT(*) FROM memories GROUP BY type")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (key, count) = row?;
            by_type.insert(key, count);
        }

        let mut by_priority = std::collections::BTreeMap::new();
        let mut stmt = conn.prepare("SELECT priority, COUNT(*) FROM memories GROUP BY priority")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, u8>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (key, count) = row?;
            by_priority.insert(key, count);
        }

        let now = Utc::now().to_rfc3339();
        let expired: i64 = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE expires_at IS NOT NULL AND expires_at < ?1",
            params![now],
            |row| row.get(0),
        )?;

        Ok(Stats {
            total,
            by_type,
            by_priority,
            expired,
        })
    }

    /// Append-only; never fails the caller. Failures are logged and
    /// swallowed.
    pub fn record_metric(&self, event: &str, data: &Value) {
        let conn = self.writer.lock().expect("writer mutex poisoned");
        let payload = serde_json::to_string(data).unwrap_or_else(|_| "null".to_string());
        if let Err(err) = conn.execute(
            "INSERT INTO metrics (event, data, created_at) VALUES (?1, ?2, ?3)",
            params![event, payload, Utc::now().to_rfc3339()],
        ) {
            tracing::warn!(%event, error = %err, "failed to record metric");
        }
    }
}

fn parse_timestamp(raw: &str, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("invalid timestamp in {column}: {err}"),
                )),
            )
        })
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let id: String = row.get(0)?;
    let memory_type: String = row.get(1)?;
    let tags_json: String = row.get(6)?;
    let source_ids_json: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    let expires_at: Option<String> = row.get(11)?;

    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
    let source_id_strings: Vec<String> = serde_json::from_str(&source_ids_json).unwrap_or_default();
    let source_ids = source_id_strings
        .into_iter()
        .filter_map(|s| Uuid::parse_str(&s).ok())
        .collect();

    Ok(Memory {
        id: Uuid::parse_str(&id).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(err),
            )
        })?,
        memory_type: memory_type.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(1, "type".into(), rusqlite::types::Type::Text)
        })?,
        priority: row.get(2)?,
        title: row.get(3)?,
        summary: row.get(4)?,
        content: row.get(5)?,
        tags,
        agent_id: row.get(7)?,
        source_ids,
        created_at: parse_timestamp(&created_at, "created_at")?,
        updated_at: parse_timestamp(&updated_at, "updated_at")?,
        expires_at: expires_at
            .map(|raw| parse_timestamp(&raw, "expires_at"))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn insert_then_get_by_id_roundtrips() {
        let (store, _dir) = test_store();
        let mut input = MemoryInput::new(MemoryType::Knowledge, 0, "Use tabs");
        input.summary = "prefer tabs".into();
        input.content = "tabs over spaces".into();
        let memory = store.insert(input).unwrap();

        let fetched = store.get_by_id(memory.id).unwrap().unwrap();
        assert_eq!(fetched.title, "Use tabs");
        assert_eq!(fetched.expires_at, None);
    }

    #[test]
    fn search_reflects_insert_update_delete() {
        let (store, _dir) = test_store();
        let mut input = MemoryInput::new(MemoryType::Knowledge, 0, "Use tabs");
        input.summary = "prefer tabs".into();
        let memory = store.insert(input).unwrap();

        let hits = store.search("tabs", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.id, memory.id);

        store
            .update(
                memory.id,
                MemoryUpdate {
                    title: Some("Use spaces".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let hits = store.search("tabs", 5).unwrap();
        assert!(hits.is_empty(), "renamed title should drop from search for the old term");

        store.delete(memory.id).unwrap();
        let hits = store.search("spaces", 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn get_unprocessed_diaries_excludes_only_insight_consumed() {
        let (store, _dir) = test_store();
        let diary = store
            .insert(MemoryInput::new(MemoryType::Diary, 2, "Session: day one"))
            .unwrap();
        let mut insight_input = MemoryInput::new(MemoryType::Insight, 1, "Pattern: x");
        insight_input.source_ids = vec![diary.id];
        store.insert(insight_input).unwrap();

        let unprocessed = store.get_unprocessed_diaries(50).unwrap();
        assert!(unprocessed.iter().all(|m| m.id != diary.id));
    }

    #[test]
    fn get_expired_only_returns_past_expiry() {
        let (store, _dir) = test_store();
        let mut input = MemoryInput::new(MemoryType::Diary, 2, "Expired one");
        input.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let expired = store.insert(input).unwrap();

        let mut future = MemoryInput::new(MemoryType::Diary, 2, "Still alive");
        future.expires_at = Some(Utc::now() + chrono::Duration::days(1));
        store.insert(future).unwrap();

        let results = store.get_expired().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, expired.id);
    }

    #[test]
    fn update_priority_does_not_recompute_expiry() {
        let (store, _dir) = test_store();
        let input = MemoryInput::new(MemoryType::Diary, 2, "Some diary");
        let memory = store.insert(input).unwrap();
        assert!(memory.expires_at.is_none());

        store
            .update(
                memory.id,
                MemoryUpdate {
                    priority: Some(0),
                    ..Default::default()
                },
            )
            .unwrap();
        let fetched = store.get_by_id(memory.id).unwrap().unwrap();
        assert_eq!(fetched.priority, 0);
        assert!(fetched.expires_at.is_none());
    }

    #[test]
    fn record_metric_never_fails_caller() {
        let (store, _dir) = test_store();
        store.record_metric("stop_extract", &serde_json::json!({"ok": true}));
    }
}
