//! Schema migrations, applied in order against the writer connection at
//! startup. Each migration is one idempotent block of SQL executed inside a
//! transaction; the applied version is tracked in `schema_version`.

use rusqlite::Connection;

use crate::error::Result;

pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema: memories, memories_fts, metrics",
        up: r#"
            CREATE TABLE memories (
                id          TEXT PRIMARY KEY,
                type        TEXT NOT NULL,
                priority    INTEGER NOT NULL,
                title       TEXT NOT NULL,
                summary     TEXT NOT NULL,
                content     TEXT NOT NULL,
                tags        TEXT NOT NULL DEFAULT '[]',
                agent_id    TEXT NOT NULL DEFAULT '',
                source_ids  TEXT NOT NULL DEFAULT '[]',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                expires_at  TEXT
            );

            CREATE INDEX idx_memories_type ON memories(type);
            CREATE INDEX idx_memories_priority ON memories(priority);
            CREATE INDEX idx_memories_expires_at ON memories(expires_at);
            CREATE INDEX idx_memories_created_at ON memories(created_at);
            CREATE INDEX idx_memories_updated_at ON memories(updated_at);

            CREATE VIRTUAL TABLE memories_fts USING fts5(
                title,
                summary,
                content,
                tags,
                id UNINDEXED,
                content='',
                contentless_delete=1
            );

            CREATE TRIGGER memories_ai AFTER INSERT ON memories BEGIN
                INSERT INTO memories_fts(title, summary, content, tags, id)
                VALUES (new.title, new.summary, new.content, new.tags, new.id);
            END;

            CREATE TRIGGER memories_au AFTER UPDATE ON memories BEGIN
                DELETE FROM memories_fts WHERE id = old.id;
                INSERT INTO memories_fts(title, summary, content, tags, id)
                VALUES (new.title, new.summary, new.content, new.tags, new.id);
            END;

            CREATE TRIGGER memories_ad AFTER DELETE ON memories BEGIN
                DELETE FROM memories_fts WHERE id = old.id;
            END;

            CREATE TABLE metrics (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                event       TEXT NOT NULL,
                data        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_metrics_event ON metrics(event);
        "#,
    },
    Migration {
        version: 2,
        description: "rebuild memories_fts with the porter unicode61 tokenizer",
        up: r#"
            DROP TABLE memories_fts;

            CREATE VIRTUAL TABLE memories_fts USING fts5(
                title,
                summary,
                content,
                tags,
                id UNINDEXED,
                content='',
                contentless_delete=1,
                tokenize='porter unicode61'
            );

            INSERT INTO memories_fts(title, summary, content, tags, id)
            SELECT title, summary, content, tags, id FROM memories;
        "#,
    },
];

pub fn get_current_version(conn: &Connection) -> Result<i32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .unwrap_or(None);
    Ok(version.unwrap_or(0))
}

pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let current = get_current_version(conn)?;
    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        tracing::info!(version = migration.version, description = migration.description, "applying migration");
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up)?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )?;
        tx.commit()?;
    }
    Ok(())
}
