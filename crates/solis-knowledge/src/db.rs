use rusqlite::{Connection, Result};

/// Initialise knowledge tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_chunks_table(conn)?;
    create_fts_index(conn)?;
    Ok(())
}

fn create_chunks_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS knowledge_chunks (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            chunk_id   TEXT NOT NULL,
            topic_key  TEXT NOT NULL,
            question   TEXT NOT NULL,
            synonyms   TEXT NOT NULL DEFAULT '[]',
            answer     TEXT NOT NULL,
            category   TEXT,
            tags       TEXT NOT NULL DEFAULT '[]',
            embedding  BLOB,
            text_hash  TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_chunk_topic
            ON knowledge_chunks(topic_key);",
    )
}

/// FTS5 virtual table over question/synonyms/answer.
/// content-linked to knowledge_chunks — synced manually on write.
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_fts
            USING fts5(question, synonyms, answer,
                       content='knowledge_chunks', content_rowid='id');",
    )
}
