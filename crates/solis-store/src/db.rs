use rusqlite::{Connection, Result};

/// Initialise all tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_leads(conn)?;
    create_conversations(conn)?;
    create_messages(conn)?;
    create_agent_sessions(conn)?;
    create_follow_ups(conn)?;
    create_calendar_events(conn)?;
    create_analytics(conn)?;
    Ok(())
}

fn create_leads(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS leads (
            id              TEXT PRIMARY KEY,
            phone           TEXT NOT NULL,
            display_name    TEXT,
            email           TEXT,
            stage           TEXT NOT NULL DEFAULT 'initial',
            solution        TEXT NOT NULL DEFAULT 'unknown',
            bill_amount     REAL,
            competitor_name TEXT,
            competitor_discount_pct REAL,
            score           INTEGER NOT NULL DEFAULT 0,
            temperature     TEXT NOT NULL DEFAULT 'cold',
            crm_external_id TEXT,
            deleted         INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_leads_phone ON leads(phone);
        CREATE INDEX IF NOT EXISTS idx_leads_stage ON leads(stage);",
    )
}

fn create_conversations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id               TEXT PRIMARY KEY,
            lead_id          TEXT NOT NULL REFERENCES leads(id),
            session_id       TEXT NOT NULL,
            state            TEXT NOT NULL DEFAULT 'active',
            follow_up_count  INTEGER NOT NULL DEFAULT 0,
            message_count    INTEGER NOT NULL DEFAULT 0,
            last_activity_at TEXT NOT NULL,
            created_at       TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_conv_lead ON conversations(lead_id);",
    )
}

fn create_messages(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            seq             INTEGER NOT NULL,
            direction       TEXT NOT NULL,
            content_type    TEXT NOT NULL,
            content         TEXT NOT NULL,
            gateway_message_id TEXT,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_msg_conv ON messages(conversation_id, seq);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_msg_gateway_id
            ON messages(gateway_message_id)
            WHERE gateway_message_id IS NOT NULL;",
    )
}

fn create_agent_sessions(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS agent_sessions (
            conversation_id TEXT PRIMARY KEY REFERENCES conversations(id),
            turns_json      TEXT NOT NULL DEFAULT '[]',
            slots_json      TEXT NOT NULL DEFAULT '{}',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );",
    )
}

fn create_follow_ups(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS follow_ups (
            id            TEXT PRIMARY KEY,
            lead_id       TEXT NOT NULL REFERENCES leads(id),
            kind          TEXT NOT NULL,
            status        TEXT NOT NULL DEFAULT 'pending',
            due_at        TEXT NOT NULL,
            template_key  TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_error    TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fu_due ON follow_ups(status, due_at);
        CREATE INDEX IF NOT EXISTS idx_fu_lead ON follow_ups(lead_id, status);",
    )
}

fn create_calendar_events(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS calendar_events (
            id                TEXT PRIMARY KEY,
            lead_id           TEXT NOT NULL REFERENCES leads(id),
            external_event_id TEXT NOT NULL,
            start_at          TEXT NOT NULL,
            end_at            TEXT NOT NULL,
            attendee_emails   TEXT NOT NULL DEFAULT '[]',
            status            TEXT NOT NULL DEFAULT 'confirmed',
            reminder_24h_sent INTEGER NOT NULL DEFAULT 0,
            reminder_2h_sent  INTEGER NOT NULL DEFAULT 0,
            reminder_30m_sent INTEGER NOT NULL DEFAULT 0,
            reminder_24h_attempts INTEGER NOT NULL DEFAULT 0,
            reminder_2h_attempts  INTEGER NOT NULL DEFAULT 0,
            reminder_30m_attempts INTEGER NOT NULL DEFAULT 0,
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cal_lead ON calendar_events(lead_id, status);
        CREATE INDEX IF NOT EXISTS idx_cal_start ON calendar_events(status, start_at);",
    )
}

fn create_analytics(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS analytics_events (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            kind       TEXT NOT NULL,
            lead_id    TEXT,
            payload    TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_analytics_kind ON analytics_events(kind, created_at);",
    )
}
