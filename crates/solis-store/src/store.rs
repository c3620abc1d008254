//! Typed repositories over SQLite. All mutations go through here.
//!
//! Thread-safe: one `Mutex<Connection>` shared by the HTTP workers and the
//! background loops. Multi-step writes run inside a single transaction while
//! the mutex is held, which is what makes `claim_due` an at-most-once hand-off.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

use solis_core::types::{
    CalendarEventStatus, ContentType, ConversationId, ConversationState, FollowUpKind,
    FollowUpStatus, LeadId, MessageDirection, Phone, QualificationStage, SolutionChoice,
    Temperature,
};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::*;

pub struct Store {
    conn: Mutex<Connection>,
}

/// Outcome of [`Store::append_message`].
#[derive(Debug, Clone, Copy)]
pub struct AppendResult {
    pub seq: i64,
    /// `false` when the gateway id was already present (webhook replay).
    pub inserted: bool,
}

impl Store {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self::new(Connection::open(path).map_err(StoreError::Sqlite)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory().map_err(StoreError::Sqlite)?)
    }

    // ── Leads ─────────────────────────────────────────────────────────────────

    /// Create the lead (and its conversation) if the phone is unknown, then
    /// apply `patch`. Idempotent on phone: an empty patch after the first call
    /// is a no-op.
    pub fn upsert_lead_by_phone(&self, phone: &Phone, patch: LeadPatch) -> Result<Lead> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now();

        let existing: Option<String> = tx
            .query_row(
                "SELECT id FROM leads WHERE phone = ?1",
                [phone.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                if !patch.is_empty() {
                    apply_patch(&tx, &id, &patch, now)?;
                }
                id
            }
            None => {
                let id = LeadId::new().0;
                tx.execute(
                    "INSERT INTO leads (id, phone, stage, solution, score, temperature,
                                        deleted, created_at, updated_at)
                     VALUES (?1, ?2, 'initial', 'unknown', 0, 'cold', 0, ?3, ?3)",
                    params![id, phone.as_str(), ts(now)],
                )?;
                let conv_id = ConversationId::new().0;
                tx.execute(
                    "INSERT INTO conversations (id, lead_id, session_id, state,
                                                last_activity_at, created_at)
                     VALUES (?1, ?2, ?3, 'active', ?4, ?4)",
                    params![conv_id, id, Uuid::new_v4().to_string(), ts(now)],
                )?;
                info!(lead_id = %id, phone = %phone, "lead created");
                if !patch.is_empty() {
                    apply_patch(&tx, &id, &patch, now)?;
                }
                id
            }
        };

        let lead = tx.query_row("SELECT * FROM leads WHERE id = ?1", [&id], row_to_lead)?;
        tx.commit()?;
        Ok(lead)
    }

    pub fn get_lead(&self, id: &LeadId) -> Result<Lead> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM leads WHERE id = ?1", [id.as_str()], row_to_lead)
            .optional()?
            .ok_or_else(|| StoreError::LeadNotFound(id.to_string()))
    }

    pub fn get_lead_by_phone(&self, phone: &Phone) -> Result<Option<Lead>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM leads WHERE phone = ?1",
                [phone.as_str()],
                row_to_lead,
            )
            .optional()?)
    }

    pub fn update_lead(&self, id: &LeadId, patch: LeadPatch) -> Result<Lead> {
        let conn = self.conn.lock().unwrap();
        if !patch.is_empty() {
            apply_patch(&conn, id.as_str(), &patch, Utc::now())?;
        }
        conn.query_row("SELECT * FROM leads WHERE id = ?1", [id.as_str()], row_to_lead)
            .optional()?
            .ok_or_else(|| StoreError::LeadNotFound(id.to_string()))
    }

    /// Leads with no inbound activity since `cutoff` and a non-terminal stage.
    /// Candidates for the abandonment sweep.
    pub fn dormant_candidates(&self, cutoff: DateTime<Utc>) -> Result<Vec<Lead>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT l.* FROM leads l
             JOIN conversations c ON c.lead_id = l.id
             WHERE c.last_activity_at < ?1
               AND l.stage NOT IN ('scheduled','abandoned','won','lost')
               AND l.deleted = 0",
        )?;
        let rows = stmt.query_map([ts(cutoff)], row_to_lead)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Reengagements that never got through (input to the abandonment rule).
    ///
    /// A delivery-exhausted row is CANCELED with its last error recorded;
    /// invariant cleanups cancel without one, so `last_error` tells the two
    /// apart.
    pub fn count_failed_reengagements(&self, lead_id: &LeadId) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let n: u32 = conn.query_row(
            "SELECT COUNT(*) FROM follow_ups
             WHERE lead_id = ?1
               AND kind IN ('reengage_30m','reengage_24h','nurture')
               AND (status = 'failed'
                    OR (status = 'canceled' AND last_error IS NOT NULL))",
            [lead_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    // ── Conversations ─────────────────────────────────────────────────────────

    pub fn conversation_for_lead(&self, lead_id: &LeadId) -> Result<Conversation> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM conversations WHERE lead_id = ?1",
            [lead_id.as_str()],
            row_to_conversation,
        )
        .optional()?
        .ok_or_else(|| StoreError::ConversationNotFound(lead_id.to_string()))
    }

    pub fn touch_conversation(&self, id: &ConversationId, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET last_activity_at = ?1, state = 'active' WHERE id = ?2",
            params![ts(at), id.as_str()],
        )?;
        Ok(())
    }

    pub fn set_conversation_state(
        &self,
        id: &ConversationId,
        state: ConversationState,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE conversations SET state = ?1 WHERE id = ?2",
            params![state.to_string(), id.as_str()],
        )?;
        Ok(())
    }

    // ── Messages ──────────────────────────────────────────────────────────────

    /// Append a message and return its per-conversation sequence number plus
    /// whether a row was actually inserted.
    ///
    /// Replays of the same `gateway_message_id` do not append a second row —
    /// the existing row's sequence comes back with `inserted = false`.
    pub fn append_message(
        &self,
        conversation_id: &ConversationId,
        direction: MessageDirection,
        content_type: ContentType,
        content: &str,
        gateway_message_id: Option<&str>,
    ) -> Result<AppendResult> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        if let Some(gid) = gateway_message_id {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT seq FROM messages WHERE gateway_message_id = ?1",
                    [gid],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(seq) = existing {
                tx.commit()?;
                return Ok(AppendResult {
                    seq,
                    inserted: false,
                });
            }
        }

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
            [conversation_id.as_str()],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO messages (conversation_id, seq, direction, content_type,
                                   content, gateway_message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                conversation_id.as_str(),
                seq,
                direction.to_string(),
                content_type.to_string(),
                content,
                gateway_message_id,
                ts(Utc::now()),
            ],
        )?;
        tx.execute(
            "UPDATE conversations SET message_count = message_count + 1 WHERE id = ?1",
            [conversation_id.as_str()],
        )?;
        tx.commit()?;
        Ok(AppendResult {
            seq,
            inserted: true,
        })
    }

    /// Most recent `limit` messages in chronological order.
    pub fn history(&self, conversation_id: &ConversationId, limit: usize) -> Result<Vec<MessageRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, seq, direction, content_type, content,
                    gateway_message_id, created_at
             FROM messages WHERE conversation_id = ?1
             ORDER BY seq DESC LIMIT ?2",
        )?;
        let mut msgs: Vec<MessageRecord> = stmt
            .query_map(params![conversation_id.as_str(), limit], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        msgs.reverse();
        Ok(msgs)
    }

    // ── Agent sessions ────────────────────────────────────────────────────────

    /// Load the session for a conversation, creating an empty one if absent.
    pub fn load_session(&self, conversation_id: &ConversationId) -> Result<AgentSession> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String, String, String)> = conn
            .query_row(
                "SELECT turns_json, slots_json, created_at, updated_at
                 FROM agent_sessions WHERE conversation_id = ?1",
                [conversation_id.as_str()],
                |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                },
            )
            .optional()?;

        match row {
            Some((turns_json, slots_json, created_at, updated_at)) => Ok(AgentSession {
                conversation_id: conversation_id.clone(),
                turns: serde_json::from_str(&turns_json)?,
                slots: serde_json::from_str(&slots_json)?,
                created_at: parse_ts("agent_sessions.created_at", &created_at)?,
                updated_at: parse_ts("agent_sessions.updated_at", &updated_at)?,
            }),
            None => Ok(AgentSession::new(conversation_id.clone())),
        }
    }

    /// Persist the session (upsert). Callers trim before saving.
    pub fn save_session(&self, session: &AgentSession) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO agent_sessions (conversation_id, turns_json, slots_json,
                                         created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(conversation_id) DO UPDATE SET
                turns_json = excluded.turns_json,
                slots_json = excluded.slots_json,
                updated_at = excluded.updated_at",
            params![
                session.conversation_id.as_str(),
                serde_json::to_string(&session.turns)?,
                serde_json::to_string(&session.slots)?,
                ts(session.created_at),
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    // ── Follow-ups ────────────────────────────────────────────────────────────

    pub fn schedule_follow_up(
        &self,
        lead_id: &LeadId,
        kind: FollowUpKind,
        due_at: DateTime<Utc>,
        template_key: &str,
    ) -> Result<FollowUp> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO follow_ups (id, lead_id, kind, status, due_at, template_key,
                                     attempt_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5, 0, ?6, ?6)",
            params![
                id,
                lead_id.as_str(),
                kind.to_string(),
                ts(due_at),
                template_key,
                ts(now),
            ],
        )?;
        conn.execute(
            "UPDATE conversations SET follow_up_count = follow_up_count + 1
             WHERE lead_id = ?1",
            [lead_id.as_str()],
        )?;
        info!(follow_up_id = %id, lead_id = %lead_id, %kind, "follow-up scheduled");
        Ok(FollowUp {
            id,
            lead_id: lead_id.clone(),
            kind,
            status: FollowUpStatus::Pending,
            due_at,
            template_key: template_key.to_string(),
            attempt_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn has_pending_reengagement(&self, lead_id: &LeadId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n: u32 = conn.query_row(
            "SELECT COUNT(*) FROM follow_ups
             WHERE lead_id = ?1 AND status IN ('pending','claimed')
               AND kind IN ('reengage_30m','reengage_24h','nurture')",
            [lead_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Atomically claim up to `batch` due PENDING rows (PENDING → CLAIMED).
    ///
    /// SQLite's equivalent of `FOR UPDATE SKIP LOCKED`: select-and-mark inside
    /// one transaction under the connection mutex. A row handed out here is
    /// invisible to peer workers until it is sent, failed, or re-queued.
    pub fn claim_due(&self, now: DateTime<Utc>, batch: usize) -> Result<Vec<FollowUp>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let due: Vec<FollowUp> = {
            let mut stmt = tx.prepare_cached(
                "SELECT id, lead_id, kind, status, due_at, template_key,
                        attempt_count, last_error, created_at, updated_at
                 FROM follow_ups
                 WHERE status = 'pending' AND due_at <= ?1
                 ORDER BY due_at LIMIT ?2",
            )?;
            let rows: Vec<FollowUp> = stmt
                .query_map(params![ts(now), batch], row_to_follow_up)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        };

        for fu in &due {
            tx.execute(
                "UPDATE follow_ups SET status = 'claimed', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![ts(now), fu.id],
            )?;
        }
        tx.commit()?;
        Ok(due)
    }

    /// CLAIMED → SENT. The terminal transition happens exactly once.
    pub fn mark_sent(&self, id: &str) -> Result<()> {
        self.finish_follow_up(id, FollowUpStatus::Sent, None)
    }

    /// Record a send failure. Below `max_attempts` the row passes through
    /// FAILED and back to PENDING for the next tick; the attempt that hits
    /// the cap cancels the row for good.
    pub fn record_failure(&self, id: &str, error: &str, max_attempts: u32) -> Result<FollowUpStatus> {
        let conn = self.conn.lock().unwrap();
        let attempts: u32 = conn
            .query_row(
                "SELECT attempt_count FROM follow_ups WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::FollowUpNotFound(id.to_string()))?;

        let new_attempts = attempts + 1;
        let status = if new_attempts >= max_attempts {
            FollowUpStatus::Canceled
        } else {
            FollowUpStatus::Pending
        };
        conn.execute(
            "UPDATE follow_ups SET status = ?1, attempt_count = ?2, last_error = ?3,
                                   updated_at = ?4
             WHERE id = ?5",
            params![status.to_string(), new_attempts, error, ts(Utc::now()), id],
        )?;
        if status == FollowUpStatus::Canceled {
            warn!(follow_up_id = %id, attempts = new_attempts, "follow-up canceled after repeated failures");
        }
        Ok(status)
    }

    /// Push a claimed row's due time forward (quiet hours) and re-queue it.
    pub fn defer(&self, id: &str, due_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE follow_ups SET status = 'pending', due_at = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'claimed'",
            params![ts(due_at), ts(Utc::now()), id],
        )?;
        if n == 0 {
            return Err(StoreError::FollowUpNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn cancel_follow_up(&self, id: &str) -> Result<()> {
        self.finish_follow_up(id, FollowUpStatus::Canceled, None)
    }

    /// Cancel every open reengagement for a lead (invariant: terminal stages
    /// carry no pending reengagement).
    pub fn cancel_reengagements(&self, lead_id: &LeadId) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE follow_ups SET status = 'canceled', updated_at = ?1
             WHERE lead_id = ?2 AND status IN ('pending','claimed')
               AND kind IN ('reengage_30m','reengage_24h','nurture')",
            params![ts(Utc::now()), lead_id.as_str()],
        )?;
        Ok(n)
    }

    /// Cancel every open follow-up for a lead (operator CLI).
    pub fn cancel_open_follow_ups(&self, lead_id: &LeadId) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE follow_ups SET status = 'canceled', updated_at = ?1
             WHERE lead_id = ?2 AND status IN ('pending','claimed')",
            params![ts(Utc::now()), lead_id.as_str()],
        )?;
        Ok(n)
    }

    /// Startup sweep: rows claimed by a previous process go back to PENDING.
    pub fn requeue_claimed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE follow_ups SET status = 'pending', updated_at = ?1
             WHERE status = 'claimed'",
            [ts(Utc::now())],
        )?;
        if n > 0 {
            warn!(count = n, "follow-ups re-queued on startup");
        }
        Ok(n)
    }

    fn finish_follow_up(
        &self,
        id: &str,
        status: FollowUpStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE follow_ups SET status = ?1, last_error = ?2, updated_at = ?3
             WHERE id = ?4 AND status IN ('pending','claimed')",
            params![status.to_string(), error, ts(Utc::now()), id],
        )?;
        if n == 0 {
            return Err(StoreError::FollowUpNotFound(id.to_string()));
        }
        Ok(())
    }

    // ── Calendar events ───────────────────────────────────────────────────────

    pub fn insert_event(&self, ev: &CalendarEventRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO calendar_events
               (id, lead_id, external_event_id, start_at, end_at, attendee_emails,
                status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                ev.id,
                ev.lead_id.as_str(),
                ev.external_event_id,
                ts(ev.start_at),
                ts(ev.end_at),
                serde_json::to_string(&ev.attendee_emails)?,
                ev.status.to_string(),
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// The lead's single non-terminal event, if any.
    pub fn active_event_for_lead(&self, lead_id: &LeadId) -> Result<Option<CalendarEventRecord>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT * FROM calendar_events
                 WHERE lead_id = ?1 AND status = 'confirmed'
                 ORDER BY start_at LIMIT 1",
                [lead_id.as_str()],
                row_to_event,
            )
            .optional()?)
    }

    pub fn set_event_status(&self, id: &str, status: CalendarEventStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE calendar_events SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_string(), ts(Utc::now()), id],
        )?;
        if n == 0 {
            return Err(StoreError::EventNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn update_event_window(
        &self,
        id: &str,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        // A moved meeting re-arms the reminders for the new window.
        let n = conn.execute(
            "UPDATE calendar_events
             SET start_at = ?1, end_at = ?2,
                 reminder_24h_sent = 0, reminder_2h_sent = 0, reminder_30m_sent = 0,
                 reminder_24h_attempts = 0, reminder_2h_attempts = 0, reminder_30m_attempts = 0,
                 updated_at = ?3
             WHERE id = ?4",
            params![ts(start_at), ts(end_at), ts(Utc::now()), id],
        )?;
        if n == 0 {
            return Err(StoreError::EventNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn set_event_attendees(&self, id: &str, emails: &[String]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE calendar_events SET attendee_emails = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(emails)?, ts(Utc::now()), id],
        )?;
        Ok(())
    }

    /// All CONFIRMED events that have not ended yet (reminder + sync loops).
    pub fn confirmed_events(&self, now: DateTime<Utc>) -> Result<Vec<CalendarEventRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM calendar_events
             WHERE status = 'confirmed' AND end_at >= ?1
             ORDER BY start_at",
        )?;
        let rows = stmt.query_map([ts(now)], row_to_event)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// CONFIRMED events whose start time is already behind us (missed-meeting
    /// policy input).
    pub fn overdue_events(&self, now: DateTime<Utc>) -> Result<Vec<CalendarEventRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM calendar_events
             WHERE status = 'confirmed' AND end_at < ?1
             ORDER BY start_at",
        )?;
        let rows = stmt.query_map([ts(now)], row_to_event)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Set the sent flag for one reminder slot. Done before the success mark
    /// so a crash between flag and send can only under-deliver, never double.
    pub fn set_reminder_sent(&self, id: &str, slot: ReminderSlot) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "UPDATE calendar_events SET {}_sent = 1, updated_at = ?1 WHERE id = ?2",
            slot.column()
        );
        let n = conn.execute(&sql, params![ts(Utc::now()), id])?;
        if n == 0 {
            return Err(StoreError::EventNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Increment the attempt counter for a reminder slot; returns the new count.
    pub fn record_reminder_attempt(&self, id: &str, slot: ReminderSlot) -> Result<u32> {
        let conn = self.conn.lock().unwrap();
        let col = slot.column();
        let sql = format!(
            "UPDATE calendar_events SET {col}_attempts = {col}_attempts + 1, updated_at = ?1
             WHERE id = ?2"
        );
        let n = conn.execute(&sql, params![ts(Utc::now()), id])?;
        if n == 0 {
            return Err(StoreError::EventNotFound(id.to_string()));
        }
        let sql = format!("SELECT {col}_attempts FROM calendar_events WHERE id = ?1");
        Ok(conn.query_row(&sql, [id], |row| row.get(0))?)
    }

    // ── Analytics ─────────────────────────────────────────────────────────────

    pub fn record_event(
        &self,
        kind: &str,
        lead_id: Option<&LeadId>,
        payload: serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO analytics_events (kind, lead_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                kind,
                lead_id.map(|l| l.as_str()),
                payload.to_string(),
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }
}

// ── Row mappers & helpers ─────────────────────────────────────────────────────

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_ts(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt {
            column: column.to_string(),
            value: value.to_string(),
        })
}

fn parse_enum<T: std::str::FromStr>(column: &str, value: String) -> rusqlite::Result<T> {
    value.parse().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("bad {column}: {value}").into(),
        )
    })
}

fn row_to_lead(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lead> {
    Ok(Lead {
        id: LeadId(row.get::<_, String>("id")?),
        phone: Phone(row.get::<_, String>("phone")?),
        display_name: row.get("display_name")?,
        email: row.get("email")?,
        stage: parse_enum::<QualificationStage>("stage", row.get("stage")?)?,
        solution: parse_enum::<SolutionChoice>("solution", row.get("solution")?)?,
        bill_amount: row.get("bill_amount")?,
        competitor_name: row.get("competitor_name")?,
        competitor_discount_pct: row.get("competitor_discount_pct")?,
        score: row.get::<_, i64>("score")?.clamp(0, 100) as u8,
        temperature: parse_enum::<Temperature>("temperature", row.get("temperature")?)?,
        crm_external_id: row.get("crm_external_id")?,
        deleted: row.get::<_, i64>("deleted")? != 0,
        created_at: rfc3339(row, "created_at")?,
        updated_at: rfc3339(row, "updated_at")?,
    })
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: ConversationId(row.get::<_, String>("id")?),
        lead_id: LeadId(row.get::<_, String>("lead_id")?),
        session_id: row.get("session_id")?,
        state: parse_enum::<ConversationState>("state", row.get("state")?)?,
        follow_up_count: row.get("follow_up_count")?,
        message_count: row.get("message_count")?,
        last_activity_at: rfc3339(row, "last_activity_at")?,
        created_at: rfc3339(row, "created_at")?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get("id")?,
        conversation_id: ConversationId(row.get::<_, String>("conversation_id")?),
        seq: row.get("seq")?,
        direction: parse_enum::<MessageDirection>("direction", row.get("direction")?)?,
        content_type: parse_enum::<ContentType>("content_type", row.get("content_type")?)?,
        content: row.get("content")?,
        gateway_message_id: row.get("gateway_message_id")?,
        created_at: rfc3339(row, "created_at")?,
    })
}

fn row_to_follow_up(row: &rusqlite::Row<'_>) -> rusqlite::Result<FollowUp> {
    Ok(FollowUp {
        id: row.get("id")?,
        lead_id: LeadId(row.get::<_, String>("lead_id")?),
        kind: parse_enum::<FollowUpKind>("kind", row.get("kind")?)?,
        status: parse_enum::<FollowUpStatus>("status", row.get("status")?)?,
        due_at: rfc3339(row, "due_at")?,
        template_key: row.get("template_key")?,
        attempt_count: row.get("attempt_count")?,
        last_error: row.get("last_error")?,
        created_at: rfc3339(row, "created_at")?,
        updated_at: rfc3339(row, "updated_at")?,
    })
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<CalendarEventRecord> {
    let emails_json: String = row.get("attendee_emails")?;
    let attendee_emails: Vec<String> = serde_json::from_str(&emails_json).unwrap_or_default();
    Ok(CalendarEventRecord {
        id: row.get("id")?,
        lead_id: LeadId(row.get::<_, String>("lead_id")?),
        external_event_id: row.get("external_event_id")?,
        start_at: rfc3339(row, "start_at")?,
        end_at: rfc3339(row, "end_at")?,
        attendee_emails,
        status: parse_enum::<CalendarEventStatus>("status", row.get("status")?)?,
        reminder_24h_sent: row.get::<_, i64>("reminder_24h_sent")? != 0,
        reminder_2h_sent: row.get::<_, i64>("reminder_2h_sent")? != 0,
        reminder_30m_sent: row.get::<_, i64>("reminder_30m_sent")? != 0,
        reminder_24h_attempts: row.get("reminder_24h_attempts")?,
        reminder_2h_attempts: row.get("reminder_2h_attempts")?,
        reminder_30m_attempts: row.get("reminder_30m_attempts")?,
        created_at: rfc3339(row, "created_at")?,
        updated_at: rfc3339(row, "updated_at")?,
    })
}

fn rfc3339(row: &rusqlite::Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("bad timestamp in {column}: {e}").into(),
            )
        })
}

fn apply_patch<C: std::ops::Deref<Target = Connection>>(
    conn: &C,
    lead_id: &str,
    patch: &LeadPatch,
    now: DateTime<Utc>,
) -> Result<()> {
    // Each provided field is its own UPDATE; the caller wraps in a transaction
    // when atomicity across fields matters.
    if let Some(ref v) = patch.display_name {
        conn.execute(
            "UPDATE leads SET display_name = ?1, updated_at = ?2 WHERE id = ?3",
            params![v, ts(now), lead_id],
        )?;
    }
    if let Some(ref v) = patch.email {
        conn.execute(
            "UPDATE leads SET email = ?1, updated_at = ?2 WHERE id = ?3",
            params![v, ts(now), lead_id],
        )?;
    }
    if let Some(v) = patch.stage {
        conn.execute(
            "UPDATE leads SET stage = ?1, updated_at = ?2 WHERE id = ?3",
            params![v.to_string(), ts(now), lead_id],
        )?;
    }
    if let Some(v) = patch.solution {
        conn.execute(
            "UPDATE leads SET solution = ?1, updated_at = ?2 WHERE id = ?3",
            params![v.to_string(), ts(now), lead_id],
        )?;
    }
    if let Some(v) = patch.bill_amount {
        conn.execute(
            "UPDATE leads SET bill_amount = ?1, updated_at = ?2 WHERE id = ?3",
            params![v, ts(now), lead_id],
        )?;
    }
    if let Some(ref v) = patch.competitor_name {
        conn.execute(
            "UPDATE leads SET competitor_name = ?1, updated_at = ?2 WHERE id = ?3",
            params![v, ts(now), lead_id],
        )?;
    }
    if let Some(v) = patch.competitor_discount_pct {
        conn.execute(
            "UPDATE leads SET competitor_discount_pct = ?1, updated_at = ?2 WHERE id = ?3",
            params![v, ts(now), lead_id],
        )?;
    }
    if let Some(v) = patch.score {
        conn.execute(
            "UPDATE leads SET score = ?1, updated_at = ?2 WHERE id = ?3",
            params![v.min(100), ts(now), lead_id],
        )?;
    }
    if let Some(v) = patch.temperature {
        conn.execute(
            "UPDATE leads SET temperature = ?1, updated_at = ?2 WHERE id = ?3",
            params![v.to_string(), ts(now), lead_id],
        )?;
    }
    if let Some(ref v) = patch.crm_external_id {
        conn.execute(
            "UPDATE leads SET crm_external_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![v, ts(now), lead_id],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> Store {
        Store::in_memory().unwrap()
    }

    fn phone() -> Phone {
        Phone::new("+5581999999999")
    }

    #[test]
    fn upsert_creates_lead_and_conversation_once() {
        let s = store();
        let a = s.upsert_lead_by_phone(&phone(), LeadPatch::default()).unwrap();
        let b = s.upsert_lead_by_phone(&phone(), LeadPatch::default()).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.stage, QualificationStage::Initial);
        assert!(s.conversation_for_lead(&a.id).is_ok());
    }

    #[test]
    fn absent_optional_ids_are_sql_null_not_the_string_none() {
        let s = store();
        let lead = s.upsert_lead_by_phone(&phone(), LeadPatch::default()).unwrap();
        assert!(lead.crm_external_id.is_none());

        let conn = s.conn.lock().unwrap();
        let type_of: String = conn
            .query_row(
                "SELECT typeof(crm_external_id) FROM leads WHERE id = ?1",
                [lead.id.as_str()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(type_of, "null");

        let bogus: u32 = conn
            .query_row(
                "SELECT COUNT(*) FROM leads
                 WHERE crm_external_id IN ('None', 'nil', 'null')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(bogus, 0);
    }

    #[test]
    fn patch_updates_only_given_fields() {
        let s = store();
        let lead = s.upsert_lead_by_phone(&phone(), LeadPatch::default()).unwrap();
        let updated = s
            .update_lead(
                &lead.id,
                LeadPatch {
                    display_name: Some("João".to_string()),
                    score: Some(55),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("João"));
        assert_eq!(updated.score, 55);
        assert_eq!(updated.stage, QualificationStage::Initial);
    }

    #[test]
    fn append_message_assigns_monotonic_seq() {
        let s = store();
        let lead = s.upsert_lead_by_phone(&phone(), LeadPatch::default()).unwrap();
        let conv = s.conversation_for_lead(&lead.id).unwrap();
        let s1 = s
            .append_message(&conv.id, MessageDirection::Inbound, ContentType::Text, "oi", Some("g1"))
            .unwrap();
        let s2 = s
            .append_message(&conv.id, MessageDirection::Outbound, ContentType::Text, "olá", None)
            .unwrap();
        assert_eq!(s1.seq, 1);
        assert!(s1.inserted);
        assert_eq!(s2.seq, 2);
        let history = s.history(&conv.id, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "oi");
    }

    #[test]
    fn replayed_gateway_id_appends_nothing() {
        let s = store();
        let lead = s.upsert_lead_by_phone(&phone(), LeadPatch::default()).unwrap();
        let conv = s.conversation_for_lead(&lead.id).unwrap();
        let a = s
            .append_message(&conv.id, MessageDirection::Inbound, ContentType::Text, "oi", Some("dup"))
            .unwrap();
        let b = s
            .append_message(&conv.id, MessageDirection::Inbound, ContentType::Text, "oi", Some("dup"))
            .unwrap();
        assert_eq!(a.seq, b.seq);
        assert!(a.inserted);
        assert!(!b.inserted);
        assert_eq!(s.history(&conv.id, 10).unwrap().len(), 1);
    }

    #[test]
    fn claim_due_hands_each_row_to_exactly_one_caller() {
        let s = store();
        let lead = s.upsert_lead_by_phone(&phone(), LeadPatch::default()).unwrap();
        let now = Utc::now();
        s.schedule_follow_up(&lead.id, FollowUpKind::Reengage30m, now - Duration::minutes(1), "t")
            .unwrap();
        s.schedule_follow_up(&lead.id, FollowUpKind::Reengage24h, now - Duration::minutes(2), "t")
            .unwrap();

        let first = s.claim_due(now, 10).unwrap();
        assert_eq!(first.len(), 2);
        let second = s.claim_due(now, 10).unwrap();
        assert!(second.is_empty(), "claimed rows were claimed again");
    }

    #[test]
    fn record_failure_requeues_then_cancels_after_three() {
        let s = store();
        let lead = s.upsert_lead_by_phone(&phone(), LeadPatch::default()).unwrap();
        let now = Utc::now();
        let fu = s
            .schedule_follow_up(&lead.id, FollowUpKind::Reengage30m, now, "t")
            .unwrap();

        s.claim_due(now, 10).unwrap();
        assert_eq!(
            s.record_failure(&fu.id, "gateway 503", 3).unwrap(),
            FollowUpStatus::Pending
        );
        s.claim_due(now, 10).unwrap();
        assert_eq!(
            s.record_failure(&fu.id, "gateway 503", 3).unwrap(),
            FollowUpStatus::Pending
        );
        s.claim_due(now, 10).unwrap();
        assert_eq!(
            s.record_failure(&fu.id, "gateway 503", 3).unwrap(),
            FollowUpStatus::Canceled
        );
        // Terminal: nothing left to claim, and the exhausted reengagement
        // counts toward abandonment.
        assert!(s.claim_due(now, 10).unwrap().is_empty());
        assert_eq!(s.count_failed_reengagements(&lead.id).unwrap(), 1);
    }

    #[test]
    fn cancel_reengagements_leaves_reminders_alone() {
        let s = store();
        let lead = s.upsert_lead_by_phone(&phone(), LeadPatch::default()).unwrap();
        let due = Utc::now() + Duration::hours(1);
        s.schedule_follow_up(&lead.id, FollowUpKind::Reengage30m, due, "t").unwrap();
        s.schedule_follow_up(&lead.id, FollowUpKind::Reminder24h, due, "t").unwrap();

        let n = s.cancel_reengagements(&lead.id).unwrap();
        assert_eq!(n, 1);
        assert!(!s.has_pending_reengagement(&lead.id).unwrap());
    }

    #[test]
    fn defer_requeues_claimed_row() {
        let s = store();
        let lead = s.upsert_lead_by_phone(&phone(), LeadPatch::default()).unwrap();
        let now = Utc::now();
        let fu = s
            .schedule_follow_up(&lead.id, FollowUpKind::Nurture, now, "t")
            .unwrap();
        let claimed = s.claim_due(now, 10).unwrap();
        assert_eq!(claimed.len(), 1);

        let tomorrow = now + Duration::hours(10);
        s.defer(&fu.id, tomorrow).unwrap();
        assert!(s.claim_due(now, 10).unwrap().is_empty());
        assert_eq!(s.claim_due(tomorrow, 10).unwrap().len(), 1);
    }

    #[test]
    fn session_round_trip() {
        let s = store();
        let lead = s.upsert_lead_by_phone(&phone(), LeadPatch::default()).unwrap();
        let conv = s.conversation_for_lead(&lead.id).unwrap();

        let mut session = s.load_session(&conv.id).unwrap();
        assert!(session.turns.is_empty());

        session.turns.push(SessionTurn {
            role: "user".to_string(),
            content: "oi".to_string(),
            at: Utc::now(),
        });
        session.slots.name = Some("João".to_string());
        s.save_session(&session).unwrap();

        let loaded = s.load_session(&conv.id).unwrap();
        assert_eq!(loaded.turns.len(), 1);
        assert_eq!(loaded.slots.name.as_deref(), Some("João"));
    }

    #[test]
    fn reminder_flags_and_attempts() {
        let s = store();
        let lead = s.upsert_lead_by_phone(&phone(), LeadPatch::default()).unwrap();
        let now = Utc::now();
        let ev = CalendarEventRecord {
            id: "ev1".to_string(),
            lead_id: lead.id.clone(),
            external_event_id: "ext1".to_string(),
            start_at: now + Duration::hours(3),
            end_at: now + Duration::hours(4),
            attendee_emails: vec!["a@b.com".to_string()],
            status: CalendarEventStatus::Confirmed,
            reminder_24h_sent: false,
            reminder_2h_sent: false,
            reminder_30m_sent: false,
            reminder_24h_attempts: 0,
            reminder_2h_attempts: 0,
            reminder_30m_attempts: 0,
            created_at: now,
            updated_at: now,
        };
        s.insert_event(&ev).unwrap();

        assert_eq!(s.record_reminder_attempt("ev1", ReminderSlot::H2).unwrap(), 1);
        s.set_reminder_sent("ev1", ReminderSlot::H2).unwrap();
        let loaded = s.active_event_for_lead(&lead.id).unwrap().unwrap();
        assert!(loaded.reminder_2h_sent);
        assert!(!loaded.reminder_24h_sent);
    }

    #[test]
    fn rescheduling_rearms_reminders() {
        let s = store();
        let lead = s.upsert_lead_by_phone(&phone(), LeadPatch::default()).unwrap();
        let now = Utc::now();
        let ev = CalendarEventRecord {
            id: "ev2".to_string(),
            lead_id: lead.id.clone(),
            external_event_id: "ext2".to_string(),
            start_at: now + Duration::hours(1),
            end_at: now + Duration::hours(2),
            attendee_emails: vec![],
            status: CalendarEventStatus::Confirmed,
            reminder_24h_sent: true,
            reminder_2h_sent: true,
            reminder_30m_sent: false,
            reminder_24h_attempts: 1,
            reminder_2h_attempts: 1,
            reminder_30m_attempts: 0,
            created_at: now,
            updated_at: now,
        };
        s.insert_event(&ev).unwrap();
        s.set_reminder_sent("ev2", ReminderSlot::H24).unwrap();

        s.update_event_window("ev2", now + Duration::days(2), now + Duration::days(2) + Duration::hours(1))
            .unwrap();
        let loaded = s.active_event_for_lead(&lead.id).unwrap().unwrap();
        assert!(!loaded.reminder_24h_sent);
        assert!(!loaded.reminder_2h_sent);
    }
}
