use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use solis_core::types::{
    CalendarEventStatus, ContentType, ConversationId, ConversationState, FollowUpKind,
    FollowUpStatus, LeadId, MessageDirection, Phone, QualificationStage, SolutionChoice,
    Temperature,
};

/// A prospective customer, keyed by phone. Never deleted — `deleted` is a
/// soft flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub phone: Phone,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub stage: QualificationStage,
    pub solution: SolutionChoice,
    pub bill_amount: Option<f64>,
    pub competitor_name: Option<String>,
    pub competitor_discount_pct: Option<f64>,
    pub score: u8,
    pub temperature: Temperature,
    /// External CRM record id, once synced. `None` binds as SQL NULL.
    pub crm_external_id: Option<String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field-wise update for a lead. `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct LeadPatch {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub stage: Option<QualificationStage>,
    pub solution: Option<SolutionChoice>,
    pub bill_amount: Option<f64>,
    pub competitor_name: Option<String>,
    pub competitor_discount_pct: Option<f64>,
    pub score: Option<u8>,
    pub temperature: Option<Temperature>,
    pub crm_external_id: Option<String>,
}

impl LeadPatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.email.is_none()
            && self.stage.is_none()
            && self.solution.is_none()
            && self.bill_amount.is_none()
            && self.competitor_name.is_none()
            && self.competitor_discount_pct.is_none()
            && self.score.is_none()
            && self.temperature.is_none()
            && self.crm_external_id.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub lead_id: LeadId,
    pub session_id: String,
    pub state: ConversationState,
    pub follow_up_count: u32,
    pub message_count: u32,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// One message in a conversation. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,
    pub conversation_id: ConversationId,
    /// Monotonic per-conversation sequence assigned at append time.
    pub seq: i64,
    pub direction: MessageDirection,
    pub content_type: ContentType,
    pub content: String,
    pub gateway_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Structured slots extracted from the conversation so far.
///
/// Extraction never overwrites a populated slot unless the user explicitly
/// corrects it — the merge lives in the agent crate; this is just the data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Slots {
    pub name: Option<String>,
    pub bill_amount: Option<f64>,
    pub solution: Option<SolutionChoice>,
    pub has_competitor: Option<bool>,
    pub competitor_name: Option<String>,
    pub competitor_discount_pct: Option<f64>,
    pub emails: Vec<String>,
    /// Confirmed meeting start, once the lead picks a slot.
    pub meeting_at: Option<DateTime<Utc>>,
}

/// One serialized model turn kept in the session context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTurn {
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// Per-conversation working memory: recent turns plus extracted slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub conversation_id: ConversationId,
    pub turns: Vec<SessionTurn>,
    pub slots: Slots,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentSession {
    pub fn new(conversation_id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            conversation_id,
            turns: Vec::new(),
            slots: Slots::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Keep only the most recent `max` turns.
    pub fn trim(&mut self, max: usize) {
        if self.turns.len() > max {
            let drop = self.turns.len() - max;
            self.turns.drain(..drop);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUp {
    pub id: String,
    pub lead_id: LeadId,
    pub kind: FollowUpKind,
    pub status: FollowUpStatus,
    pub due_at: DateTime<Utc>,
    pub template_key: String,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEventRecord {
    pub id: String,
    pub lead_id: LeadId,
    pub external_event_id: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub attendee_emails: Vec<String>,
    pub status: CalendarEventStatus,
    pub reminder_24h_sent: bool,
    pub reminder_2h_sent: bool,
    pub reminder_30m_sent: bool,
    pub reminder_24h_attempts: u32,
    pub reminder_2h_attempts: u32,
    pub reminder_30m_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which of the three reminder thresholds a loop tick is acting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderSlot {
    H24,
    H2,
    M30,
}

impl ReminderSlot {
    pub fn column(&self) -> &'static str {
        match self {
            ReminderSlot::H24 => "reminder_24h",
            ReminderSlot::H2 => "reminder_2h",
            ReminderSlot::M30 => "reminder_30m",
        }
    }

    pub fn lead_time(&self) -> chrono::Duration {
        match self {
            ReminderSlot::H24 => chrono::Duration::hours(24),
            ReminderSlot::H2 => chrono::Duration::hours(2),
            ReminderSlot::M30 => chrono::Duration::minutes(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub kind: String,
    pub lead_id: Option<LeadId>,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}
