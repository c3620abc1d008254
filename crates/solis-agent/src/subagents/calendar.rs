//! Calendar subagent — slot discovery, booking, reschedule, cancel.
//!
//! Booking rules: attendee e-mails are collected before anything is created,
//! and a lead holds at most one live event — any existing one is canceled
//! first (that is what makes a reschedule safe).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use tracing::info;
use uuid::Uuid;

use solis_calendar::{CalendarClient, EventDraft};
use solis_core::types::{CalendarEventStatus, QualificationStage};
use solis_store::types::CalendarEventRecord;
use solis_store::Store;

use crate::error::Result;

use super::{Subagent, SubagentOutcome, TurnContext};

/// Meetings are offered inside business hours only.
const BUSINESS_START_HOUR: u32 = 9;
const BUSINESS_END_HOUR: u32 = 18;

pub struct CalendarAgent {
    client: Arc<CalendarClient>,
    store: Arc<Store>,
    meeting_minutes: i64,
}

impl CalendarAgent {
    pub fn new(client: Arc<CalendarClient>, store: Arc<Store>, meeting_minutes: i64) -> Self {
        Self {
            client,
            store,
            meeting_minutes,
        }
    }

    /// Next `count` bookable starts after `now`: weekdays, on the hour,
    /// inside business hours.
    pub fn find_slots(&self, now: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut slots = Vec::with_capacity(count);
        let mut cursor = (now + Duration::hours(1))
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);

        while slots.len() < count {
            cursor += Duration::hours(1);
            let weekday = cursor.weekday();
            if matches!(weekday, Weekday::Sat | Weekday::Sun) {
                continue;
            }
            let hour = cursor.hour();
            if hour < BUSINESS_START_HOUR || hour >= BUSINESS_END_HOUR {
                continue;
            }
            slots.push(cursor);
        }
        slots
    }

    /// Book a meeting. Cancels the lead's live event first, then creates the
    /// external event and the local record.
    pub async fn schedule(
        &self,
        ctx: &TurnContext<'_>,
        start: DateTime<Utc>,
        emails: &[String],
    ) -> Result<CalendarEventRecord> {
        // One live event per lead: cancel before creating.
        if let Some(existing) = self.store.active_event_for_lead(&ctx.lead.id)? {
            self.client.delete_event(&existing.external_event_id).await?;
            self.store
                .set_event_status(&existing.id, CalendarEventStatus::Canceled)?;
            info!(lead_id = %ctx.lead.id, event_id = %existing.id, "previous event canceled for rebooking");
        }

        let end = start + Duration::minutes(self.meeting_minutes);
        let lead_name = ctx.slots.name.as_deref().unwrap_or("Lead");
        let draft = EventDraft {
            summary: format!("Energia solar — {lead_name}"),
            description: format!(
                "Reunião de apresentação. Lead {} ({}).",
                lead_name, ctx.lead.phone
            ),
            start,
            end,
            attendees: emails.to_vec(),
        };
        let external = self.client.create_event(&draft).await?;

        let now = Utc::now();
        let record = CalendarEventRecord {
            id: Uuid::new_v4().to_string(),
            lead_id: ctx.lead.id.clone(),
            external_event_id: external.id,
            start_at: start,
            end_at: end,
            attendee_emails: emails.to_vec(),
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
        self.store.insert_event(&record)?;
        info!(lead_id = %ctx.lead.id, start = %start, "meeting scheduled");
        Ok(record)
    }

    /// Cancel the lead's live event, if any.
    pub async fn cancel(&self, ctx: &TurnContext<'_>, reason: &str) -> Result<bool> {
        match self.store.active_event_for_lead(&ctx.lead.id)? {
            Some(existing) => {
                self.client.delete_event(&existing.external_event_id).await?;
                self.store
                    .set_event_status(&existing.id, CalendarEventStatus::Canceled)?;
                info!(lead_id = %ctx.lead.id, reason, "meeting canceled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn format_slots(&self, slots: &[DateTime<Utc>]) -> String {
        slots
            .iter()
            .map(|s| format!("• {} às {}h", weekday_pt(s.weekday()), s.hour()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Subagent for CalendarAgent {
    fn name(&self) -> &str {
        "calendar"
    }

    async fn handle(&self, ctx: &TurnContext<'_>) -> Result<SubagentOutcome> {
        let wants_cancel =
            ctx.text.to_lowercase().contains("cancelar") || ctx.text.to_lowercase().contains("desmarcar");
        if wants_cancel {
            let canceled = self.cancel(ctx, "pedido do lead").await?;
            let reply = if canceled {
                "Tudo bem, reunião cancelada. Quando quiser remarcar é só me chamar! 😊"
            } else {
                "Você não tem nenhuma reunião marcada no momento. Quer agendar uma?"
            };
            return Ok(SubagentOutcome {
                reply: reply.to_string(),
                stage_hint: canceled.then_some(QualificationStage::Scheduling),
                ..Default::default()
            });
        }

        match (ctx.slots.meeting_at, ctx.slots.emails.is_empty()) {
            // Datetime and e-mail in hand: book it.
            (Some(start), false) => {
                let record = self.schedule(ctx, start, &ctx.slots.emails).await?;
                let mut outcome = SubagentOutcome {
                    reply: format!(
                        "Agendado! 🎉 {} às {:02}h{:02}. Você vai receber o convite em {}.",
                        weekday_pt(record.start_at.weekday()),
                        record.start_at.hour(),
                        record.start_at.minute(),
                        ctx.slots.emails.join(", ")
                    ),
                    stage_hint: Some(QualificationStage::Scheduled),
                    ..Default::default()
                };
                outcome.analytics.push((
                    "meeting_scheduled".to_string(),
                    serde_json::json!({ "start_at": record.start_at.to_rfc3339() }),
                ));
                Ok(outcome)
            }
            // Datetime but no e-mail: e-mails are mandatory before booking.
            (Some(_), true) => Ok(SubagentOutcome {
                reply: "Perfeito! Só preciso de um e-mail pra te enviar o convite da reunião. \
                        Qual e-mail você quer usar?"
                    .to_string(),
                ..Default::default()
            }),
            // No datetime yet: offer slots.
            (None, _) => {
                let slots = self.find_slots(ctx.now, 3);
                Ok(SubagentOutcome {
                    reply: format!(
                        "Tenho esses horários livres:\n{}\n\nQual prefere? \
                         Me manda também um e-mail pro convite.",
                        self.format_slots(&slots)
                    ),
                    ..Default::default()
                })
            }
        }
    }
}

fn weekday_pt(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "segunda",
        Weekday::Tue => "terça",
        Weekday::Wed => "quarta",
        Weekday::Thu => "quinta",
        Weekday::Fri => "sexta",
        Weekday::Sat => "sábado",
        Weekday::Sun => "domingo",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> CalendarAgent {
        CalendarAgent::new(
            Arc::new(CalendarClient::new("http://cal", "k", "primary")),
            Arc::new(Store::in_memory().unwrap()),
            45,
        )
    }

    #[test]
    fn slots_avoid_weekends_and_off_hours() {
        // A Friday afternoon: next slots must skip to business hours and
        // never land on Saturday/Sunday.
        let now = Utc.with_ymd_and_hms(2025, 6, 13, 16, 30, 0).unwrap();
        let slots = agent().find_slots(now, 5);
        assert_eq!(slots.len(), 5);
        for slot in &slots {
            assert!(!matches!(slot.weekday(), Weekday::Sat | Weekday::Sun));
            assert!(slot.hour() >= BUSINESS_START_HOUR && slot.hour() < BUSINESS_END_HOUR);
            assert!(*slot > now);
        }
    }

    #[test]
    fn slots_are_chronological() {
        let now = Utc.with_ymd_and_hms(2025, 6, 9, 8, 0, 0).unwrap();
        let slots = agent().find_slots(now, 4);
        for pair in slots.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
