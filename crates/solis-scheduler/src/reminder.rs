//! Meeting reminder loop — 24h / 2h / 30m before each confirmed event.
//!
//! Flag discipline: the sent flag for a slot is only set after a successful
//! send, so a failed send retries on the next tick (up to the attempt cap).
//! When an event is booked inside a threshold (e.g. two hours before the
//! start), the larger thresholds are suppressed rather than fired late.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use solis_store::types::{CalendarEventRecord, ReminderSlot};
use solis_store::Store;
use solis_whatsapp::HumanizedSender;

use crate::error::Result;
use crate::templates;

pub struct ReminderLoop {
    store: Arc<Store>,
    sender: Arc<HumanizedSender>,
    tick_sec: u64,
    max_attempts: u32,
}

impl ReminderLoop {
    pub fn new(
        store: Arc<Store>,
        sender: Arc<HumanizedSender>,
        tick_sec: u64,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            sender,
            tick_sec,
            max_attempts,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_sec = self.tick_sec, "reminder loop started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.tick_sec));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!("reminder tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reminder loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over the confirmed events. Public for tests.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        for event in self.store.confirmed_events(now)? {
            if let Err(e) = self.process_event(&event, now).await {
                warn!(event_id = %event.id, error = %e, "reminder processing failed");
            }
        }
        Ok(())
    }

    async fn process_event(&self, event: &CalendarEventRecord, now: DateTime<Utc>) -> Result<()> {
        if now >= event.start_at {
            return Ok(()); // meeting already started, nothing to remind
        }

        // Thresholds crossed but not yet sent, largest lead time first.
        let crossed: Vec<ReminderSlot> = [ReminderSlot::H24, ReminderSlot::H2, ReminderSlot::M30]
            .into_iter()
            .filter(|slot| !slot_sent(event, *slot))
            .filter(|slot| now >= event.start_at - slot.lead_time())
            .collect();

        let Some(active) = crossed.last().copied() else {
            return Ok(());
        };

        // Suppress the stale larger thresholds instead of firing them late.
        for slot in &crossed {
            if *slot != active {
                self.store.set_reminder_sent(&event.id, *slot)?;
                let _ = self.store.record_event(
                    "reminder_suppressed",
                    Some(&event.lead_id),
                    serde_json::json!({ "slot": slot.column() }),
                );
            }
        }

        if slot_attempts(event, active) >= self.max_attempts {
            return Ok(());
        }
        self.store.record_reminder_attempt(&event.id, active)?;

        let lead = self.store.get_lead(&event.lead_id)?;
        let template_key = match active {
            ReminderSlot::H24 => "reminder_24h",
            ReminderSlot::H2 => "reminder_2h",
            ReminderSlot::M30 => "reminder_30m",
        };
        let text = templates::render_reminder(template_key, &lead, event.start_at);

        match self.sender.send(&lead.phone, &text).await {
            Ok(report) if report.all_sent() => {
                self.store.set_reminder_sent(&event.id, active)?;
                let _ = self.store.record_event(
                    "reminder_sent",
                    Some(&lead.id),
                    serde_json::json!({ "slot": active.column(), "event_id": event.id }),
                );
                info!(event_id = %event.id, slot = active.column(), "reminder sent");
            }
            Ok(_) | Err(_) => {
                // Flag stays false; the next tick retries until the cap.
                warn!(event_id = %event.id, slot = active.column(), "reminder send failed");
            }
        }
        Ok(())
    }
}

fn slot_sent(event: &CalendarEventRecord, slot: ReminderSlot) -> bool {
    match slot {
        ReminderSlot::H24 => event.reminder_24h_sent,
        ReminderSlot::H2 => event.reminder_2h_sent,
        ReminderSlot::M30 => event.reminder_30m_sent,
    }
}

fn slot_attempts(event: &CalendarEventRecord, slot: ReminderSlot) -> u32 {
    match slot {
        ReminderSlot::H24 => event.reminder_24h_attempts,
        ReminderSlot::H2 => event.reminder_2h_attempts,
        ReminderSlot::M30 => event.reminder_30m_attempts,
    }
}
