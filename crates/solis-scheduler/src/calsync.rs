//! Calendar reconciliation loop — remote wins.
//!
//! Every pass compares each local CONFIRMED event with the provider's copy:
//! moved meetings update the local window (re-arming reminders), remote
//! cancellations close the local record, and divergence is logged. Past
//! events still marked CONFIRMED fall under the missed-meeting policy.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use solis_calendar::CalendarClient;
use solis_core::config::MissedMeetingPolicy;
use solis_core::types::{CalendarEventStatus, QualificationStage};
use solis_store::types::{CalendarEventRecord, LeadPatch};
use solis_store::Store;

use crate::error::Result;

pub struct CalendarSyncLoop {
    store: Arc<Store>,
    client: Arc<CalendarClient>,
    sync_sec: u64,
    missed_policy: MissedMeetingPolicy,
}

impl CalendarSyncLoop {
    pub fn new(
        store: Arc<Store>,
        client: Arc<CalendarClient>,
        sync_sec: u64,
        missed_policy: MissedMeetingPolicy,
    ) -> Self {
        Self {
            store,
            client,
            sync_sec,
            missed_policy,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(sync_sec = self.sync_sec, "calendar sync loop started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.sync_sec));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!("calendar sync tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("calendar sync loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One reconcile pass. Public for tests.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        let locals = self.store.confirmed_events(now)?;
        if !locals.is_empty() {
            // One window query covers every tracked event.
            let horizon = locals
                .iter()
                .map(|e| e.end_at)
                .max()
                .unwrap_or(now)
                + chrono::Duration::hours(1);
            match self.client.list_events(now - chrono::Duration::hours(1), horizon).await {
                Ok(remote) => {
                    let by_id: std::collections::HashMap<&str, &solis_calendar::ExternalEvent> =
                        remote.iter().map(|e| (e.id.as_str(), e)).collect();
                    for local in &locals {
                        let remote_event = by_id.get(local.external_event_id.as_str()).copied();
                        if let Err(e) = self.reconcile(local, remote_event) {
                            warn!(event_id = %local.id, error = %e, "reconcile failed, will retry next tick");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "calendar listing failed, skipping reconcile pass"),
            }
        }
        self.apply_missed_policy(now)?;
        Ok(())
    }

    fn reconcile(
        &self,
        local: &CalendarEventRecord,
        remote: Option<&solis_calendar::ExternalEvent>,
    ) -> Result<()> {
        match remote {
            None => {
                // Deleted upstream: remote wins.
                warn!(
                    event_id = %local.id,
                    external_id = %local.external_event_id,
                    "event gone from remote calendar, canceling locally"
                );
                self.store
                    .set_event_status(&local.id, CalendarEventStatus::Canceled)?;
                let _ = self.store.record_event(
                    "calendar_divergence",
                    Some(&local.lead_id),
                    serde_json::json!({ "kind": "remote_deleted", "event_id": local.id }),
                );
            }
            Some(remote) if remote.is_cancelled() => {
                warn!(event_id = %local.id, "event cancelled on remote calendar");
                self.store
                    .set_event_status(&local.id, CalendarEventStatus::Canceled)?;
                let _ = self.store.record_event(
                    "calendar_divergence",
                    Some(&local.lead_id),
                    serde_json::json!({ "kind": "remote_cancelled", "event_id": local.id }),
                );
            }
            Some(remote) => {
                if remote.start != local.start_at || remote.end != local.end_at {
                    info!(
                        event_id = %local.id,
                        local_start = %local.start_at,
                        remote_start = %remote.start,
                        "event moved on remote calendar, remote wins"
                    );
                    self.store
                        .update_event_window(&local.id, remote.start, remote.end)?;
                    let _ = self.store.record_event(
                        "calendar_divergence",
                        Some(&local.lead_id),
                        serde_json::json!({ "kind": "remote_moved", "event_id": local.id }),
                    );
                }
                if remote.attendees != local.attendee_emails {
                    self.store.set_event_attendees(&local.id, &remote.attendees)?;
                }
            }
        }
        Ok(())
    }

    /// CONFIRMED events whose window has passed: reschedule or lose the lead.
    fn apply_missed_policy(&self, now: DateTime<Utc>) -> Result<()> {
        for event in self.store.overdue_events(now)? {
            let (stage, label) = match self.missed_policy {
                MissedMeetingPolicy::Reschedule => (QualificationStage::Scheduling, "reschedule"),
                MissedMeetingPolicy::Lost => (QualificationStage::Lost, "lost"),
            };
            self.store
                .set_event_status(&event.id, CalendarEventStatus::Canceled)?;
            self.store.update_lead(
                &event.lead_id,
                LeadPatch {
                    stage: Some(stage),
                    ..Default::default()
                },
            )?;
            if stage.is_terminal() {
                self.store.cancel_reengagements(&event.lead_id)?;
            }
            let _ = self.store.record_event(
                "meeting_missed",
                Some(&event.lead_id),
                serde_json::json!({ "event_id": event.id, "policy": label }),
            );
            info!(event_id = %event.id, policy = label, "missed meeting handled");
        }
        Ok(())
    }
}
