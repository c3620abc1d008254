//! Follow-up executor — drains due follow-ups and sends them.
//!
//! Each tick claims a batch atomically (at-most-once hand-off), enforces
//! quiet hours, renders the template, and sends through the humanized sender
//! so follow-ups never interleave with a live reply to the same lead. The
//! abandonment sweep runs here too.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};

use solis_core::config::{FollowUpConfig, FunnelConfig};
use solis_core::quiet::QuietHours;
use solis_core::types::{ConversationState, QualificationStage};
use solis_store::types::{FollowUp, LeadPatch};
use solis_store::Store;
use solis_whatsapp::HumanizedSender;

use crate::error::Result;
use crate::templates;

pub struct FollowUpExecutor {
    store: Arc<Store>,
    sender: Arc<HumanizedSender>,
    cfg: FollowUpConfig,
    funnel: FunnelConfig,
    quiet: QuietHours,
}

impl FollowUpExecutor {
    pub fn new(
        store: Arc<Store>,
        sender: Arc<HumanizedSender>,
        cfg: FollowUpConfig,
        funnel: FunnelConfig,
        quiet: QuietHours,
    ) -> Self {
        Self {
            store,
            sender,
            cfg,
            funnel,
            quiet,
        }
    }

    /// Main loop. Ticks every `cfg.tick_sec` until `shutdown` flips true.
    /// Claimed-but-unsent rows are re-queued on the way out.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(tick_sec = self.cfg.tick_sec, "follow-up executor started");
        // Rows claimed by a crashed predecessor go back to the queue.
        if let Err(e) = self.store.requeue_claimed() {
            error!("startup requeue failed: {e}");
        }

        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.cfg.tick_sec));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!("follow-up tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("follow-up executor shutting down");
                        break;
                    }
                }
            }
        }
        if let Err(e) = self.store.requeue_claimed() {
            error!("shutdown requeue failed: {e}");
        }
    }

    /// One tick: claim, filter, send, transition. Public for tests.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        let claimed = self.store.claim_due(now, self.cfg.batch)?;
        for fu in claimed {
            if let Err(e) = self.process_one(&fu, now).await {
                warn!(follow_up_id = %fu.id, error = %e, "follow-up processing failed");
                let _ = self
                    .store
                    .record_failure(&fu.id, &e.to_string(), self.cfg.max_attempts);
            }
        }
        self.sweep_abandoned(now)?;
        Ok(())
    }

    async fn process_one(&self, fu: &FollowUp, now: DateTime<Utc>) -> Result<()> {
        let lead = self.store.get_lead(&fu.lead_id)?;

        // Terminal stages carry no reengagements (§3 invariant).
        if fu.kind.is_reengagement() && lead.stage.is_terminal() {
            self.store.cancel_follow_up(&fu.id)?;
            info!(follow_up_id = %fu.id, stage = %lead.stage, "reengagement canceled: terminal stage");
            return Ok(());
        }

        // Quiet hours: slide to the window opening, stay PENDING.
        if self.quiet.contains(now) {
            let opening = self.quiet.next_opening(now);
            self.store.defer(&fu.id, opening)?;
            info!(follow_up_id = %fu.id, due_at = %opening, "deferred past quiet hours");
            return Ok(());
        }

        let text = templates::render(&fu.template_key, &lead);
        match self.sender.send(&lead.phone, &text).await {
            Ok(report) if report.all_sent() => {
                self.store.mark_sent(&fu.id)?;
                let _ = self.store.record_event(
                    "followup_sent",
                    Some(&lead.id),
                    serde_json::json!({ "kind": fu.kind.to_string(), "attempt": fu.attempt_count + 1 }),
                );
                info!(follow_up_id = %fu.id, kind = %fu.kind, "follow-up sent");
            }
            Ok(report) => {
                let err = report
                    .failed
                    .first()
                    .map(|(_, e)| e.clone())
                    .unwrap_or_else(|| "partial delivery".to_string());
                self.store
                    .record_failure(&fu.id, &err, self.cfg.max_attempts)?;
            }
            Err(e) => {
                self.store
                    .record_failure(&fu.id, &e.to_string(), self.cfg.max_attempts)?;
            }
        }
        Ok(())
    }

    /// Dormant leads with two or more failed reengagements go ABANDONED, and
    /// their open follow-ups are canceled.
    fn sweep_abandoned(&self, now: DateTime<Utc>) -> Result<()> {
        let cutoff = now - Duration::hours(self.funnel.dormant_after_hours);
        for lead in self.store.dormant_candidates(cutoff)? {
            let failed = self.store.count_failed_reengagements(&lead.id)?;
            if failed < 2 {
                continue;
            }
            self.store.update_lead(
                &lead.id,
                LeadPatch {
                    stage: Some(QualificationStage::Abandoned),
                    ..Default::default()
                },
            )?;
            let canceled = self.store.cancel_open_follow_ups(&lead.id)?;
            if let Ok(conv) = self.store.conversation_for_lead(&lead.id) {
                let _ = self
                    .store
                    .set_conversation_state(&conv.id, ConversationState::Dormant);
            }
            let _ = self.store.record_event(
                "lead_abandoned",
                Some(&lead.id),
                serde_json::json!({ "failed_reengagements": failed, "canceled": canceled }),
            );
            info!(lead_id = %lead.id, failed, "lead marked abandoned");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solis_core::types::{FollowUpKind, FollowUpStatus, Phone};
    use solis_whatsapp::GatewayClient;

    fn executor(store: Arc<Store>) -> FollowUpExecutor {
        let client = Arc::new(GatewayClient::new("http://127.0.0.1:1", "test", "k"));
        // Ceiling of zero skips the typing pacing in tests.
        let sender = Arc::new(HumanizedSender::new(client, 1_000, 0));
        FollowUpExecutor::new(
            store,
            sender,
            FollowUpConfig::default(),
            FunnelConfig::default(),
            QuietHours::default(),
        )
    }

    fn store_with_lead() -> (Arc<Store>, solis_store::types::Lead) {
        let store = Arc::new(Store::in_memory().unwrap());
        let lead = store
            .upsert_lead_by_phone(&Phone::new("+5581977776666"), LeadPatch::default())
            .unwrap();
        (store, lead)
    }

    #[tokio::test]
    async fn terminal_stage_cancels_reengagement_without_sending() {
        let (store, lead) = store_with_lead();
        store
            .update_lead(
                &lead.id,
                LeadPatch {
                    stage: Some(QualificationStage::Won),
                    ..Default::default()
                },
            )
            .unwrap();
        let now = Utc::now();
        store
            .schedule_follow_up(&lead.id, FollowUpKind::Reengage30m, now, "reengage_first")
            .unwrap();

        executor(Arc::clone(&store)).tick(now).await.unwrap();
        assert!(!store.has_pending_reengagement(&lead.id).unwrap());
        // Nothing left due.
        assert!(store.claim_due(now, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn quiet_hours_defer_to_window_opening() {
        let (store, lead) = store_with_lead();
        // 22:30 — inside the default 20:00-08:00 window.
        let night = chrono::TimeZone::with_ymd_and_hms(&Utc, 2025, 6, 10, 22, 30, 0).unwrap();
        store
            .schedule_follow_up(&lead.id, FollowUpKind::Nurture, night, "nurture")
            .unwrap();

        executor(Arc::clone(&store)).tick(night).await.unwrap();

        // Still pending, but not claimable until 08:00 next day.
        assert!(store.claim_due(night, 10).unwrap().is_empty());
        let morning = chrono::TimeZone::with_ymd_and_hms(&Utc, 2025, 6, 11, 8, 0, 0).unwrap();
        let due = store.claim_due(morning, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].status, FollowUpStatus::Pending);
    }

    #[tokio::test]
    async fn unreachable_gateway_records_failure() {
        let (store, lead) = store_with_lead();
        let now = Utc::now();
        let fu = store
            .schedule_follow_up(&lead.id, FollowUpKind::Reengage30m, now, "reengage_first")
            .unwrap();

        // The gateway points at a closed port, so the send fails and the row
        // returns to pending with one recorded attempt.
        executor(Arc::clone(&store)).tick(now).await.unwrap();

        let claimable = store.claim_due(now, 10).unwrap();
        assert_eq!(claimable.len(), 1);
        assert_eq!(claimable[0].id, fu.id);
        assert_eq!(claimable[0].attempt_count, 1);
    }
}
