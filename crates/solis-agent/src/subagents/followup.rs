//! Follow-up subagent — schedules reengagement plans. Never sends anything;
//! the executor loop owns delivery.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use solis_core::types::{FollowUpKind, LeadId};
use solis_store::types::FollowUp;
use solis_store::Store;

use crate::error::Result;

use super::{Subagent, SubagentOutcome, TurnContext};

pub struct FollowUpAgent {
    store: Arc<Store>,
}

impl FollowUpAgent {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Persist a follow-up plan row for the executor to pick up.
    pub fn schedule_plan(
        &self,
        lead_id: &LeadId,
        kind: FollowUpKind,
        due_at: DateTime<Utc>,
        template_key: &str,
    ) -> Result<FollowUp> {
        Ok(self.store.schedule_follow_up(lead_id, kind, due_at, template_key)?)
    }

    /// A 30-minute reengagement, unless one is already waiting.
    pub fn ensure_reengagement(&self, lead_id: &LeadId, now: DateTime<Utc>) -> Result<Option<FollowUp>> {
        if self.store.has_pending_reengagement(lead_id)? {
            return Ok(None);
        }
        let fu = self.schedule_plan(
            lead_id,
            FollowUpKind::Reengage30m,
            now + Duration::minutes(30),
            "reengage_first",
        )?;
        Ok(Some(fu))
    }
}

#[async_trait]
impl Subagent for FollowUpAgent {
    fn name(&self) -> &str {
        "follow_up"
    }

    /// "Me chama depois" → a 24h reengagement and a friendly confirmation.
    async fn handle(&self, ctx: &TurnContext<'_>) -> Result<SubagentOutcome> {
        let fu = self.schedule_plan(
            &ctx.lead.id,
            FollowUpKind::Reengage24h,
            ctx.now + Duration::hours(24),
            "reengage_requested",
        )?;

        let mut outcome = SubagentOutcome {
            reply: "Claro! Te chamo de novo amanhã então. Qualquer coisa antes disso, \
                    é só mandar mensagem. 😊"
                .to_string(),
            ..Default::default()
        };
        outcome.analytics.push((
            "followup_requested".to_string(),
            serde_json::json!({ "follow_up_id": fu.id, "due_at": fu.due_at.to_rfc3339() }),
        ));
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solis_core::types::Phone;
    use solis_store::types::LeadPatch;

    #[test]
    fn ensure_reengagement_is_idempotent() {
        let store = Arc::new(Store::in_memory().unwrap());
        let lead = store
            .upsert_lead_by_phone(&Phone::new("+5581988887777"), LeadPatch::default())
            .unwrap();
        let agent = FollowUpAgent::new(Arc::clone(&store));

        let first = agent.ensure_reengagement(&lead.id, Utc::now()).unwrap();
        assert!(first.is_some());
        let second = agent.ensure_reengagement(&lead.id, Utc::now()).unwrap();
        assert!(second.is_none(), "a second pending reengagement was created");
    }
}
