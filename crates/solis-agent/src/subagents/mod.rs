//! Specialist subagents — bounded-scope handlers behind one trait.
//!
//! Subagents never talk to the user directly: they return a structured
//! outcome and the orchestrator serializes it through the humanized sender.

pub mod bill;
pub mod calendar;
pub mod crm;
pub mod followup;
pub mod knowledge;
pub mod qualification;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use solis_core::types::QualificationStage;
use solis_media::Artifact;
use solis_store::types::{Conversation, Lead, Slots};

use crate::error::Result;

/// Read-only view of the turn a subagent operates on.
pub struct TurnContext<'a> {
    pub lead: &'a Lead,
    pub conversation: &'a Conversation,
    pub slots: &'a Slots,
    pub text: &'a str,
    pub artifact: Option<&'a Artifact>,
    pub now: DateTime<Utc>,
}

/// What a subagent hands back to the orchestrator.
#[derive(Debug, Default)]
pub struct SubagentOutcome {
    /// User-facing reply text (the orchestrator sends it, not the subagent).
    pub reply: String,
    /// Slot values the subagent extracted or confirmed.
    pub slot_updates: Slots,
    /// Stage the subagent believes the lead reached.
    pub stage_hint: Option<QualificationStage>,
    /// Analytics events to record, as (kind, payload) pairs.
    pub analytics: Vec<(String, serde_json::Value)>,
}

#[async_trait]
pub trait Subagent: Send + Sync {
    /// Name used in logs and analytics payloads.
    fn name(&self) -> &str;

    async fn handle(&self, ctx: &TurnContext<'_>) -> Result<SubagentOutcome>;
}
