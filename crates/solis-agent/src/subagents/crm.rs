//! CRM subagent — pushes local lead state into the external pipeline.
//!
//! Every call is best-effort: local state is authoritative, failures are
//! logged and swallowed by the orchestrator. The external id captured on the
//! first upsert is stored back on the lead.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use solis_core::types::QualificationStage;
use solis_crm::{CrmClient, CrmLeadPayload, CrmTask};
use solis_store::types::{Lead, LeadPatch};
use solis_store::Store;

use crate::error::Result;

pub struct CrmAgent {
    client: Arc<CrmClient>,
    store: Arc<Store>,
}

impl CrmAgent {
    pub fn new(client: Arc<CrmClient>, store: Arc<Store>) -> Self {
        Self { client, store }
    }

    fn payload(lead: &Lead) -> CrmLeadPayload {
        CrmLeadPayload {
            name: lead.display_name.clone(),
            phone: lead.phone.to_string(),
            email: lead.email.clone(),
            stage: lead.stage,
            bill_amount: lead.bill_amount,
            score: lead.score,
        }
    }

    /// Upsert the lead in the CRM; first success stores the external id.
    pub async fn sync_lead(&self, lead: &Lead) -> Result<()> {
        match &lead.crm_external_id {
            Some(external_id) => {
                self.client.update_lead(external_id, &Self::payload(lead)).await?;
            }
            None => {
                let external_id = self.client.upsert_lead(&Self::payload(lead)).await?;
                self.store.update_lead(
                    &lead.id,
                    LeadPatch {
                        crm_external_id: Some(external_id.clone()),
                        ..Default::default()
                    },
                )?;
                info!(lead_id = %lead.id, external_id = %external_id, "lead created in CRM");
            }
        }
        Ok(())
    }

    pub async fn advance_stage(&self, lead: &Lead, stage: QualificationStage) -> Result<()> {
        if let Some(ref external_id) = lead.crm_external_id {
            self.client.advance_stage(external_id, stage).await?;
        }
        Ok(())
    }

    pub async fn add_note(&self, lead: &Lead, text: &str) -> Result<()> {
        if let Some(ref external_id) = lead.crm_external_id {
            self.client.add_note(external_id, text).await?;
        }
        Ok(())
    }

    /// Open a task for a human — used for investment-lead handoffs.
    pub async fn create_handoff_task(&self, lead: &Lead, reason: &str) -> Result<()> {
        if let Some(ref external_id) = lead.crm_external_id {
            self.client
                .create_task(
                    external_id,
                    &CrmTask {
                        text: format!("Handoff: {reason}"),
                        due_at: Utc::now() + Duration::hours(4),
                        task_type: "call".to_string(),
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Fire-and-forget wrapper the orchestrator uses: log, never propagate.
    pub async fn sync_best_effort(&self, lead: &Lead) {
        if let Err(e) = self.sync_lead(lead).await {
            warn!(lead_id = %lead.id, error = %e, "CRM sync failed (best-effort, ignored)");
        }
    }
}
