//! Typed client over the CRM REST API.
//!
//! Best-effort by contract: local state is authoritative, so every failure
//! here is logged by the caller and never blocks a conversation. Retries with
//! jittered exponential backoff on 429/5xx, gated by the circuit breaker.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use solis_core::backoff::Backoff;
use solis_core::config::RetryConfig;
use solis_core::types::QualificationStage;

use crate::breaker::CircuitBreaker;
use crate::error::{CrmError, Result};
use crate::mapping::pipeline_stage_id;

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CrmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    pipeline_id: Option<String>,
    breaker: CircuitBreaker,
    backoff: Backoff,
    retry_max: u32,
}

/// Lead fields pushed to the CRM.
#[derive(Debug, Clone, Serialize)]
pub struct CrmLeadPayload {
    pub name: Option<String>,
    pub phone: String,
    pub email: Option<String>,
    pub stage: QualificationStage,
    pub bill_amount: Option<f64>,
    pub score: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrmTask {
    pub text: String,
    pub due_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub task_type: String,
}

#[derive(Debug, Deserialize)]
struct UpsertResponse {
    id: Option<String>,
}

impl CrmClient {
    pub fn new(base_url: &str, api_key: &str, pipeline_id: Option<String>, retry: &RetryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            pipeline_id,
            breaker: CircuitBreaker::new(
                retry.circuit_fails,
                Duration::from_secs(retry.circuit_cooldown_sec),
            ),
            backoff: Backoff::default(),
            retry_max: retry.retry_max,
        }
    }

    /// Create or update the lead; returns the external id.
    pub async fn upsert_lead(&self, payload: &CrmLeadPayload) -> Result<String> {
        let body = json!({
            "name": payload.name,
            "phone": payload.phone,
            "email": payload.email,
            "pipeline_id": self.pipeline_id,
            "stage_id": pipeline_stage_id(payload.stage),
            "custom_fields": {
                "bill_amount": payload.bill_amount,
                "qualification_score": payload.score,
            },
        });
        let resp = self.call("POST", "/leads", Some(body)).await?;
        let parsed: UpsertResponse = resp
            .json()
            .await
            .map_err(|e| CrmError::Shape(format!("upsert response: {e}")))?;
        parsed
            .id
            .ok_or_else(|| CrmError::Shape("upsert response missing id".to_string()))
    }

    pub async fn update_lead(&self, external_id: &str, payload: &CrmLeadPayload) -> Result<()> {
        let body = json!({
            "name": payload.name,
            "email": payload.email,
            "stage_id": pipeline_stage_id(payload.stage),
            "custom_fields": {
                "bill_amount": payload.bill_amount,
                "qualification_score": payload.score,
            },
        });
        self.call("PATCH", &format!("/leads/{external_id}"), Some(body))
            .await?;
        Ok(())
    }

    /// Move the lead's card to the stage's pipeline column.
    pub async fn advance_stage(&self, external_id: &str, stage: QualificationStage) -> Result<()> {
        let body = json!({ "stage_id": pipeline_stage_id(stage) });
        self.call("PATCH", &format!("/leads/{external_id}/stage"), Some(body))
            .await?;
        Ok(())
    }

    pub async fn add_note(&self, external_id: &str, text: &str) -> Result<()> {
        let body = json!({ "text": text });
        self.call("POST", &format!("/leads/{external_id}/notes"), Some(body))
            .await?;
        Ok(())
    }

    pub async fn create_task(&self, external_id: &str, task: &CrmTask) -> Result<()> {
        self.call(
            "POST",
            &format!("/leads/{external_id}/tasks"),
            Some(serde_json::to_value(task).unwrap_or_default()),
        )
        .await?;
        Ok(())
    }

    async fn call(
        &self,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        if !self.breaker.allow() {
            return Err(CrmError::CircuitOpen);
        }

        let url = format!("{}{}", self.base_url, path);
        let mut last: Option<CrmError> = None;
        for attempt in 0..=self.retry_max {
            let mut req = match method {
                "POST" => self.client.post(&url),
                "PATCH" => self.client.patch(&url),
                _ => self.client.get(&url),
            }
            .bearer_auth(&self.api_key)
            .timeout(CALL_TIMEOUT);
            if let Some(ref b) = body {
                req = req.json(b);
            }

            let result = match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        Ok(resp)
                    } else {
                        let message = resp.text().await.unwrap_or_default();
                        Err(CrmError::Api {
                            status: status.as_u16(),
                            message,
                        })
                    }
                }
                Err(e) => Err(CrmError::Http(e)),
            };

            match result {
                Ok(resp) => {
                    self.breaker.record_success();
                    debug!(method, path, "CRM call ok");
                    return Ok(resp);
                }
                Err(e) if e.is_retryable() && attempt < self.retry_max => {
                    warn!(method, path, attempt, error = %e, "CRM call failed, retrying");
                    tokio::time::sleep(self.backoff.delay(attempt)).await;
                    last = Some(e);
                }
                Err(e) => {
                    self.breaker.record_failure();
                    return Err(e);
                }
            }
        }

        self.breaker.record_failure();
        Err(last.unwrap_or(CrmError::NotConfigured))
    }
}
