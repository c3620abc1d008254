//! Typed client for the external calendar provider.
//!
//! CRUD on events with attendee lists. Every call carries a 10 s deadline and
//! one retry on transient failures.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use solis_core::backoff::Backoff;

use crate::error::{CalendarError, Result};
use crate::types::{EventDraft, EventPatch, ExternalEvent};

const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_RETRIES: u32 = 1;

pub struct CalendarClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    calendar_id: String,
    backoff: Backoff,
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<ExternalEvent>,
}

impl CalendarClient {
    pub fn new(base_url: &str, api_key: &str, calendar_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            calendar_id: calendar_id.to_string(),
            backoff: Backoff::default(),
        }
    }

    fn events_url(&self) -> String {
        format!("{}/calendars/{}/events", self.base_url, self.calendar_id)
    }

    pub async fn list_events(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExternalEvent>> {
        let url = self.events_url();
        let resp = self
            .with_retry(|| {
                self.client
                    .get(&url)
                    .bearer_auth(&self.api_key)
                    .query(&[
                        ("timeMin", from.to_rfc3339()),
                        ("timeMax", to.to_rfc3339()),
                    ])
                    .timeout(CALL_TIMEOUT)
            })
            .await?;
        let list: EventList = resp.json().await?;
        Ok(list.items)
    }

    pub async fn create_event(&self, draft: &EventDraft) -> Result<ExternalEvent> {
        let url = self.events_url();
        debug!(summary = %draft.summary, start = %draft.start, "calendar: create event");
        let resp = self
            .with_retry(|| {
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .timeout(CALL_TIMEOUT)
                    .json(draft)
            })
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn update_event(&self, id: &str, patch: &EventPatch) -> Result<ExternalEvent> {
        let url = format!("{}/{}", self.events_url(), id);
        let resp = self
            .with_retry(|| {
                self.client
                    .patch(&url)
                    .bearer_auth(&self.api_key)
                    .timeout(CALL_TIMEOUT)
                    .json(patch)
            })
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn delete_event(&self, id: &str) -> Result<()> {
        let url = format!("{}/{}", self.events_url(), id);
        let resp = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .timeout(CALL_TIMEOUT)
            .send()
            .await?;
        // Deleting an already-gone event is fine.
        if resp.status().as_u16() == 404 {
            return Ok(());
        }
        check(resp).await?;
        Ok(())
    }

    async fn with_retry<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last: Option<CalendarError> = None;
        for attempt in 0..=CALL_RETRIES {
            let result = match build().send().await {
                Ok(resp) => check(resp).await,
                Err(e) => Err(CalendarError::Http(e)),
            };
            match result {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_retryable() && attempt < CALL_RETRIES => {
                    warn!(attempt, error = %e, "calendar call failed, retrying");
                    tokio::time::sleep(self.backoff.delay(attempt)).await;
                    last = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last.unwrap_or(CalendarError::NotConfigured))
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(CalendarError::Api {
        status: status.as_u16(),
        message,
    })
}
