//! HTTP client for the WhatsApp bridge.
//!
//! Four calls: send text, send reaction, typing presence, media download.
//! Every call carries a deadline; the bridge authenticates via an `apikey`
//! header, which is also attached to media downloads so gateway-hosted URLs
//! never reach downstream providers unauthenticated.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use solis_core::types::Phone;

use crate::error::{GatewayError, Result};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const MEDIA_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    instance: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SendTextResponse {
    key: Option<SentKey>,
}

#[derive(Debug, Deserialize)]
struct SentKey {
    id: String,
}

impl GatewayClient {
    pub fn new(base_url: &str, instance: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            instance: instance.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, path, self.instance)
    }

    /// Send a text message. Returns the gateway message id.
    pub async fn send_text(
        &self,
        phone: &Phone,
        text: &str,
        quoted: Option<&str>,
    ) -> Result<String> {
        let mut body = json!({
            "number": phone.to_jid(),
            "text": text,
        });
        if let Some(quoted_id) = quoted {
            body["quoted"] = json!({ "key": { "id": quoted_id } });
        }

        debug!(phone = %phone, chars = text.len(), "gateway: sendText");
        let resp = self
            .client
            .post(self.url("message/sendText"))
            .header("apikey", &self.api_key)
            .timeout(SEND_TIMEOUT)
            .json(&body)
            .send()
            .await?;

        let parsed: SendTextResponse = check(resp).await?.json().await.map_err(|e| {
            GatewayError::Shape(format!("sendText response: {e}"))
        })?;
        parsed
            .key
            .map(|k| k.id)
            .ok_or_else(|| GatewayError::Shape("sendText response missing key.id".to_string()))
    }

    /// React to an earlier message with an emoji.
    pub async fn send_reaction(
        &self,
        phone: &Phone,
        message_id: &str,
        emoji: &str,
    ) -> Result<()> {
        let body = json!({
            "key": {
                "remoteJid": phone.to_jid(),
                "id": message_id,
            },
            "reaction": emoji,
        });
        let resp = self
            .client
            .post(self.url("message/sendReaction"))
            .header("apikey", &self.api_key)
            .timeout(SEND_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    /// Show the "typing…" presence for `duration_ms`.
    pub async fn set_typing(&self, phone: &Phone, duration_ms: u64) -> Result<()> {
        let body = json!({
            "number": phone.to_jid(),
            "presence": "composing",
            "delay": duration_ms,
        });
        let resp = self
            .client
            .post(self.url("chat/sendPresence"))
            .header("apikey", &self.api_key)
            .timeout(SEND_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        // Presence failures never block a send — the reply matters more than
        // the animation.
        if let Err(e) = check(resp).await {
            warn!(phone = %phone, error = %e, "gateway: presence update failed");
        }
        Ok(())
    }

    /// Download gateway-hosted media with the auth token attached.
    pub async fn download_media(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "gateway: media download");
        let resp = self
            .client
            .get(url)
            .header("apikey", &self.api_key)
            .timeout(MEDIA_TIMEOUT)
            .send()
            .await?;
        let resp = check(resp).await?;
        Ok(resp.bytes().await?.to_vec())
    }

    /// Whether `url` points at the bridge (and therefore needs our auth token).
    pub fn is_gateway_url(&self, url: &str) -> bool {
        url.starts_with(&self.base_url)
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %message, "gateway API error");
    Err(GatewayError::Api {
        status: status.as_u16(),
        message,
    })
}
