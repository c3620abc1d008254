//! Humanized sender — paced, chunked replies that read like a person typing.
//!
//! Guarantees: a typing indicator precedes every chunk, chunks arrive in
//! order, no two sends overlap for the same lead, and the whole reply stays
//! under a configured ceiling. Retryable gateway errors get three attempts
//! with 1s/2s/4s backoff before the chunk is reported failed.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use solis_core::types::Phone;

use crate::client::GatewayClient;
use crate::error::{GatewayError, Result};

/// Reading speed used to size the typing indicator.
const CHARS_PER_SEC: u64 = 40;
const TYPING_MIN_MS: u64 = 1_000;
const SEND_RETRIES: u32 = 3;

pub struct HumanizedSender {
    client: Arc<GatewayClient>,
    /// One lock per lead; holding it serializes every outbound path
    /// (live replies, follow-ups, reminders).
    locks: DashMap<String, Arc<Mutex<()>>>,
    typing_max_ms: u64,
    ceiling: Duration,
}

/// Outcome of one humanized send.
#[derive(Debug)]
pub struct SendReport {
    /// Gateway ids of the chunks that went out, in order.
    pub sent_ids: Vec<String>,
    /// Chunks that exhausted their retries, with the final error.
    pub failed: Vec<(String, String)>,
}

impl SendReport {
    pub fn all_sent(&self) -> bool {
        self.failed.is_empty()
    }
}

impl HumanizedSender {
    pub fn new(client: Arc<GatewayClient>, typing_max_ms: u64, ceiling_secs: u64) -> Self {
        Self {
            client,
            locks: DashMap::new(),
            typing_max_ms,
            ceiling: Duration::from_secs(ceiling_secs),
        }
    }

    pub fn client(&self) -> &GatewayClient {
        &self.client
    }

    fn lock_for(&self, phone: &Phone) -> Arc<Mutex<()>> {
        self.locks
            .entry(phone.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Send `text` as 1–3 paced chunks. Takes the per-lead lock for the whole
    /// delivery, so a follow-up can never interleave with a live reply.
    pub async fn send(&self, phone: &Phone, text: &str) -> Result<SendReport> {
        let chunks = split_reply(text);
        let lock = self.lock_for(phone);
        let _guard = lock.lock().await;

        let started = Instant::now();
        let mut report = SendReport {
            sent_ids: Vec::new(),
            failed: Vec::new(),
        };

        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            // Budget check: past the ceiling we drop the pacing, not the text.
            let over_budget = started.elapsed() >= self.ceiling;
            if !over_budget {
                let typing_ms = typing_duration_ms(chunk.len(), self.typing_max_ms);
                let _ = self.client.set_typing(phone, typing_ms).await;
                tokio::time::sleep(Duration::from_millis(typing_ms)).await;
            }

            match self.send_chunk_with_retry(phone, &chunk).await {
                Ok(id) => report.sent_ids.push(id),
                Err(e) => {
                    warn!(phone = %phone, error = %e, "chunk delivery failed after retries");
                    report.failed.push((chunk, e.to_string()));
                    continue;
                }
            }

            if i + 1 < total && !over_budget {
                tokio::time::sleep(inter_chunk_pause()).await;
            }
        }

        debug!(
            phone = %phone,
            sent = report.sent_ids.len(),
            failed = report.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "humanized send complete"
        );
        Ok(report)
    }

    /// React without pacing (still serialized per lead).
    pub async fn react(&self, phone: &Phone, message_id: &str, emoji: &str) -> Result<()> {
        let lock = self.lock_for(phone);
        let _guard = lock.lock().await;
        self.client.send_reaction(phone, message_id, emoji).await
    }

    async fn send_chunk_with_retry(&self, phone: &Phone, chunk: &str) -> Result<String> {
        let mut last_err: Option<GatewayError> = None;
        for attempt in 0..SEND_RETRIES {
            match self.client.send_text(phone, chunk, None).await {
                Ok(id) => return Ok(id),
                Err(e) if e.is_retryable() && attempt + 1 < SEND_RETRIES => {
                    let delay = Duration::from_secs(1 << attempt); // 1s, 2s, 4s
                    warn!(phone = %phone, attempt, error = %e, "send failed, retrying");
                    tokio::time::sleep(delay).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| GatewayError::Deadline {
            phone: phone.to_string(),
        }))
    }
}

/// Typing indicator duration: `len / 40 cps`, clamped to [1s, max].
pub fn typing_duration_ms(chunk_len: usize, max_ms: u64) -> u64 {
    let ms = (chunk_len as u64).saturating_mul(1000) / CHARS_PER_SEC;
    ms.clamp(TYPING_MIN_MS, max_ms)
}

fn inter_chunk_pause() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(500..=1500))
}

/// Split a reply into at most three chunks on paragraph boundaries.
///
/// Single-paragraph replies stay whole. Longer replies merge paragraphs
/// greedily so the chunk count never exceeds three.
pub fn split_reply(text: &str) -> Vec<String> {
    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    match paragraphs.len() {
        0 => vec![String::new()],
        1 => vec![paragraphs[0].to_string()],
        n if n <= 3 => paragraphs.iter().map(|p| p.to_string()).collect(),
        n => {
            // Merge into three buckets of roughly equal paragraph count.
            let per = n.div_ceil(3);
            paragraphs
                .chunks(per)
                .map(|group| group.join("\n\n"))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_duration_clamps_low() {
        assert_eq!(typing_duration_ms(0, 5_000), 1_000);
        assert_eq!(typing_duration_ms(10, 5_000), 1_000);
    }

    #[test]
    fn typing_duration_scales_with_length() {
        // 120 chars / 40 cps = 3s
        assert_eq!(typing_duration_ms(120, 5_000), 3_000);
    }

    #[test]
    fn typing_duration_clamps_high() {
        assert_eq!(typing_duration_ms(10_000, 5_000), 5_000);
    }

    #[test]
    fn single_paragraph_is_one_chunk() {
        let chunks = split_reply("Olá! Tudo bem?");
        assert_eq!(chunks, vec!["Olá! Tudo bem?".to_string()]);
    }

    #[test]
    fn three_paragraphs_stay_three_chunks() {
        let chunks = split_reply("a\n\nb\n\nc");
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn many_paragraphs_merge_to_three() {
        let text = (0..7).map(|i| format!("p{i}")).collect::<Vec<_>>().join("\n\n");
        let chunks = split_reply(&text);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].contains("p0"));
        assert!(chunks[2].contains("p6"));
    }

    #[test]
    fn empty_reply_is_single_empty_chunk() {
        assert_eq!(split_reply("").len(), 1);
    }
}
