//! Google Generative Language provider — completion, embeddings, transcription.
//!
//! Primary model slot. Also the embedding backend (`embedContent`, 768-dim)
//! and the speech-to-text backend (audio handed to `generateContent` inline).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use solis_core::backoff::TokenBucket;

use crate::provider::{CompletionRequest, CompletionResponse, ModelProvider, ProviderError, Role};

const CALL_TIMEOUT: Duration = Duration::from_secs(20);
const EMBED_MODEL: &str = "text-embedding-004";

pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: TokenBucket,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "usageMetadata")]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_tokens: u32,
    #[serde(rename = "candidatesTokenCount", default)]
    candidate_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Option<EmbedValues>,
}

#[derive(Debug, Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

impl GeminiProvider {
    pub fn new(base_url: &str, api_key: &str, rate_per_sec: f64) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            bucket: TokenBucket::new(4, rate_per_sec),
        }
    }

    fn endpoint(&self, model: &str, op: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.base_url, model, op)
    }

    async fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ProviderError> {
        self.bucket.acquire().await;
        let resp = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .timeout(CALL_TIMEOUT)
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Gemini API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }
        Ok(resp)
    }

    /// Produce a 768-dim embedding for `text`.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = json!({
            "content": { "parts": [{ "text": text }] },
        });
        let url = self.endpoint(EMBED_MODEL, "embedContent");
        let resp = self.post(&url, &body).await?;
        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        parsed
            .embedding
            .map(|e| e.values)
            .ok_or(ProviderError::Empty)
    }

    /// Transcribe a WAV clip by asking the multimodal model for a verbatim
    /// transcript.
    pub async fn transcribe(&self, model: &str, wav: &[u8]) -> Result<String, ProviderError> {
        let b64 = base64::engine::general_purpose::STANDARD.encode(wav);
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "inline_data": { "mime_type": "audio/wav", "data": b64 } },
                    { "text": "Transcreva o áudio literalmente, sem comentários." }
                ],
            }],
            "generationConfig": { "temperature": 0.0 },
        });
        let url = self.endpoint(model, "generateContent");
        let resp = self.post(&url, &body).await?;
        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        extract_text(parsed).map(|(text, _, _)| text)
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let mut contents: Vec<serde_json::Value> = req
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    },
                    "parts": [{ "text": m.content }],
                })
            })
            .collect();

        // Attach images to the final user turn, as inline data parts.
        if !req.images.is_empty() {
            let image_parts: Vec<serde_json::Value> = req
                .images
                .iter()
                .map(|img| {
                    json!({ "inline_data": { "mime_type": img.mime, "data": img.data } })
                })
                .collect();
            match contents.last_mut().and_then(|c| c["parts"].as_array_mut()) {
                Some(parts) => parts.extend(image_parts),
                None => contents.push(json!({ "role": "user", "parts": image_parts })),
            }
        }

        let body = json!({
            "systemInstruction": { "parts": [{ "text": req.system }] },
            "contents": contents,
            "generationConfig": {
                "temperature": req.temperature,
                "maxOutputTokens": req.max_tokens,
            },
        });

        debug!(model = %req.model, turns = req.messages.len(), "sending request to Gemini");
        let url = self.endpoint(&req.model, "generateContent");
        let resp = self.post(&url, &body).await?;
        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let (text, tokens_in, tokens_out) = extract_text(parsed)?;
        Ok(CompletionResponse {
            text,
            model: req.model.clone(),
            tokens_in,
            tokens_out,
        })
    }
}

/// Adapter: the knowledge store's `Embedder` backed by Gemini `embedContent`.
pub struct GeminiEmbedder {
    provider: std::sync::Arc<GeminiProvider>,
}

impl GeminiEmbedder {
    pub fn new(provider: std::sync::Arc<GeminiProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl solis_knowledge::Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> solis_knowledge::Result<Vec<f32>> {
        self.provider
            .embed(text)
            .await
            .map_err(|e| solis_knowledge::KnowledgeError::Embedding(e.to_string()))
    }
}

/// Adapter: the media pipeline's `SpeechToText` backed by Gemini.
pub struct GeminiTranscriber {
    provider: std::sync::Arc<GeminiProvider>,
    model: String,
}

impl GeminiTranscriber {
    pub fn new(provider: std::sync::Arc<GeminiProvider>, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl solis_media::SpeechToText for GeminiTranscriber {
    async fn transcribe(&self, wav: &[u8]) -> solis_media::Result<String> {
        self.provider
            .transcribe(&self.model, wav)
            .await
            .map_err(|e| solis_media::MediaError::Transcription(e.to_string()))
    }
}

fn extract_text(resp: GenerateResponse) -> Result<(String, u32, u32), ProviderError> {
    let text = resp
        .candidates
        .and_then(|mut c| if c.is_empty() { None } else { Some(c.remove(0)) })
        .and_then(|c| c.content)
        .and_then(|c| c.parts)
        .map(|parts| {
            parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ProviderError::Empty);
    }
    let (tin, tout) = resp
        .usage
        .map(|u| (u.prompt_tokens, u.candidate_tokens))
        .unwrap_or((0, 0));
    Ok((text, tin, tout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_text_joins_parts() {
        let resp: GenerateResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Olá" }, { "text": ", João" }] }
            }],
            "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 4 }
        }))
        .unwrap();
        let (text, tin, tout) = extract_text(resp).unwrap();
        assert_eq!(text, "Olá, João");
        assert_eq!((tin, tout), (12, 4));
    }

    #[test]
    fn empty_candidates_is_an_error() {
        let resp: GenerateResponse = serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert!(matches!(extract_text(resp), Err(ProviderError::Empty)));
    }
}
