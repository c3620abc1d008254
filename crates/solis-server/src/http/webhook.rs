//! Webhook ingress — POST /webhook.
//!
//! Validates the payload shape, authenticates the caller (HMAC signature or
//! shared token), drops self-echoes and non-message events, dedupes on the
//! gateway message id, and hands accepted events to the per-lead mailboxes.
//! 200 on accept or deliberate ignore, 4xx on malformed/unauthenticated,
//! 5xx only on internal failure (the gateway retries those).

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, warn};

use solis_whatsapp::types::WebhookPayload;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(ref expected) = state.config.server.webhook_token {
        authenticate(&headers, &body, expected).map_err(|reason| {
            warn!(reason = %reason, "webhook authentication failed");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "authentication failed"})),
            )
        })?;
    }

    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "malformed webhook body");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid JSON body"})),
        )
    })?;

    let event_name = payload.event.clone();
    let Some(inbound) = payload.into_inbound() else {
        // connection.update, messages.update, our own echoes: acknowledged
        // and dropped.
        return Ok(Json(json!({"ok": true, "ignored": event_name})));
    };

    if state.dedupe.check_and_insert(&inbound.gateway_message_id) {
        info!(gateway_id = %inbound.gateway_message_id, "duplicate webhook ignored");
        return Ok(Json(json!({"ok": true, "duplicate": true})));
    }

    info!(
        phone = %inbound.phone,
        content_type = %inbound.content_type,
        gateway_id = %inbound.gateway_message_id,
        "inbound event accepted"
    );
    state.intake.enqueue(inbound);
    Ok(Json(json!({"ok": true})))
}

/// Accept either a GitHub-style HMAC signature over the body or the shared
/// token in `apikey` / `Authorization: Bearer`.
fn authenticate(headers: &HeaderMap, body: &Bytes, expected: &str) -> Result<(), String> {
    if let Some(sig_header) = headers.get("x-hub-signature-256").and_then(|v| v.to_str().ok()) {
        let sig_hex = sig_header
            .strip_prefix("sha256=")
            .ok_or_else(|| "malformed X-Hub-Signature-256 header".to_string())?;
        let expected_mac =
            hex::decode(sig_hex).map_err(|_| "signature is not valid hex".to_string())?;
        let mut mac = HmacSha256::new_from_slice(expected.as_bytes())
            .map_err(|_| "invalid HMAC key length".to_string())?;
        mac.update(body);
        return mac
            .verify_slice(&expected_mac)
            .map_err(|_| "HMAC signature mismatch".to_string());
    }

    let presented = headers
        .get("apikey")
        .or_else(|| headers.get("authorization"))
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v))
        .ok_or_else(|| "missing credentials".to_string())?;

    if presented == expected {
        Ok(())
    } else {
        Err("token mismatch".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_headers(body: &[u8], secret: &str) -> HeaderMap {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-hub-signature-256",
            format!("sha256={sig}").parse().unwrap(),
        );
        headers
    }

    #[test]
    fn hmac_signature_verifies() {
        let body = Bytes::from_static(b"{\"event\":\"messages.upsert\"}");
        let headers = signed_headers(&body, "secret");
        assert!(authenticate(&headers, &body, "secret").is_ok());
        assert!(authenticate(&headers, &body, "other").is_err());
    }

    #[test]
    fn apikey_header_verifies() {
        let body = Bytes::from_static(b"{}");
        let mut headers = HeaderMap::new();
        headers.insert("apikey", "tok".parse().unwrap());
        assert!(authenticate(&headers, &body, "tok").is_ok());
        assert!(authenticate(&headers, &body, "nope").is_err());
    }

    #[test]
    fn bearer_header_verifies() {
        let body = Bytes::from_static(b"{}");
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer tok".parse().unwrap());
        assert!(authenticate(&headers, &body, "tok").is_ok());
    }

    #[test]
    fn missing_credentials_fail() {
        let body = Bytes::from_static(b"{}");
        assert!(authenticate(&HeaderMap::new(), &body, "tok").is_err());
    }
}
