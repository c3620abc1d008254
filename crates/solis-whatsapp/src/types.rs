//! Wire types for the WhatsApp bridge.
//!
//! The bridge posts `messages.upsert` / `messages.update` / `connection.update`
//! events; the structs here mirror its JSON. `InboundEvent` is the normalized
//! shape handed to the orchestrator after intake validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use solis_core::types::{ContentType, Phone};

/// Raw webhook body from the bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    #[serde(default)]
    pub instance: String,
    pub data: Option<EventData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    pub key: MessageKey,
    #[serde(default)]
    pub push_name: Option<String>,
    pub message: Option<MessageContent>,
    #[serde(default)]
    pub message_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub remote_jid: String,
    #[serde(default)]
    pub from_me: bool,
    pub id: String,
}

/// The bridge nests content under one key per message kind.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    pub conversation: Option<String>,
    pub extended_text_message: Option<ExtendedText>,
    pub image_message: Option<MediaMessage>,
    pub audio_message: Option<MediaMessage>,
    pub document_message: Option<MediaMessage>,
    pub reaction_message: Option<ReactionMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtendedText {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    pub url: Option<String>,
    pub mimetype: Option<String>,
    pub caption: Option<String>,
    /// Some bridge builds inline small payloads.
    pub base64: Option<String>,
    pub file_length: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionMessage {
    pub text: String,
    pub key: Option<MessageKey>,
}

/// Where a piece of media can be fetched from, in preference order:
/// raw bytes, then base64, then a local path, then the authenticated URL.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaRef {
    pub mime: Option<String>,
    pub caption: Option<String>,
    /// Already-decoded bytes, when a caller hands them over directly.
    pub bytes: Option<Vec<u8>>,
    /// Inline base64 payload, when the bridge included one.
    pub base64: Option<String>,
    /// Local filesystem path (test fixtures, CLI ingestion).
    pub local_path: Option<String>,
    /// Gateway-hosted URL; must be fetched with the bridge auth token.
    pub url: Option<String>,
}

/// Normalized inbound event, after intake validation and dedupe.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub phone: Phone,
    pub push_name: Option<String>,
    pub content_type: ContentType,
    pub text: Option<String>,
    pub media: Option<MediaRef>,
    pub gateway_message_id: String,
    pub server_ts: DateTime<Utc>,
}

impl WebhookPayload {
    /// Normalize a `messages.upsert` into an `InboundEvent`.
    ///
    /// Returns `None` for events we deliberately ignore: non-upsert events,
    /// echoes of our own sends (`fromMe`), and empty bodies.
    pub fn into_inbound(self) -> Option<InboundEvent> {
        if self.event != "messages.upsert" {
            return None;
        }
        let data = self.data?;
        if data.key.from_me {
            return None;
        }
        let message = data.message?;
        let server_ts = data
            .message_timestamp
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);

        let phone = Phone::from_jid(&data.key.remote_jid);
        let base = InboundEvent {
            phone,
            push_name: data.push_name,
            content_type: ContentType::Text,
            text: None,
            media: None,
            gateway_message_id: data.key.id,
            server_ts,
        };

        if let Some(text) = message.conversation {
            return Some(InboundEvent {
                text: Some(text),
                ..base
            });
        }
        if let Some(ext) = message.extended_text_message {
            return Some(InboundEvent {
                text: Some(ext.text),
                ..base
            });
        }
        if let Some(img) = message.image_message {
            return Some(InboundEvent {
                content_type: ContentType::Image,
                text: img.caption.clone(),
                media: Some(media_ref(img)),
                ..base
            });
        }
        if let Some(audio) = message.audio_message {
            return Some(InboundEvent {
                content_type: ContentType::Audio,
                text: None,
                media: Some(media_ref(audio)),
                ..base
            });
        }
        if let Some(doc) = message.document_message {
            return Some(InboundEvent {
                content_type: ContentType::Document,
                text: doc.caption.clone(),
                media: Some(media_ref(doc)),
                ..base
            });
        }
        if let Some(reaction) = message.reaction_message {
            return Some(InboundEvent {
                content_type: ContentType::Reaction,
                text: Some(reaction.text),
                ..base
            });
        }
        None
    }
}

fn media_ref(m: MediaMessage) -> MediaRef {
    MediaRef {
        mime: m.mimetype,
        caption: m.caption,
        base64: m.base64,
        url: m.url,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(body: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn text_message_normalizes() {
        let payload = upsert(serde_json::json!({
            "event": "messages.upsert",
            "instance": "main",
            "data": {
                "key": {"remoteJid": "5581999999999@s.whatsapp.net", "fromMe": false, "id": "ABC1"},
                "pushName": "João",
                "message": {"conversation": "Oi, quero saber sobre energia solar"},
                "messageTimestamp": 1749550000
            }
        }));
        let ev = payload.into_inbound().unwrap();
        assert_eq!(ev.phone.as_str(), "+5581999999999");
        assert_eq!(ev.content_type, ContentType::Text);
        assert_eq!(ev.text.as_deref(), Some("Oi, quero saber sobre energia solar"));
        assert_eq!(ev.gateway_message_id, "ABC1");
    }

    #[test]
    fn own_echo_is_dropped() {
        let payload = upsert(serde_json::json!({
            "event": "messages.upsert",
            "data": {
                "key": {"remoteJid": "1@s.whatsapp.net", "fromMe": true, "id": "SELF"},
                "message": {"conversation": "echo"}
            }
        }));
        assert!(payload.into_inbound().is_none());
    }

    #[test]
    fn non_upsert_event_is_dropped() {
        let payload = upsert(serde_json::json!({
            "event": "connection.update",
            "data": null
        }));
        assert!(payload.into_inbound().is_none());
    }

    #[test]
    fn image_with_caption_keeps_both() {
        let payload = upsert(serde_json::json!({
            "event": "messages.upsert",
            "data": {
                "key": {"remoteJid": "2@s.whatsapp.net", "fromMe": false, "id": "IMG1"},
                "message": {"imageMessage": {
                    "url": "https://bridge/media/IMG1",
                    "mimetype": "image/png",
                    "caption": "minha conta"
                }}
            }
        }));
        let ev = payload.into_inbound().unwrap();
        assert_eq!(ev.content_type, ContentType::Image);
        assert_eq!(ev.text.as_deref(), Some("minha conta"));
        let media = ev.media.unwrap();
        assert_eq!(media.url.as_deref(), Some("https://bridge/media/IMG1"));
        assert_eq!(media.mime.as_deref(), Some("image/png"));
    }

    #[test]
    fn reaction_normalizes() {
        let payload = upsert(serde_json::json!({
            "event": "messages.upsert",
            "data": {
                "key": {"remoteJid": "3@s.whatsapp.net", "fromMe": false, "id": "R1"},
                "message": {"reactionMessage": {"text": "👍"}}
            }
        }));
        let ev = payload.into_inbound().unwrap();
        assert_eq!(ev.content_type, ContentType::Reaction);
        assert_eq!(ev.text.as_deref(), Some("👍"));
    }
}
