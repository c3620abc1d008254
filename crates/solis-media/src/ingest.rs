//! Media ingestion pipeline: fetch → classify → transform → model-ready artifact.
//!
//! Source preference: inline bytes → base64 → local path → authenticated
//! gateway URL. Gateway URLs are always fetched through the bridge client so
//! the auth token travels with them; raw URLs never reach model providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use image::ImageReader;
use rand::Rng;
use tokio::process::Command;
use tracing::{debug, warn};

use solis_whatsapp::types::MediaRef;
use solis_whatsapp::GatewayClient;

use crate::error::{MediaError, Result};
use crate::magic::{detect, MediaFormat};

/// Images above this size are downscaled before the vision model sees them.
const IMAGE_BYTE_LIMIT: usize = 1024 * 1024;
/// Pages extracted from a document before we stop reading.
const DOC_PAGE_LIMIT: u32 = 20;
const DOWNLOAD_RETRIES: u32 = 2;

/// Model-ready product of ingestion.
#[derive(Debug, Clone)]
pub enum Artifact {
    Image {
        bytes: Vec<u8>,
        mime: String,
        ocr_text: Option<String>,
    },
    Audio {
        transcript: String,
        duration_sec: f64,
    },
    Document {
        extracted_text: String,
        page_count: u32,
    },
}

/// Speech-to-text backend. Implemented by the model provider layer.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;
}

pub struct MediaPipeline {
    gateway: Arc<GatewayClient>,
    stt: Arc<dyn SpeechToText>,
}

impl MediaPipeline {
    pub fn new(gateway: Arc<GatewayClient>, stt: Arc<dyn SpeechToText>) -> Self {
        Self { gateway, stt }
    }

    /// Run the full pipeline for one media reference.
    pub async fn ingest(&self, media: &MediaRef) -> Result<Artifact> {
        let bytes = self.fetch(media).await?;
        let (format, confidence) = detect(&bytes, media.mime.as_deref())
            .ok_or(MediaError::UnknownFormat)?;
        debug!(?format, ?confidence, bytes = bytes.len(), "media classified");

        match format {
            MediaFormat::Png | MediaFormat::Jpeg => self.image_artifact(bytes, format),
            MediaFormat::Ogg => self.audio_artifact(bytes).await,
            MediaFormat::Pdf => self.pdf_artifact(bytes).await,
            MediaFormat::Docx => self.docx_artifact(bytes),
            MediaFormat::Zip => Err(MediaError::UnknownFormat),
        }
    }

    /// Resolve the media bytes, trying sources in preference order:
    /// inline bytes → base64 → local path → authenticated URL.
    async fn fetch(&self, media: &MediaRef) -> Result<Vec<u8>> {
        if let Some(ref bytes) = media.bytes {
            return Ok(bytes.clone());
        }
        if let Some(ref b64) = media.base64 {
            return Ok(base64::engine::general_purpose::STANDARD.decode(b64)?);
        }
        if let Some(ref path) = media.local_path {
            return Ok(tokio::fs::read(path).await?);
        }
        if let Some(ref url) = media.url {
            return self.download(url).await;
        }
        Err(MediaError::EmptySource)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let mut last_err = String::new();
        for attempt in 0..=DOWNLOAD_RETRIES {
            match self.gateway.download_media(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt < DOWNLOAD_RETRIES => {
                    let jitter = rand::thread_rng().gen_range(0..500);
                    let delay = Duration::from_millis(1000 * (attempt as u64 + 1) + jitter);
                    warn!(url, attempt, error = %e, "media download failed, retrying");
                    tokio::time::sleep(delay).await;
                    last_err = e.to_string();
                }
                Err(e) => return Err(MediaError::Download(e.to_string())),
            }
        }
        Err(MediaError::Download(last_err))
    }

    fn image_artifact(&self, bytes: Vec<u8>, format: MediaFormat) -> Result<Artifact> {
        // Downscaling re-encodes as JPEG regardless of the input format.
        let (bytes, mime) = if bytes.len() > IMAGE_BYTE_LIMIT {
            (downscale_to_limit(&bytes)?, "image/jpeg")
        } else {
            match format {
                MediaFormat::Png => (bytes, "image/png"),
                _ => (bytes, "image/jpeg"),
            }
        };
        Ok(Artifact::Image {
            bytes,
            mime: mime.to_string(),
            ocr_text: None,
        })
    }

    async fn audio_artifact(&self, bytes: Vec<u8>) -> Result<Artifact> {
        let wav = transcode_opus_to_wav(&bytes).await?;
        let duration_sec = wav_duration_secs(&wav).unwrap_or(0.0);
        let transcript = self.stt.transcribe(&wav).await?;
        if transcript.trim().is_empty() {
            return Err(MediaError::EmptyTranscript);
        }
        Ok(Artifact::Audio {
            transcript,
            duration_sec,
        })
    }

    async fn pdf_artifact(&self, bytes: Vec<u8>) -> Result<Artifact> {
        let text = extract_pdf_text(bytes).await?;
        if text.trim().is_empty() {
            return Err(MediaError::Extraction("no text in document".to_string()));
        }
        // Pages are separated by form feeds.
        let page_count = (text.matches('\u{c}').count() as u32 + 1).min(DOC_PAGE_LIMIT);
        Ok(Artifact::Document {
            extracted_text: text,
            page_count,
        })
    }

    fn docx_artifact(&self, bytes: Vec<u8>) -> Result<Artifact> {
        let text = extract_docx_text(&bytes)?;
        if text.trim().is_empty() {
            return Err(MediaError::Extraction("no text in document".to_string()));
        }
        Ok(Artifact::Document {
            extracted_text: text,
            page_count: 1,
        })
    }
}

/// Shrink an image until its encoded size fits the vision-model limit.
///
/// Halves the longest edge per round; JPEG re-encode at quality 80. Three
/// rounds is always enough for WhatsApp-sized photos.
pub fn downscale_to_limit(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut img = ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| MediaError::Image(e.to_string()))?
        .decode()
        .map_err(|e| MediaError::Image(e.to_string()))?;

    for _ in 0..3 {
        let (w, h) = (img.width(), img.height());
        img = img.resize(w / 2, h / 2, image::imageops::FilterType::Triangle);

        let mut out = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut out);
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, 80);
        // JPEG has no alpha channel; flatten before encoding.
        img.to_rgb8()
            .write_with_encoder(encoder)
            .map_err(|e| MediaError::Image(e.to_string()))?;

        if out.len() <= IMAGE_BYTE_LIMIT {
            return Ok(out);
        }
    }
    Err(MediaError::Image(
        "image still above size limit after downscaling".to_string(),
    ))
}

/// OPUS (Ogg) → WAV via ffmpeg on stdin/stdout.
async fn transcode_opus_to_wav(opus: &[u8]) -> Result<Vec<u8>> {
    use tokio::io::AsyncWriteExt;

    let ffmpeg = which::which("ffmpeg")
        .map_err(|_| MediaError::Transcode("ffmpeg not found on PATH".to_string()))?;

    let mut child = Command::new(ffmpeg)
        .args(["-i", "pipe:0", "-f", "wav", "-ar", "16000", "-ac", "1", "pipe:1"])
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| MediaError::Transcode(e.to_string()))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(opus)
            .await
            .map_err(|e| MediaError::Transcode(e.to_string()))?;
        drop(stdin);
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| MediaError::Transcode(e.to_string()))?;
    if !output.status.success() || output.stdout.is_empty() {
        return Err(MediaError::Transcode(format!(
            "ffmpeg exited with {}",
            output.status
        )));
    }
    Ok(output.stdout)
}

/// PDF text via pdf-extract, truncated to the first [`DOC_PAGE_LIMIT`] pages
/// (pages arrive separated by form feeds). Parsing a big scan is CPU-heavy,
/// so it runs on the blocking pool.
async fn extract_pdf_text(pdf: Vec<u8>) -> Result<String> {
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&pdf))
        .await
        .map_err(|e| MediaError::Extraction(e.to_string()))?
        .map_err(|e| MediaError::Extraction(e.to_string()))?;

    let truncated: String = text
        .split('\u{c}')
        .take(DOC_PAGE_LIMIT as usize)
        .collect::<Vec<_>>()
        .join("\u{c}");
    Ok(truncated)
}

/// DOCX text: read the main document part out of the ZIP container and strip
/// the XML tags.
fn extract_docx_text(docx: &[u8]) -> Result<String> {
    use std::io::Read;

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(docx))
        .map_err(|e| MediaError::Extraction(e.to_string()))?;
    let mut part = archive
        .by_name("word/document.xml")
        .map_err(|e| MediaError::Extraction(format!("word/document.xml: {e}")))?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .map_err(|e| MediaError::Extraction(e.to_string()))?;
    Ok(strip_xml_tags(&xml))
}

/// Drop XML tags, turning paragraph closes into newlines.
fn strip_xml_tags(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() / 4);
    let mut in_tag = false;
    let mut tag = String::new();
    for ch in xml.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' => {
                in_tag = false;
                if tag.starts_with("/w:p") {
                    out.push('\n');
                }
            }
            c if in_tag => tag.push(c),
            c => out.push(c),
        }
    }
    out
}

/// Duration of a canonical PCM WAV from its header fields.
fn wav_duration_secs(wav: &[u8]) -> Option<f64> {
    // byte rate lives at offset 28, data chunk size at offset 40 for the
    // plain 44-byte header ffmpeg emits.
    if wav.len() < 44 || &wav[0..4] != b"RIFF" || &wav[8..12] != b"WAVE" {
        return None;
    }
    let byte_rate = u32::from_le_bytes([wav[28], wav[29], wav[30], wav[31]]) as f64;
    let data_len = (wav.len() - 44) as f64;
    if byte_rate > 0.0 {
        Some(data_len / byte_rate)
    } else {
        None
    }
}
