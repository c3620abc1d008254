use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media download failed: {0}")]
    Download(String),

    #[error("unrecognized media format")]
    UnknownFormat,

    #[error("media reference carries no source")]
    EmptySource,

    #[error("audio transcode failed: {0}")]
    Transcode(String),

    #[error("transcription came back empty")]
    EmptyTranscript,

    #[error("transcription failed: {0}")]
    Transcription(String),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    #[error("image processing failed: {0}")]
    Image(String),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MediaError>;
