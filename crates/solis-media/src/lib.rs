pub mod error;
pub mod ingest;
pub mod magic;

pub use error::{MediaError, Result};
pub use ingest::{Artifact, MediaPipeline, SpeechToText};
pub use magic::{detect, Confidence, MediaFormat};
