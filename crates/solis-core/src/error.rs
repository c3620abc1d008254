use thiserror::Error;

/// Recovery posture for an error — decides what the orchestrator does with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Network flake, 5xx, timeout: retry with backoff, circuit-break after threshold.
    Transient,
    /// 4xx / malformed payload: log, never retry.
    ClientProtocol,
    /// Schema violation or invalid optional foreign key: abort the turn after rollback.
    DataIntegrity,
    /// Model refused or returned nothing usable: fall back to a canned reply.
    ModelContent,
    /// Media could not be read: ask the user to type the value instead.
    MediaExtraction,
    /// Config/bootstrap problems: exit non-zero at startup only.
    Fatal,
}

#[derive(Debug, Error)]
pub enum SolisError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Model provider error: {0}")]
    Model(String),

    #[error("Media ingestion error: {0}")]
    Media(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("CRM error: {0}")]
    Crm(String),

    #[error("Calendar error: {0}")]
    Calendar(String),

    #[error("Knowledge store error: {0}")]
    Knowledge(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Turn budget exceeded after {ms}ms")]
    TurnBudget { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SolisError {
    /// Classify for the §7-style propagation decision.
    pub fn recovery(&self) -> Recovery {
        match self {
            SolisError::Config(_) => Recovery::Fatal,
            SolisError::Gateway(_) => Recovery::Transient,
            SolisError::Model(_) => Recovery::ModelContent,
            SolisError::Media(_) => Recovery::MediaExtraction,
            SolisError::Database(_) => Recovery::Transient,
            SolisError::DataIntegrity(_) => Recovery::DataIntegrity,
            SolisError::Crm(_) | SolisError::Calendar(_) => Recovery::Transient,
            SolisError::Knowledge(_) => Recovery::Transient,
            SolisError::Serialization(_) => Recovery::ClientProtocol,
            SolisError::Io(_) => Recovery::Transient,
            SolisError::TurnBudget { .. } => Recovery::Transient,
            SolisError::Internal(_) => Recovery::Transient,
        }
    }
}

pub type Result<T> = std::result::Result<T, SolisError>;
