use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("lead not found: {0}")]
    LeadNotFound(String),

    #[error("conversation not found for lead {0}")]
    ConversationNotFound(String),

    #[error("follow-up not found: {0}")]
    FollowUpNotFound(String),

    #[error("calendar event not found: {0}")]
    EventNotFound(String),

    #[error("invalid stored value in {column}: {value}")]
    Corrupt { column: String, value: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
