use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("store error: {0}")]
    Store(#[from] solis_store::StoreError),

    #[error("gateway error: {0}")]
    Gateway(#[from] solis_whatsapp::GatewayError),

    #[error("media error: {0}")]
    Media(#[from] solis_media::MediaError),

    #[error("knowledge error: {0}")]
    Knowledge(#[from] solis_knowledge::KnowledgeError),

    #[error("model error: {0}")]
    Provider(#[from] ProviderError),

    #[error("calendar error: {0}")]
    Calendar(#[from] solis_calendar::CalendarError),

    #[error("CRM error: {0}")]
    Crm(#[from] solis_crm::CrmError),

    #[error("turn budget of {secs}s exceeded")]
    TurnBudget { secs: u64 },

    #[error("model returned unusable output: {0}")]
    BadModelOutput(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
