use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CRM API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("circuit open, CRM calls suspended")]
    CircuitOpen,

    #[error("CRM not configured")]
    NotConfigured,

    #[error("CRM response missing field: {0}")]
    Shape(String),
}

impl CrmError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CrmError::Http(e) => e.is_timeout() || e.is_connect(),
            CrmError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CrmError>;
