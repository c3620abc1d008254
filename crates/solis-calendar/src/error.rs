use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("calendar API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("calendar not configured")]
    NotConfigured,

    #[error("event not found: {0}")]
    NotFound(String),
}

impl CalendarError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CalendarError::Http(e) => e.is_timeout() || e.is_connect(),
            CalendarError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CalendarError>;
