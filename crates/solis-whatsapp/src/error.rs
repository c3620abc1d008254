use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("gateway response missing field: {0}")]
    Shape(String),

    #[error("send deadline exceeded for {phone}")]
    Deadline { phone: String },
}

impl GatewayError {
    /// Worth another attempt? Network flakes, timeouts and 5xx are; 4xx is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            GatewayError::Api { status, .. } => *status >= 500 || *status == 429,
            GatewayError::Shape(_) => false,
            GatewayError::Deadline { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
