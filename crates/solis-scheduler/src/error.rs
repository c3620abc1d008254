use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] solis_store::StoreError),

    #[error("gateway error: {0}")]
    Gateway(#[from] solis_whatsapp::GatewayError),

    #[error("calendar error: {0}")]
    Calendar(#[from] solis_calendar::CalendarError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
