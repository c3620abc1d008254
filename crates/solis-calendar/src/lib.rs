pub mod client;
pub mod error;
pub mod types;

pub use client::CalendarClient;
pub use error::{CalendarError, Result};
pub use types::{EventDraft, EventPatch, ExternalEvent};
