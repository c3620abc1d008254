pub mod calsync;
pub mod error;
pub mod followup;
pub mod reminder;
pub mod templates;

pub use calsync::CalendarSyncLoop;
pub use error::{Result, SchedulerError};
pub use followup::FollowUpExecutor;
pub use reminder::ReminderLoop;
