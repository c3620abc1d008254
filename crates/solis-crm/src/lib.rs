pub mod breaker;
pub mod client;
pub mod error;
pub mod mapping;

pub use breaker::CircuitBreaker;
pub use client::{CrmClient, CrmLeadPayload, CrmTask};
pub use error::{CrmError, Result};
pub use mapping::pipeline_stage_id;
