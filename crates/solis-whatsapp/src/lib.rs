pub mod client;
pub mod error;
pub mod humanize;
pub mod types;

pub use client::GatewayClient;
pub use error::{GatewayError, Result};
pub use humanize::HumanizedSender;
