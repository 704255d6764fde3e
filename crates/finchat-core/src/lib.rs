//! Shared configuration, errors, and domain types for finchat.

pub mod config;
pub mod error;
pub mod limits;
pub mod types;

pub use config::FinchatConfig;
pub use error::{FinchatError, Result};
pub use types::*;
