//! Sheet Signal Bot - spreadsheet-driven crypto signal bot

pub mod config;
pub mod error;
pub mod integrations;
pub mod services;
pub mod sources;
pub mod types;

pub use config::Config;
pub use error::{AppError, Result};
pub use types::*;
