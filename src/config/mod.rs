//! Configuration management for the starting-grid service
//!
//! This module handles all configuration loading from environment variables,
//! TOML files, validation, and default values for the race service.

pub mod app;

// Re-export commonly used types
pub use app::{validate_config, AmqpSettings, AppConfig, RaceSettings, ServiceSettings};
