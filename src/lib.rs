//! Starting Grid - Race session service for tap racing games
//!
//! This crate provides AMQP-based matchmaking and race session management
//! for real-time two-player tap races, with countdowns, live progress
//! events, and fire-and-forget result persistence.

pub mod amqp;
pub mod config;
pub mod error;
pub mod matchmaking;
pub mod metrics;
pub mod race;
pub mod results;
pub mod service;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{RaceError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use race::{RaceManager, RaceSession, SessionStatus};
pub use results::{ResultStore, ResultWriter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
