//! AMQP integration for the race service
//!
//! This module handles all AMQP connections, command consumption, and event
//! publishing for the race microservice.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{CommandHandler, RaceCommandConsumer};
pub use messages::*;
pub use publisher::EventPublisher;
