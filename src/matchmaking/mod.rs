//! Matchmaking primitives
//!
//! The FIFO wait queue and the room registry that the race manager pairs
//! players from and routes inbound traffic through.

pub mod queue;
pub mod registry;

pub use queue::{EnqueueOutcome, MatchQueue};
pub use registry::RoomRegistry;
