//! Race session management
//!
//! This module owns the session state machine, the timers that drive it, and
//! the manager that orchestrates matchmaking, countdowns, taps, and results.

pub mod manager;
pub mod session;
pub mod timers;

// Re-export commonly used types
pub use manager::{RaceManager, RaceManagerStats};
pub use session::{RaceSession, SessionStatus, TapProgress};
pub use timers::TimerTable;
