//! Utility functions for the race service

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique room ID
pub fn generate_room_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Clamp a track position to the valid course range
pub fn clamp_position(position: f64, finish_line: f64) -> f64 {
    position.clamp(0.0, finish_line)
}

/// Duration between two timestamps in whole milliseconds
pub fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_milliseconds()
}
