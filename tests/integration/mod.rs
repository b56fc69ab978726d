//! End to end lifecycle tests for the race service

pub mod race_lifecycle;
