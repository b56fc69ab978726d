//! Stress tests for queue and race processing under load

pub mod concurrent_racing;
