//! Race result persistence
//!
//! The durable home for finished races: the storage interface with its
//! aggregate queries, and the non-blocking writer that feeds it.

pub mod store;
pub mod writer;

pub use store::{InMemoryResultStore, PlayerResult, PlayerStats, RaceOutcome, ResultStore};
pub use writer::ResultWriter;
