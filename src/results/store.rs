//! Result storage interface and implementations
//!
//! This module defines the interface for persisting finished races and the
//! aggregate queries built on top of them, with both in-memory and
//! database-ready implementations.

use crate::error::{RaceError, Result};
use crate::types::{RoomId, UserId, WinnerSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// One player's share of a finished race
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerResult {
    pub user_id: UserId,
    pub username: String,
    pub final_position: f64,
    pub tap_count: u64,
    pub is_winner: bool,
}

/// Persisted record of a finished race
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceOutcome {
    pub room_id: RoomId,
    pub players: Vec<PlayerResult>,
    pub winner: WinnerSummary,
    pub duration_ms: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl RaceOutcome {
    /// Whether the given user took part in this race
    pub fn involves(&self, user_id: &UserId) -> bool {
        self.players.iter().any(|p| &p.user_id == user_id)
    }

    /// Whether the given user won this race
    pub fn won_by(&self, user_id: &UserId) -> bool {
        &self.winner.user_id == user_id
    }
}

/// Aggregate record for one player across their finished races
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStats {
    pub user_id: UserId,
    pub username: String,
    pub games: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub total_taps: u64,
    pub best_duration_ms: Option<i64>,
}

/// Trait for result storage operations
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist a finished race (idempotent per room id)
    async fn persist(&self, outcome: RaceOutcome) -> Result<()>;

    /// All finished races involving the player, most recent first
    async fn results_for_player(&self, user_id: &UserId) -> Result<Vec<RaceOutcome>>;

    /// Finished races the player won, most recent first
    async fn wins_for_player(&self, user_id: &UserId) -> Result<Vec<RaceOutcome>>;

    /// Aggregate statistics for the player; `None` when they have no races
    async fn player_stats(&self, user_id: &UserId) -> Result<Option<PlayerStats>>;

    /// Ranked players with enough games, best win rate first
    async fn leaderboard(&self, limit: usize) -> Result<Vec<PlayerStats>>;

    /// Total number of stored results
    async fn result_count(&self) -> Result<usize>;
}

/// Aggregate one player's stats from a set of outcomes
fn aggregate_stats(outcomes: &[RaceOutcome], user_id: &UserId) -> Option<PlayerStats> {
    let involved: Vec<&RaceOutcome> = outcomes.iter().filter(|o| o.involves(user_id)).collect();
    if involved.is_empty() {
        return None;
    }

    let games = involved.len() as u64;
    let wins = involved.iter().filter(|o| o.won_by(user_id)).count() as u64;
    let total_taps = involved
        .iter()
        .filter_map(|o| o.players.iter().find(|p| &p.user_id == user_id))
        .map(|p| p.tap_count)
        .sum();
    let best_duration_ms = involved
        .iter()
        .filter(|o| o.won_by(user_id))
        .map(|o| o.duration_ms)
        .min();

    // Username from the most recent race they played
    let username = involved
        .iter()
        .max_by_key(|o| o.end_time)
        .and_then(|o| o.players.iter().find(|p| &p.user_id == user_id))
        .map(|p| p.username.clone())
        .unwrap_or_default();

    Some(PlayerStats {
        user_id: user_id.clone(),
        username,
        games,
        wins,
        losses: games - wins,
        win_rate: wins as f64 / games as f64,
        total_taps,
        best_duration_ms,
    })
}

/// Build the ranked leaderboard from a set of outcomes
fn build_leaderboard(outcomes: &[RaceOutcome], min_games: u64, limit: usize) -> Vec<PlayerStats> {
    let mut seen: Vec<UserId> = Vec::new();
    for outcome in outcomes {
        for player in &outcome.players {
            if !seen.contains(&player.user_id) {
                seen.push(player.user_id.clone());
            }
        }
    }

    let mut rows: Vec<PlayerStats> = seen
        .iter()
        .filter_map(|user_id| aggregate_stats(outcomes, user_id))
        .filter(|stats| stats.games >= min_games)
        .collect();

    // Win rate descending, then win count, then user id for a stable order
    rows.sort_by(|a, b| {
        b.win_rate
            .partial_cmp(&a.win_rate)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.wins.cmp(&a.wins))
            .then(a.user_id.cmp(&b.user_id))
    });
    rows.truncate(limit);
    rows
}

/// In-memory result storage implementation
#[derive(Debug)]
pub struct InMemoryResultStore {
    results: RwLock<HashMap<RoomId, RaceOutcome>>,
    max_entries: usize,
    min_games: u64,
}

impl InMemoryResultStore {
    /// Create a new in-memory result store
    pub fn new(max_entries: usize, min_games: u64) -> Self {
        Self {
            results: RwLock::new(HashMap::new()),
            max_entries,
            min_games,
        }
    }

    /// Cleanup oldest results if we exceed max_entries
    fn cleanup_if_needed(&self) -> Result<()> {
        let mut results = self.results.write().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire results write lock".to_string(),
        })?;

        if results.len() > self.max_entries {
            let mut entries: Vec<_> = results.iter().map(|(k, v)| (*k, v.end_time)).collect();
            entries.sort_by(|a, b| a.1.cmp(&b.1));

            let to_remove = results.len() - self.max_entries;
            for (room_id, _) in entries.into_iter().take(to_remove) {
                results.remove(&room_id);
            }
        }

        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<RaceOutcome>> {
        let results = self.results.read().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire results read lock".to_string(),
        })?;

        let mut outcomes: Vec<RaceOutcome> = results.values().cloned().collect();
        outcomes.sort_by(|a, b| b.end_time.cmp(&a.end_time));
        Ok(outcomes)
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new(10000, 3)
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn persist(&self, outcome: RaceOutcome) -> Result<()> {
        let mut results = self.results.write().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire results write lock".to_string(),
        })?;

        results.insert(outcome.room_id, outcome);

        drop(results); // Release lock before cleanup
        self.cleanup_if_needed()?;

        Ok(())
    }

    async fn results_for_player(&self, user_id: &UserId) -> Result<Vec<RaceOutcome>> {
        Ok(self
            .snapshot()?
            .into_iter()
            .filter(|o| o.involves(user_id))
            .collect())
    }

    async fn wins_for_player(&self, user_id: &UserId) -> Result<Vec<RaceOutcome>> {
        Ok(self
            .snapshot()?
            .into_iter()
            .filter(|o| o.won_by(user_id))
            .collect())
    }

    async fn player_stats(&self, user_id: &UserId) -> Result<Option<PlayerStats>> {
        Ok(aggregate_stats(&self.snapshot()?, user_id))
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<PlayerStats>> {
        Ok(build_leaderboard(&self.snapshot()?, self.min_games, limit))
    }

    async fn result_count(&self) -> Result<usize> {
        let results = self.results.read().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire results read lock".to_string(),
        })?;

        Ok(results.len())
    }
}

/// Mock result store for testing
#[derive(Debug, Default)]
pub struct MockResultStore {
    results: RwLock<HashMap<RoomId, RaceOutcome>>,
    persist_calls: RwLock<Vec<RaceOutcome>>,
    fail_persist: AtomicBool,
}

impl MockResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent persist calls fail (for testing)
    pub fn set_failing(&self, failing: bool) {
        self.fail_persist.store(failing, Ordering::SeqCst);
    }

    /// Get all persist calls made (for testing)
    pub fn get_persist_calls(&self) -> Vec<RaceOutcome> {
        self.persist_calls
            .read()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Clear persist calls (for testing)
    pub fn clear_persist_calls(&self) {
        if let Ok(mut calls) = self.persist_calls.write() {
            calls.clear();
        }
    }

    fn snapshot(&self) -> Result<Vec<RaceOutcome>> {
        let results = self.results.read().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire results read lock".to_string(),
        })?;

        let mut outcomes: Vec<RaceOutcome> = results.values().cloned().collect();
        outcomes.sort_by(|a, b| b.end_time.cmp(&a.end_time));
        Ok(outcomes)
    }
}

#[async_trait]
impl ResultStore for MockResultStore {
    async fn persist(&self, outcome: RaceOutcome) -> Result<()> {
        // Record the call for testing
        if let Ok(mut calls) = self.persist_calls.write() {
            calls.push(outcome.clone());
        }

        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(RaceError::PersistenceFailed {
                reason: "Mock store configured to fail".to_string(),
            }
            .into());
        }

        let mut results = self.results.write().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire results write lock".to_string(),
        })?;

        results.insert(outcome.room_id, outcome);
        Ok(())
    }

    async fn results_for_player(&self, user_id: &UserId) -> Result<Vec<RaceOutcome>> {
        Ok(self
            .snapshot()?
            .into_iter()
            .filter(|o| o.involves(user_id))
            .collect())
    }

    async fn wins_for_player(&self, user_id: &UserId) -> Result<Vec<RaceOutcome>> {
        Ok(self
            .snapshot()?
            .into_iter()
            .filter(|o| o.won_by(user_id))
            .collect())
    }

    async fn player_stats(&self, user_id: &UserId) -> Result<Option<PlayerStats>> {
        Ok(aggregate_stats(&self.snapshot()?, user_id))
    }

    async fn leaderboard(&self, limit: usize) -> Result<Vec<PlayerStats>> {
        Ok(build_leaderboard(&self.snapshot()?, 3, limit))
    }

    async fn result_count(&self) -> Result<usize> {
        let results = self.results.read().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire results read lock".to_string(),
        })?;

        Ok(results.len())
    }
}
