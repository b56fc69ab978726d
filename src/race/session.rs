//! Race session implementation and lifecycle management
//!
//! This module contains the core session logic for tracking two racers,
//! state transitions, and tap progress.

use crate::error::{RaceError, Result};
use crate::types::{ConnectionId, GameEnd, PlayerTicket, RoomId, UserId, WinnerSummary};
use crate::utils::{clamp_position, current_timestamp, duration_ms};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Possible states of a race session
///
/// Transitions only move forward: Matched -> Countdown -> Racing -> Finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Two players paired, countdown not yet started
    Matched,
    /// Countdown ticks are being broadcast
    Countdown,
    /// Race in progress, taps are accepted
    Racing,
    /// Race concluded (terminal state)
    Finished,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Finished)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Matched => write!(f, "Matched"),
            SessionStatus::Countdown => write!(f, "Countdown"),
            SessionStatus::Racing => write!(f, "Racing"),
            SessionStatus::Finished => write!(f, "Finished"),
        }
    }
}

/// Result of applying one tap to a racing session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapProgress {
    pub position: f64,
    pub tap_count: u64,
    pub reached_finish: bool,
}

/// A two-player race from pairing through completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceSession {
    id: RoomId,
    players: Vec<PlayerTicket>,
    status: SessionStatus,
    positions: HashMap<UserId, f64>,
    tap_counts: HashMap<UserId, u64>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    winner_id: Option<UserId>,
    created_at: DateTime<Utc>,
}

impl RaceSession {
    /// Create a session for two distinct players
    pub fn new(id: RoomId, first: PlayerTicket, second: PlayerTicket) -> Result<Self> {
        if first.user_id == second.user_id {
            return Err(RaceError::InvalidCommand {
                reason: format!("Cannot match player {} against themselves", first.user_id),
            }
            .into());
        }

        let mut positions = HashMap::new();
        let mut tap_counts = HashMap::new();
        for ticket in [&first, &second] {
            positions.insert(ticket.user_id.clone(), 0.0);
            tap_counts.insert(ticket.user_id.clone(), 0);
        }

        Ok(Self {
            id,
            players: vec![first, second],
            status: SessionStatus::Matched,
            positions,
            tap_counts,
            start_time: None,
            end_time: None,
            winner_id: None,
            created_at: current_timestamp(),
        })
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn players(&self) -> &[PlayerTicket] {
        &self.players
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn winner_id(&self) -> Option<&UserId> {
        self.winner_id.as_ref()
    }

    pub fn positions(&self) -> &HashMap<UserId, f64> {
        &self.positions
    }

    pub fn tap_counts(&self) -> &HashMap<UserId, u64> {
        &self.tap_counts
    }

    /// Ticket for a participating user
    pub fn player(&self, user_id: &UserId) -> Option<&PlayerTicket> {
        self.players.iter().find(|p| &p.user_id == user_id)
    }

    /// Ticket owning a transport connection
    pub fn player_by_connection(&self, connection_id: &ConnectionId) -> Option<&PlayerTicket> {
        self.players
            .iter()
            .find(|p| &p.connection_id == connection_id)
    }

    /// The other participant
    pub fn opponent_of(&self, user_id: &UserId) -> Option<&PlayerTicket> {
        self.players.iter().find(|p| &p.user_id != user_id)
    }

    pub fn contains_user(&self, user_id: &UserId) -> bool {
        self.player(user_id).is_some()
    }

    /// Begin the countdown phase
    pub fn mark_countdown(&mut self) -> Result<()> {
        if self.status != SessionStatus::Matched {
            return Err(RaceError::InvalidTransition {
                from: self.status.to_string(),
                to: SessionStatus::Countdown.to_string(),
            }
            .into());
        }

        self.status = SessionStatus::Countdown;
        Ok(())
    }

    /// Begin the race: reset progress and record the start time
    pub fn mark_racing(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != SessionStatus::Countdown {
            return Err(RaceError::InvalidTransition {
                from: self.status.to_string(),
                to: SessionStatus::Racing.to_string(),
            }
            .into());
        }

        for ticket in &self.players {
            self.positions.insert(ticket.user_id.clone(), 0.0);
            self.tap_counts.insert(ticket.user_id.clone(), 0);
        }
        self.start_time = Some(now);
        self.status = SessionStatus::Racing;
        Ok(())
    }

    /// Advance one player by a single tap
    ///
    /// Only valid while racing. The position is clamped to the finish line;
    /// `reached_finish` reports whether this tap crossed it.
    pub fn apply_tap(
        &mut self,
        user_id: &UserId,
        increment: f64,
        finish_line: f64,
    ) -> Result<TapProgress> {
        if self.status != SessionStatus::Racing {
            return Err(RaceError::InvalidTransition {
                from: self.status.to_string(),
                to: "tap".to_string(),
            }
            .into());
        }
        if !self.contains_user(user_id) {
            return Err(RaceError::PlayerNotFound {
                player_id: user_id.clone(),
            }
            .into());
        }

        let tap_count = self.tap_counts.entry(user_id.clone()).or_insert(0);
        *tap_count += 1;
        let tap_count = *tap_count;

        let position = self.positions.entry(user_id.clone()).or_insert(0.0);
        *position = clamp_position(*position + increment, finish_line);
        let position = *position;

        Ok(TapProgress {
            position,
            tap_count,
            reached_finish: position >= finish_line,
        })
    }

    /// Conclude the race with the given winner
    pub fn mark_finished(&mut self, winner_id: &UserId, now: DateTime<Utc>) -> Result<()> {
        if self.status != SessionStatus::Racing {
            return Err(RaceError::InvalidTransition {
                from: self.status.to_string(),
                to: SessionStatus::Finished.to_string(),
            }
            .into());
        }
        if !self.contains_user(winner_id) {
            return Err(RaceError::PlayerNotFound {
                player_id: winner_id.clone(),
            }
            .into());
        }

        self.status = SessionStatus::Finished;
        self.end_time = Some(now);
        self.winner_id = Some(winner_id.clone());
        Ok(())
    }

    /// Race duration in milliseconds, available once finished
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(duration_ms(start, end)),
            _ => None,
        }
    }

    /// Whether the retention window after finishing has elapsed
    pub fn should_cleanup(&self, retention: Duration, now: DateTime<Utc>) -> bool {
        match (self.status, self.end_time) {
            (SessionStatus::Finished, Some(end)) => now - end >= retention,
            _ => false,
        }
    }

    /// Build the game end event for a finished session
    pub fn game_end_event(&self) -> Option<GameEnd> {
        if self.status != SessionStatus::Finished {
            return None;
        }
        let winner_id = self.winner_id.as_ref()?;
        let winner = self.player(winner_id)?;

        Some(GameEnd {
            room_id: self.id,
            winner: WinnerSummary {
                user_id: winner.user_id.clone(),
                username: winner.username.clone(),
            },
            final_positions: self.positions.clone(),
            tap_counts: self.tap_counts.clone(),
            duration_ms: self.duration_ms().unwrap_or(0),
            timestamp: current_timestamp(),
        })
    }
}
