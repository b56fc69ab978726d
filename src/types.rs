//! Common types used throughout the race service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for users
pub type UserId = String;

/// Unique identifier for race rooms
pub type RoomId = Uuid;

/// Transport-level connection identifier (socket id)
pub type ConnectionId = String;

/// Reason a session was discarded before producing a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbandonReason {
    Disconnect,
    Shutdown,
}

impl std::fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbandonReason::Disconnect => write!(f, "Disconnect"),
            AbandonReason::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// A user waiting for (or placed into) a match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerTicket {
    pub user_id: UserId,
    pub username: String,
    pub avatar: Option<String>,
    pub connection_id: ConnectionId,
    pub enqueued_at: DateTime<Utc>,
}

/// Public profile fields broadcast to room participants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RacerProfile {
    pub user_id: UserId,
    pub username: String,
    pub avatar: Option<String>,
}

impl From<&PlayerTicket> for RacerProfile {
    fn from(ticket: &PlayerTicket) -> Self {
        Self {
            user_id: ticket.user_id.clone(),
            username: ticket.username.clone(),
            avatar: ticket.avatar.clone(),
        }
    }
}

/// Winner identification in a game end event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerSummary {
    pub user_id: UserId,
    pub username: String,
}

/// AMQP Command Types
/// Request to enter the matchmaking queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindMatchCommand {
    pub user_id: UserId,
    pub username: String,
    pub avatar: Option<String>,
    pub connection_id: ConnectionId,
    pub timestamp: DateTime<Utc>,
}

/// Request to leave the matchmaking queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelMatchCommand {
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

/// A single tap from a racing player, attributed by connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerTapCommand {
    pub room_id: RoomId,
    pub connection_id: ConnectionId,
    pub timestamp: DateTime<Utc>,
}

/// Notification that a transport connection dropped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectNotice {
    pub connection_id: ConnectionId,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all inbound client commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    FindMatch(FindMatchCommand),
    CancelMatch(CancelMatchCommand),
    PlayerTap(PlayerTapCommand),
    Disconnect(DisconnectNotice),
}

/// Event emitted when two players are paired into a room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFound {
    pub room_id: RoomId,
    pub players: Vec<RacerProfile>,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted once per countdown tick (3, 2, 1, 0)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameCountdown {
    pub room_id: RoomId,
    pub countdown: u32,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when the race begins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStart {
    pub room_id: RoomId,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted after each valid tap with the mover's new state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerMove {
    pub room_id: RoomId,
    pub player_id: UserId,
    pub position: f64,
    pub tap_count: u64,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a race concludes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEnd {
    pub room_id: RoomId,
    pub winner: WinnerSummary,
    pub final_positions: HashMap<UserId, f64>,
    pub tap_counts: HashMap<UserId, u64>,
    pub duration_ms: i64,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all outbound room events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RoomEvent {
    MatchFound(MatchFound),
    GameCountdown(GameCountdown),
    GameStart(GameStart),
    PlayerMove(PlayerMove),
    GameEnd(GameEnd),
}
