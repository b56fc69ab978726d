//! AMQP message definitions and serialization

use crate::error::{RaceError, Result};
use crate::types::*;
use serde_json;

/// AMQP queue and exchange names
pub const COMMAND_QUEUE: &str = "race.commands";
pub const ROOM_EVENTS_EXCHANGE: &str = "race.room_events";

/// Event name suffixes used in room routing keys
pub const MATCH_FOUND_EVENT: &str = "match_found";
pub const GAME_COUNTDOWN_EVENT: &str = "game_countdown";
pub const GAME_START_EVENT: &str = "game_start";
pub const PLAYER_MOVE_EVENT: &str = "player_move";
pub const GAME_END_EVENT: &str = "game_end";

/// Routing key scoping an event to one room
pub fn room_routing_key(room_id: RoomId, event: &str) -> String {
    format!("room.{}.{}", room_id, event)
}

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            RaceError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            RaceError::InvalidCommand {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Serialize a client command to bytes
    pub fn serialize_command(command: &ClientCommand) -> Result<Vec<u8>> {
        Self::validate_command(command)?;
        serde_json::to_vec(command).map_err(|e| {
            RaceError::InternalError {
                message: format!("Failed to serialize command: {}", e),
            }
            .into()
        })
    }

    /// Deserialize a client command from bytes
    pub fn deserialize_command(bytes: &[u8]) -> Result<ClientCommand> {
        let command: ClientCommand =
            serde_json::from_slice(bytes).map_err(|e| RaceError::InvalidCommand {
                reason: format!("Failed to deserialize command: {}", e),
            })?;

        Self::validate_command(&command)?;
        Ok(command)
    }

    /// Validate a client command
    pub fn validate_command(command: &ClientCommand) -> Result<()> {
        match command {
            ClientCommand::FindMatch(cmd) => {
                if cmd.user_id.is_empty() {
                    return Err(RaceError::InvalidCommand {
                        reason: "User ID cannot be empty".to_string(),
                    }
                    .into());
                }
                if cmd.username.is_empty() {
                    return Err(RaceError::InvalidCommand {
                        reason: "Username cannot be empty".to_string(),
                    }
                    .into());
                }
                if cmd.connection_id.is_empty() {
                    return Err(RaceError::InvalidCommand {
                        reason: "Connection ID cannot be empty".to_string(),
                    }
                    .into());
                }
            }
            ClientCommand::CancelMatch(cmd) => {
                if cmd.user_id.is_empty() {
                    return Err(RaceError::InvalidCommand {
                        reason: "User ID cannot be empty".to_string(),
                    }
                    .into());
                }
            }
            ClientCommand::PlayerTap(cmd) => {
                if cmd.connection_id.is_empty() {
                    return Err(RaceError::InvalidCommand {
                        reason: "Connection ID cannot be empty".to_string(),
                    }
                    .into());
                }
            }
            ClientCommand::Disconnect(cmd) => {
                if cmd.connection_id.is_empty() {
                    return Err(RaceError::InvalidCommand {
                        reason: "Connection ID cannot be empty".to_string(),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            RaceError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Get routing key for a room event
    pub fn get_routing_key(event: &RoomEvent) -> String {
        match event {
            RoomEvent::MatchFound(e) => room_routing_key(e.room_id, MATCH_FOUND_EVENT),
            RoomEvent::GameCountdown(e) => room_routing_key(e.room_id, GAME_COUNTDOWN_EVENT),
            RoomEvent::GameStart(e) => room_routing_key(e.room_id, GAME_START_EVENT),
            RoomEvent::PlayerMove(e) => room_routing_key(e.room_id, PLAYER_MOVE_EVENT),
            RoomEvent::GameEnd(e) => room_routing_key(e.room_id, GAME_END_EVENT),
        }
    }
}
