//! Room registry
//!
//! Derived index mapping users to the room they occupy and transport
//! connections to users. Used to route taps and disconnects back to the
//! right session. The session table remains the source of truth; entries
//! here exist only while a session is active.

use crate::error::{RaceError, Result};
use crate::types::{ConnectionId, PlayerTicket, RoomId, UserId};
use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe user/connection to room index
#[derive(Debug, Default)]
pub struct RoomRegistry {
    users: RwLock<HashMap<UserId, RoomId>>,
    connections: RwLock<HashMap<ConnectionId, UserId>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register both participants of a newly created room
    pub fn register_pair(
        &self,
        room_id: RoomId,
        first: &PlayerTicket,
        second: &PlayerTicket,
    ) -> Result<()> {
        let mut users = self.users.write().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire registry users write lock".to_string(),
        })?;
        let mut connections = self
            .connections
            .write()
            .map_err(|_| RaceError::InternalError {
                message: "Failed to acquire registry connections write lock".to_string(),
            })?;

        users.insert(first.user_id.clone(), room_id);
        users.insert(second.user_id.clone(), room_id);
        connections.insert(first.connection_id.clone(), first.user_id.clone());
        connections.insert(second.connection_id.clone(), second.user_id.clone());

        Ok(())
    }

    /// Room the user currently occupies, if any
    pub fn room_for_user(&self, user_id: &UserId) -> Result<Option<RoomId>> {
        let users = self.users.read().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire registry users read lock".to_string(),
        })?;

        Ok(users.get(user_id).copied())
    }

    /// User behind a transport connection, if registered
    pub fn user_for_connection(&self, connection_id: &ConnectionId) -> Result<Option<UserId>> {
        let connections = self
            .connections
            .read()
            .map_err(|_| RaceError::InternalError {
                message: "Failed to acquire registry connections read lock".to_string(),
            })?;

        Ok(connections.get(connection_id).cloned())
    }

    /// Resolve a connection to the user and room it belongs to
    pub fn room_for_connection(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Option<(UserId, RoomId)>> {
        let user_id = match self.user_for_connection(connection_id)? {
            Some(user_id) => user_id,
            None => return Ok(None),
        };

        Ok(self.room_for_user(&user_id)?.map(|room| (user_id, room)))
    }

    /// Drop a single player's entries; `false` when the user was not registered
    pub fn remove_player(&self, user_id: &UserId, connection_id: &ConnectionId) -> Result<bool> {
        let mut users = self.users.write().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire registry users write lock".to_string(),
        })?;
        let mut connections = self
            .connections
            .write()
            .map_err(|_| RaceError::InternalError {
                message: "Failed to acquire registry connections write lock".to_string(),
            })?;

        let removed = users.remove(user_id).is_some();
        connections.remove(connection_id);

        Ok(removed)
    }

    /// Drop both participants of a room
    pub fn unregister_pair(&self, first: &PlayerTicket, second: &PlayerTicket) -> Result<()> {
        self.remove_player(&first.user_id, &first.connection_id)?;
        self.remove_player(&second.user_id, &second.connection_id)?;
        Ok(())
    }

    /// Drop a player's entries only while they still point at the given room
    ///
    /// A player who already re-registered into a newer room is left alone.
    /// Returns `false` when nothing pointed at the room.
    pub fn remove_player_if_in_room(
        &self,
        user_id: &UserId,
        connection_id: &ConnectionId,
        room_id: RoomId,
    ) -> Result<bool> {
        let mut users = self.users.write().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire registry users write lock".to_string(),
        })?;
        let mut connections = self
            .connections
            .write()
            .map_err(|_| RaceError::InternalError {
                message: "Failed to acquire registry connections write lock".to_string(),
            })?;

        if users.get(user_id) != Some(&room_id) {
            return Ok(false);
        }

        users.remove(user_id);
        if connections.get(connection_id) == Some(user_id) {
            connections.remove(connection_id);
        }
        Ok(true)
    }

    /// Number of users currently registered to a room
    pub fn registered_players(&self) -> Result<usize> {
        let users = self.users.read().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire registry users read lock".to_string(),
        })?;

        Ok(users.len())
    }
}
