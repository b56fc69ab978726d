//! Test fixtures and mock implementations for integration testing

use async_trait::async_trait;
use starting_grid::amqp::publisher::EventPublisher;
use starting_grid::config::RaceSettings;
use starting_grid::error::Result;
use starting_grid::race::{RaceManager, SessionStatus};
use starting_grid::types::{
    CancelMatchCommand, DisconnectNotice, FindMatchCommand, GameCountdown, GameEnd, GameStart,
    MatchFound, PlayerMove, PlayerTapCommand, RoomEvent, RoomId,
};
use starting_grid::utils::current_timestamp;
use std::sync::{Arc, Mutex};

/// Mock event publisher that captures published events for testing
#[derive(Debug, Default)]
pub struct MockEventPublisher {
    published_events: Arc<Mutex<Vec<RoomEvent>>>,
}

impl MockEventPublisher {
    pub fn new() -> Self {
        Self {
            published_events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Get all published events (for testing)
    pub fn get_published_events(&self) -> Vec<RoomEvent> {
        self.published_events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Count events of specific type
    pub fn count_events_of_type(&self, event_type: &str) -> usize {
        self.get_published_events()
            .iter()
            .filter(|event| match event {
                RoomEvent::MatchFound(_) => event_type == "MatchFound",
                RoomEvent::GameCountdown(_) => event_type == "GameCountdown",
                RoomEvent::GameStart(_) => event_type == "GameStart",
                RoomEvent::PlayerMove(_) => event_type == "PlayerMove",
                RoomEvent::GameEnd(_) => event_type == "GameEnd",
            })
            .count()
    }

    /// All captured GameEnd payloads in publish order
    pub fn game_end_events(&self) -> Vec<GameEnd> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                RoomEvent::GameEnd(end) => Some(end),
                _ => None,
            })
            .collect()
    }

    /// All captured MatchFound payloads in publish order
    pub fn match_found_events(&self) -> Vec<MatchFound> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                RoomEvent::MatchFound(found) => Some(found),
                _ => None,
            })
            .collect()
    }

    /// Countdown values published for one room, in order
    pub fn countdown_values(&self, room_id: RoomId) -> Vec<u32> {
        self.get_published_events()
            .into_iter()
            .filter_map(|event| match event {
                RoomEvent::GameCountdown(tick) if tick.room_id == room_id => Some(tick.countdown),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventPublisher for MockEventPublisher {
    async fn publish_match_found(&self, event: MatchFound) -> Result<()> {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(RoomEvent::MatchFound(event));
        }
        Ok(())
    }

    async fn publish_countdown(&self, event: GameCountdown) -> Result<()> {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(RoomEvent::GameCountdown(event));
        }
        Ok(())
    }

    async fn publish_game_start(&self, event: GameStart) -> Result<()> {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(RoomEvent::GameStart(event));
        }
        Ok(())
    }

    async fn publish_player_move(&self, event: PlayerMove) -> Result<()> {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(RoomEvent::PlayerMove(event));
        }
        Ok(())
    }

    async fn publish_game_end(&self, event: GameEnd) -> Result<()> {
        if let Ok(mut events) = self.published_events.lock() {
            events.push(RoomEvent::GameEnd(event));
        }
        Ok(())
    }
}

/// Race settings tuned for deterministic integration tests
///
/// Fixed tap increments make positions exact: fifty taps cross the
/// 100.0 finish line, and the winner is decided by tap order alone.
pub fn create_test_settings() -> RaceSettings {
    RaceSettings {
        match_start_delay_ms: 1000,
        countdown_start: 3,
        countdown_interval_ms: 1000,
        tap_increment_min: 2.0,
        tap_increment_max: 2.0,
        finish_line: 100.0,
        session_retention_seconds: 30,
        result_queue_capacity: 64,
        cleanup_interval_seconds: 60,
        leaderboard_min_games: 3,
    }
}

/// Build a find match command for a named racer
pub fn find_match_command(user_id: &str, connection_id: &str) -> FindMatchCommand {
    FindMatchCommand {
        user_id: user_id.to_string(),
        username: format!("{}-name", user_id),
        avatar: None,
        connection_id: connection_id.to_string(),
        timestamp: current_timestamp(),
    }
}

/// Build a cancel command for a queued racer
pub fn cancel_match_command(user_id: &str) -> CancelMatchCommand {
    CancelMatchCommand {
        user_id: user_id.to_string(),
        timestamp: current_timestamp(),
    }
}

/// Build a tap command attributed to a connection
pub fn tap_command(room_id: RoomId, connection_id: &str) -> PlayerTapCommand {
    PlayerTapCommand {
        room_id,
        connection_id: connection_id.to_string(),
        timestamp: current_timestamp(),
    }
}

/// Build a disconnect notice for a connection
pub fn disconnect_notice(connection_id: &str) -> DisconnectNotice {
    DisconnectNotice {
        connection_id: connection_id.to_string(),
        timestamp: current_timestamp(),
    }
}

/// Queue requests for a set of named racers, two per room
pub fn create_test_racers() -> Vec<FindMatchCommand> {
    vec![
        find_match_command("alice", "conn-alice"),
        find_match_command("bob", "conn-bob"),
        find_match_command("carol", "conn-carol"),
        find_match_command("dave", "conn-dave"),
    ]
}

/// Let already scheduled tasks run without advancing the paused clock
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Tap on a connection until its session finishes, up to a cap
///
/// Returns the number of taps actually sent.
pub async fn tap_until_finished(
    manager: &Arc<RaceManager>,
    room_id: RoomId,
    connection_id: &str,
    max_taps: usize,
) -> usize {
    for taps in 1..=max_taps {
        Arc::clone(manager)
            .handle_tap(tap_command(room_id, connection_id))
            .await
            .expect("tap should not error");

        let finished = manager
            .session(room_id)
            .await
            .expect("session lookup should not error")
            .map(|session| session.status() == SessionStatus::Finished)
            .unwrap_or(true);
        if finished {
            return taps;
        }
    }
    max_taps
}
