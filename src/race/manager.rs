//! Race manager implementation for handling multiple race sessions
//!
//! This module provides the core RaceManager that orchestrates matchmaking,
//! session lifecycle, tap handling, result submission, and cleanup.

use crate::amqp::publisher::EventPublisher;
use crate::config::RaceSettings;
use crate::error::{RaceError, Result};
use crate::matchmaking::{EnqueueOutcome, MatchQueue, RoomRegistry};
use crate::metrics::MetricsCollector;
use crate::race::session::{RaceSession, SessionStatus};
use crate::race::timers::TimerTable;
use crate::results::{PlayerResult, RaceOutcome, ResultWriter};
use crate::types::{
    AbandonReason, CancelMatchCommand, DisconnectNotice, FindMatchCommand, GameCountdown, GameEnd,
    GameStart, MatchFound, PlayerMove, PlayerTapCommand, PlayerTicket, RacerProfile, RoomId,
    UserId, WinnerSummary,
};
use crate::utils::{current_timestamp, generate_room_id};
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::time::{interval, sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

/// Statistics about race manager operations
#[derive(Debug, Clone, Default)]
pub struct RaceManagerStats {
    /// Total find-match requests accepted
    pub players_queued: u64,
    /// Total matches formed
    pub matches_found: u64,
    /// Total races that reached the racing phase
    pub races_started: u64,
    /// Total races finished with a winner
    pub races_finished: u64,
    /// Total sessions abandoned before finishing
    pub races_abandoned: u64,
    /// Total taps applied
    pub taps_processed: u64,
    /// Total finished sessions removed after retention
    pub sessions_cleaned: u64,
    /// Current number of live sessions
    pub active_sessions: usize,
    /// Current number of players waiting in the queue
    pub players_waiting: usize,
}

/// What a find-match request did to the queue
enum FindMatchAction {
    /// Player entered the queue and waits for an opponent
    Waiting,
    /// Player was already waiting, their ticket was replaced in place
    Requeued,
    /// Player is already registered to a live room, request ignored
    AlreadyInRoom(RoomId),
    /// An opponent was waiting, the pair is registered to a fresh room
    Paired {
        room_id: RoomId,
        opponent: PlayerTicket,
    },
}

/// What a disconnect does to the session it lands on
enum DisconnectAction {
    /// Opponent wins the running race by forfeit
    Forfeit {
        survivor: UserId,
        end_event: GameEnd,
        outcome: RaceOutcome,
        players: Vec<PlayerTicket>,
    },
    /// Session had not started racing, drop it without a result
    Discard { players: Vec<PlayerTicket> },
    /// Session already finished, at most stale registry entries remain
    AlreadyFinished { players: Vec<PlayerTicket> },
}

/// The main race manager
#[derive(Clone)]
pub struct RaceManager {
    /// Race behavior configuration
    settings: RaceSettings,
    /// Map of live sessions by room ID
    sessions: Arc<RwLock<HashMap<RoomId, RaceSession>>>,
    /// FIFO queue of players waiting for an opponent
    queue: Arc<Mutex<MatchQueue>>,
    /// User and connection lookup for live rooms
    registry: Arc<RoomRegistry>,
    /// Pending timers per session
    timers: Arc<Mutex<TimerTable>>,
    /// Event publisher for room events
    event_publisher: Arc<dyn EventPublisher>,
    /// Fire-and-forget result persistence
    result_writer: Arc<ResultWriter>,
    /// Manager statistics
    stats: Arc<RwLock<RaceManagerStats>>,
    /// Metrics collector for recording performance data
    metrics_collector: Arc<MetricsCollector>,
}

impl RaceManager {
    /// Create a new race manager
    pub fn new(
        settings: RaceSettings,
        event_publisher: Arc<dyn EventPublisher>,
        result_writer: Arc<ResultWriter>,
    ) -> Self {
        // Create a default metrics collector if none provided
        let metrics_collector = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(settings, event_publisher, result_writer, metrics_collector)
    }

    /// Create a new race manager with metrics collector
    pub fn with_metrics(
        settings: RaceSettings,
        event_publisher: Arc<dyn EventPublisher>,
        result_writer: Arc<ResultWriter>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            settings,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(Mutex::new(MatchQueue::new())),
            registry: Arc::new(RoomRegistry::new()),
            timers: Arc::new(Mutex::new(TimerTable::new())),
            event_publisher,
            result_writer,
            stats: Arc::new(RwLock::new(RaceManagerStats::default())),
            metrics_collector,
        }
    }

    /// Get the race behavior configuration
    pub fn settings(&self) -> &RaceSettings {
        &self.settings
    }

    /// Handle a find-match request from a player
    ///
    /// Pairs the player with the longest-waiting opponent if one exists,
    /// otherwise the player enters the queue. Returns the room ID when a
    /// match was formed. A request from a player who is already in a live
    /// room is ignored; a request from a player who is already waiting
    /// replaces their ticket without losing their queue position.
    pub async fn handle_find_match(
        self: Arc<Self>,
        command: FindMatchCommand,
    ) -> Result<Option<RoomId>> {
        let timer = Instant::now();

        info!(
            "Processing find match - player: '{}', username: '{}', connection: '{}'",
            command.user_id, command.username, command.connection_id
        );

        let ticket = PlayerTicket {
            user_id: command.user_id.clone(),
            username: command.username.clone(),
            avatar: command.avatar.clone(),
            connection_id: command.connection_id.clone(),
            enqueued_at: current_timestamp(),
        };

        // Room membership and queue membership change together under the
        // queue lock, so a concurrent pairing cannot double-book a player.
        let action = {
            let mut queue = self.queue.lock().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire queue lock".to_string(),
            })?;

            if let Some(active_room) = self.registry.room_for_user(&ticket.user_id)? {
                FindMatchAction::AlreadyInRoom(active_room)
            } else if queue.contains_user(&ticket.user_id) {
                match queue.enqueue(ticket.clone()) {
                    EnqueueOutcome::Replaced => FindMatchAction::Requeued,
                    EnqueueOutcome::Queued => FindMatchAction::Waiting,
                }
            } else if let Some(opponent) = queue.pop_longest_waiting() {
                let room_id = generate_room_id();
                self.registry.register_pair(room_id, &opponent, &ticket)?;
                FindMatchAction::Paired { room_id, opponent }
            } else {
                queue.enqueue(ticket.clone());
                FindMatchAction::Waiting
            }
        };

        let result = match action {
            FindMatchAction::Waiting => {
                {
                    let mut stats = self.stats.write().map_err(|_| RaceError::InternalError {
                        message: "Failed to acquire stats lock".to_string(),
                    })?;
                    stats.players_queued += 1;
                }

                let depth = self.queue_depth()?;
                info!(
                    "Player '{}' is waiting for an opponent ({} in queue)",
                    command.user_id, depth
                );
                Ok(None)
            }
            FindMatchAction::Requeued => {
                info!(
                    "Replaced waiting ticket for player '{}', queue position kept",
                    command.user_id
                );
                self.metrics_collector.record_requeue();
                Ok(None)
            }
            FindMatchAction::AlreadyInRoom(active_room) => {
                warn!(
                    "Player '{}' requested a match while already in room {}, ignoring",
                    command.user_id, active_room
                );
                Ok(None)
            }
            FindMatchAction::Paired { room_id, opponent } => {
                let room_id = Arc::clone(&self)
                    .create_session(room_id, opponent, ticket)
                    .await?;
                Ok(Some(room_id))
            }
        };

        self.metrics_collector
            .record_command("find_match", timer.elapsed());
        result
    }

    /// Insert the session for a freshly registered pair and schedule its
    /// countdown
    async fn create_session(
        self: Arc<Self>,
        room_id: RoomId,
        first: PlayerTicket,
        second: PlayerTicket,
    ) -> Result<RoomId> {
        let now = current_timestamp();

        info!(
            "Matched players '{}' and '{}' into room {}",
            first.user_id, second.user_id, room_id
        );

        let session = RaceSession::new(room_id, first.clone(), second.clone())?;
        {
            let mut sessions = self.sessions.write().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire sessions lock".to_string(),
            })?;
            sessions.insert(room_id, session);
        }

        {
            let mut stats = self.stats.write().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?;
            stats.matches_found += 1;
            stats.players_queued += 1;

            info!(
                "Match stats updated - total_matches: {}, total_queued: {}",
                stats.matches_found, stats.players_queued
            );
        }

        let waits = [
            (now - first.enqueued_at).to_std().unwrap_or_default(),
            (now - second.enqueued_at).to_std().unwrap_or_default(),
        ];
        self.metrics_collector.record_match_found(&waits);

        let event = MatchFound {
            room_id,
            players: vec![RacerProfile::from(&first), RacerProfile::from(&second)],
            timestamp: now,
        };
        if let Err(e) = self.event_publisher.publish_match_found(event).await {
            error!("Failed to publish match found for room {}: {}", room_id, e);
        }

        let delay = Duration::from_millis(self.settings.match_start_delay_ms);
        let manager = Arc::clone(&self);
        let start_handle = tokio::spawn(async move {
            sleep(delay).await;
            if let Err(e) = manager.begin_countdown(room_id).await {
                error!("Failed to begin countdown for room {}: {}", room_id, e);
            }
        });
        {
            let mut timers = self.timers.lock().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire timers lock".to_string(),
            })?;
            timers.set_start(room_id, start_handle);
        }

        debug!(
            "Countdown scheduled for room {} in {}ms",
            room_id, self.settings.match_start_delay_ms
        );
        Ok(room_id)
    }

    /// Move a matched session into its countdown and start the tick loop
    async fn begin_countdown(self: Arc<Self>, room_id: RoomId) -> Result<()> {
        {
            let mut sessions = self.sessions.write().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire sessions lock".to_string(),
            })?;

            match sessions.get_mut(&room_id) {
                Some(session) => session.mark_countdown()?,
                None => {
                    debug!("Room {} was discarded before its countdown began", room_id);
                    return Ok(());
                }
            }
        }

        info!(
            "Countdown started for room {} at {}",
            room_id, self.settings.countdown_start
        );

        let manager = Arc::clone(&self);
        let countdown_handle = tokio::spawn(async move {
            manager.run_countdown(room_id).await;
        });
        {
            let mut timers = self.timers.lock().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire timers lock".to_string(),
            })?;
            timers.set_countdown(room_id, countdown_handle);
        }

        Ok(())
    }

    /// Tick the countdown from its starting value to zero
    ///
    /// The race begins on the zero tick. Every tick revalidates the session,
    /// so a loop that survives a cancelled session stops on its own.
    async fn run_countdown(self: Arc<Self>, room_id: RoomId) {
        let mut ticker = interval(Duration::from_millis(self.settings.countdown_interval_ms));
        let mut current = self.settings.countdown_start;

        loop {
            ticker.tick().await;

            match self.countdown_tick(room_id, current).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    error!("Countdown tick {} failed for room {}: {}", current, room_id, e);
                    return;
                }
            }

            if current == 0 {
                return;
            }
            current -= 1;
        }
    }

    /// Emit one countdown value, starting the race on zero
    ///
    /// A lost broadcast is logged and the loop keeps ticking; only a session
    /// that is gone or no longer counting down stops it.
    async fn countdown_tick(&self, room_id: RoomId, value: u32) -> Result<bool> {
        let (countdown_event, start_event) = {
            let mut sessions = self.sessions.write().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire sessions lock".to_string(),
            })?;

            let session = match sessions.get_mut(&room_id) {
                Some(session) => session,
                None => {
                    debug!("Countdown for room {} stopped, session is gone", room_id);
                    return Ok(false);
                }
            };

            if session.status() != SessionStatus::Countdown {
                debug!(
                    "Countdown for room {} stopped in {} state",
                    room_id,
                    session.status()
                );
                return Ok(false);
            }

            let now = current_timestamp();
            let countdown_event = GameCountdown {
                room_id,
                countdown: value,
                timestamp: now,
            };
            let start_event = if value == 0 {
                session.mark_racing(now)?;
                Some(GameStart {
                    room_id,
                    timestamp: now,
                })
            } else {
                None
            };

            (countdown_event, start_event)
        };

        debug!("Countdown tick {} for room {}", value, room_id);
        if let Err(e) = self.event_publisher.publish_countdown(countdown_event).await {
            error!(
                "Failed to publish countdown {} for room {}: {}",
                value, room_id, e
            );
        }

        if let Some(start_event) = start_event {
            {
                let mut stats = self.stats.write().map_err(|_| RaceError::InternalError {
                    message: "Failed to acquire stats lock".to_string(),
                })?;
                stats.races_started += 1;
            }
            self.metrics_collector.record_race_started();

            if let Err(e) = self.event_publisher.publish_game_start(start_event).await {
                error!("Failed to publish game start for room {}: {}", room_id, e);
            }
            info!("Race started in room {}", room_id);
        }

        Ok(true)
    }

    /// Handle a single tap from a racing player
    ///
    /// Taps that cannot be attributed to a racer in the given room, or that
    /// arrive outside the racing phase, are dropped without an error. A move
    /// broadcast that fails is logged; a finish on the same tap still runs
    /// its bookkeeping.
    pub async fn handle_tap(self: Arc<Self>, command: PlayerTapCommand) -> Result<()> {
        let timer = Instant::now();

        let user_id = match self.registry.user_for_connection(&command.connection_id)? {
            Some(user_id) => user_id,
            None => {
                debug!(
                    "Tap from unregistered connection '{}' ignored",
                    command.connection_id
                );
                return Ok(());
            }
        };

        let (move_event, finish) = {
            let mut sessions = self.sessions.write().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire sessions lock".to_string(),
            })?;

            let session = match sessions.get_mut(&command.room_id) {
                Some(session) => session,
                None => {
                    debug!("Tap for unknown room {} ignored", command.room_id);
                    return Ok(());
                }
            };

            if session.status() != SessionStatus::Racing {
                debug!(
                    "Tap for room {} ignored in {} state",
                    command.room_id,
                    session.status()
                );
                return Ok(());
            }
            if !session.contains_user(&user_id) {
                debug!(
                    "Tap from '{}' ignored, not a racer in room {}",
                    user_id, command.room_id
                );
                return Ok(());
            }

            let increment = rand::thread_rng()
                .gen_range(self.settings.tap_increment_min..=self.settings.tap_increment_max);
            let progress = session.apply_tap(&user_id, increment, self.settings.finish_line)?;

            let move_event = PlayerMove {
                room_id: command.room_id,
                player_id: user_id.clone(),
                position: progress.position,
                tap_count: progress.tap_count,
                timestamp: current_timestamp(),
            };

            let finish = if progress.reached_finish {
                session.mark_finished(&user_id, current_timestamp())?;
                Some(finish_artifacts(session)?)
            } else {
                None
            };

            (move_event, finish)
        };

        {
            let mut stats = self.stats.write().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?;
            stats.taps_processed += 1;
        }

        if let Err(e) = self.event_publisher.publish_player_move(move_event).await {
            error!("Failed to publish move for room {}: {}", command.room_id, e);
        }
        self.metrics_collector.record_tap(timer.elapsed());

        if let Some((end_event, outcome, players)) = finish {
            self.finalize_race(command.room_id, end_event, outcome, players)
                .await?;
        }

        Ok(())
    }

    /// Conclude a finished race: free its players, hand off the result,
    /// broadcast the end, and schedule its retirement
    ///
    /// Every step runs even when a broadcast fails; a finished race must
    /// never hold on to its players.
    async fn finalize_race(
        self: Arc<Self>,
        room_id: RoomId,
        end_event: GameEnd,
        outcome: RaceOutcome,
        players: Vec<PlayerTicket>,
    ) -> Result<()> {
        info!(
            "Race finished in room {} - winner: '{}', duration: {}ms",
            room_id, end_event.winner.user_id, end_event.duration_ms
        );

        {
            let mut stats = self.stats.write().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?;
            stats.races_finished += 1;
        }
        self.metrics_collector
            .record_race_finished(Duration::from_millis(end_event.duration_ms.max(0) as u64));
        if let Some(trailing) = outcome.players.iter().find(|p| !p.is_winner) {
            self.metrics_collector
                .record_runner_up_position(trailing.final_position);
        }

        // Players may queue again right away; the finished session stays
        // queryable until the retention window passes.
        if let [first, second] = &players[..] {
            self.registry.unregister_pair(first, second)?;
        }

        let accepted = self.result_writer.try_submit(outcome);
        self.metrics_collector.record_result_submitted(accepted);

        if let Err(e) = self.event_publisher.publish_game_end(end_event).await {
            error!("Failed to publish game end for room {}: {}", room_id, e);
        }

        let retention = Duration::from_secs(self.settings.session_retention_seconds);
        let manager = Arc::clone(&self);
        let cleanup_handle = tokio::spawn(async move {
            sleep(retention).await;
            match manager.cleanup_session(room_id).await {
                Ok(true) => debug!("Retired finished room {} after retention", room_id),
                Ok(false) => {}
                Err(e) => error!("Failed to retire room {}: {}", room_id, e),
            }
        });
        {
            let mut timers = self.timers.lock().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire timers lock".to_string(),
            })?;
            timers.set_cleanup(room_id, cleanup_handle);
        }

        Ok(())
    }

    /// Handle a request to leave the matchmaking queue
    ///
    /// Only waiting tickets are affected. Returns whether one was removed.
    pub async fn handle_cancel_match(&self, command: CancelMatchCommand) -> Result<bool> {
        let timer = Instant::now();

        let cancelled = {
            let mut queue = self.queue.lock().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire queue lock".to_string(),
            })?;
            queue.cancel(&command.user_id)
        };

        match &cancelled {
            Some(ticket) => {
                info!(
                    "Cancelled waiting ticket for player '{}' (connection '{}')",
                    ticket.user_id, ticket.connection_id
                );
                self.metrics_collector.record_cancellation("cancel_request");
            }
            None => {
                debug!(
                    "Cancel request from '{}' ignored, player is not waiting",
                    command.user_id
                );
            }
        }

        self.metrics_collector
            .record_command("cancel_match", timer.elapsed());
        Ok(cancelled.is_some())
    }

    /// Handle a dropped transport connection
    ///
    /// A waiting player leaves the queue. A racing player forfeits and their
    /// opponent wins. A session that has not started racing is discarded
    /// without a result or an event.
    pub async fn handle_disconnect(self: Arc<Self>, notice: DisconnectNotice) -> Result<()> {
        let timer = Instant::now();

        let cancelled = {
            let mut queue = self.queue.lock().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire queue lock".to_string(),
            })?;
            queue.cancel_by_connection(&notice.connection_id)
        };
        if let Some(ticket) = cancelled {
            info!(
                "Removed disconnected player '{}' from the queue",
                ticket.user_id
            );
            self.metrics_collector.record_cancellation("disconnect");
            self.metrics_collector
                .record_command("disconnect", timer.elapsed());
            return Ok(());
        }

        let (user_id, room_id) = match self.registry.room_for_connection(&notice.connection_id)? {
            Some(pair) => pair,
            None => {
                debug!(
                    "Disconnect for unregistered connection '{}' ignored",
                    notice.connection_id
                );
                return Ok(());
            }
        };

        let action = {
            let mut sessions = self.sessions.write().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire sessions lock".to_string(),
            })?;

            let status = match sessions.get(&room_id) {
                Some(session) => session.status(),
                None => {
                    warn!(
                        "Dropping registry entry for '{}', room {} no longer exists",
                        user_id, room_id
                    );
                    self.registry.remove_player_if_in_room(
                        &user_id,
                        &notice.connection_id,
                        room_id,
                    )?;
                    return Ok(());
                }
            };

            match status {
                SessionStatus::Racing => {
                    let session =
                        sessions
                            .get_mut(&room_id)
                            .ok_or_else(|| RaceError::SessionNotFound {
                                room_id: room_id.to_string(),
                            })?;
                    let survivor = match session.opponent_of(&user_id) {
                        Some(opponent) => opponent.user_id.clone(),
                        None => {
                            warn!(
                                "Disconnected player '{}' has no opponent in room {}",
                                user_id, room_id
                            );
                            return Ok(());
                        }
                    };
                    session.mark_finished(&survivor, current_timestamp())?;
                    let (end_event, outcome, players) = finish_artifacts(session)?;
                    DisconnectAction::Forfeit {
                        survivor,
                        end_event,
                        outcome,
                        players,
                    }
                }
                SessionStatus::Matched | SessionStatus::Countdown => {
                    let players = sessions
                        .remove(&room_id)
                        .map(|session| session.players().to_vec())
                        .unwrap_or_default();
                    DisconnectAction::Discard { players }
                }
                SessionStatus::Finished => {
                    let players = sessions
                        .get(&room_id)
                        .map(|session| session.players().to_vec())
                        .unwrap_or_default();
                    DisconnectAction::AlreadyFinished { players }
                }
            }
        };

        match action {
            DisconnectAction::Forfeit {
                survivor,
                end_event,
                outcome,
                players,
            } => {
                info!(
                    "Player '{}' disconnected mid-race, '{}' wins room {} by forfeit",
                    user_id, survivor, room_id
                );
                {
                    let mut timers = self.timers.lock().map_err(|_| RaceError::InternalError {
                        message: "Failed to acquire timers lock".to_string(),
                    })?;
                    timers.cancel_room(&room_id);
                }
                Arc::clone(&self)
                    .finalize_race(room_id, end_event, outcome, players)
                    .await?;
            }
            DisconnectAction::Discard { players } => {
                info!(
                    "Discarding room {} ({}), player '{}' left before racing",
                    room_id,
                    AbandonReason::Disconnect,
                    user_id
                );
                {
                    let mut timers = self.timers.lock().map_err(|_| RaceError::InternalError {
                        message: "Failed to acquire timers lock".to_string(),
                    })?;
                    timers.cancel_room(&room_id);
                }
                if let [first, second] = &players[..] {
                    self.registry.unregister_pair(first, second)?;
                }
                {
                    let mut stats = self.stats.write().map_err(|_| RaceError::InternalError {
                        message: "Failed to acquire stats lock".to_string(),
                    })?;
                    stats.races_abandoned += 1;
                }
                self.metrics_collector.record_race_abandoned("disconnect");
            }
            DisconnectAction::AlreadyFinished { players } => {
                debug!("Disconnect for finished room {} ignored", room_id);
                for ticket in &players {
                    if self.registry.remove_player_if_in_room(
                        &ticket.user_id,
                        &ticket.connection_id,
                        room_id,
                    )? {
                        warn!(
                            "Player '{}' was still registered to finished room {}",
                            ticket.user_id, room_id
                        );
                    }
                }
            }
        }

        self.metrics_collector
            .record_command("disconnect", timer.elapsed());
        Ok(())
    }

    /// Remove one session and its timers
    ///
    /// Used by the retention timer once a finished session expires.
    pub async fn cleanup_session(&self, room_id: RoomId) -> Result<bool> {
        let removed = {
            let mut sessions = self.sessions.write().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire sessions lock".to_string(),
            })?;
            sessions.remove(&room_id)
        };

        let session = match removed {
            Some(session) => session,
            None => return Ok(false),
        };

        {
            let mut timers = self.timers.lock().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire timers lock".to_string(),
            })?;
            timers.cancel_room(&room_id);
        }

        // Finishing already freed the players; anything left here is stale.
        for ticket in session.players() {
            if self.registry.remove_player_if_in_room(
                &ticket.user_id,
                &ticket.connection_id,
                room_id,
            )? {
                warn!(
                    "Player '{}' was still registered to room {} at cleanup",
                    ticket.user_id, room_id
                );
            }
        }

        {
            let mut stats = self.stats.write().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?;
            stats.sessions_cleaned += 1;
        }
        self.metrics_collector.record_sessions_cleaned(1);

        debug!("Removed session {} ({})", room_id, session.status());
        Ok(true)
    }

    /// Periodic sweep of finished sessions past their retention window
    ///
    /// Backstop for retention timers that were lost, for example when the
    /// service restarts a task.
    pub async fn cleanup_stale_sessions(&self) -> Result<usize> {
        let retention = chrono::Duration::seconds(self.settings.session_retention_seconds as i64);
        let now = current_timestamp();

        let mut rooms_to_remove = Vec::new();
        {
            let sessions = self.sessions.read().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire sessions lock".to_string(),
            })?;

            for (room_id, session) in sessions.iter() {
                if session.should_cleanup(retention, now) {
                    rooms_to_remove.push(*room_id);
                }
            }
        }

        let mut cleaned_count: u64 = 0;
        if !rooms_to_remove.is_empty() {
            let mut removed_sessions = Vec::new();
            {
                let mut sessions = self.sessions.write().map_err(|_| RaceError::InternalError {
                    message: "Failed to acquire sessions lock".to_string(),
                })?;

                for room_id in &rooms_to_remove {
                    if let Some(session) = sessions.remove(room_id) {
                        cleaned_count += 1;
                        debug!("Swept finished room {}", room_id);
                        removed_sessions.push(session);
                    }
                }
            }

            for session in &removed_sessions {
                for ticket in session.players() {
                    if self.registry.remove_player_if_in_room(
                        &ticket.user_id,
                        &ticket.connection_id,
                        session.id(),
                    )? {
                        warn!(
                            "Player '{}' was still registered to swept room {}",
                            ticket.user_id,
                            session.id()
                        );
                    }
                }
            }

            {
                let mut timers = self.timers.lock().map_err(|_| RaceError::InternalError {
                    message: "Failed to acquire timers lock".to_string(),
                })?;
                for room_id in &rooms_to_remove {
                    timers.cancel_room(room_id);
                }
            }

            {
                let mut stats = self.stats.write().map_err(|_| RaceError::InternalError {
                    message: "Failed to acquire stats lock".to_string(),
                })?;
                stats.sessions_cleaned += cleaned_count;
            }
            self.metrics_collector.record_sessions_cleaned(cleaned_count);
        }

        if cleaned_count > 0 {
            info!("Swept {} finished sessions past retention", cleaned_count);
        }

        Ok(cleaned_count as usize)
    }

    /// Start the cleanup task that runs periodically
    pub fn start_cleanup_task(self: Arc<Self>) -> Result<()> {
        let manager = Arc::clone(&self);

        tokio::spawn(async move {
            let mut cleanup_interval =
                interval(Duration::from_secs(manager.settings.cleanup_interval_seconds));

            loop {
                cleanup_interval.tick().await;

                if let Err(e) = manager.cleanup_stale_sessions().await {
                    error!("Error during session cleanup: {}", e);
                }
            }
        });

        info!("Started session cleanup task");
        Ok(())
    }

    /// Cancel every pending timer and discard unfinished sessions
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut timers = self.timers.lock().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire timers lock".to_string(),
            })?;
            timers.cancel_all();
        }

        let discarded = {
            let mut sessions = self.sessions.write().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire sessions lock".to_string(),
            })?;
            let discarded = sessions
                .values()
                .filter(|session| !session.status().is_terminal())
                .count();
            sessions.clear();
            discarded
        };

        if discarded > 0 {
            info!(
                "Discarded {} unfinished sessions ({})",
                discarded,
                AbandonReason::Shutdown
            );
            {
                let mut stats = self.stats.write().map_err(|_| RaceError::InternalError {
                    message: "Failed to acquire stats lock".to_string(),
                })?;
                stats.races_abandoned += discarded as u64;
            }
            self.metrics_collector
                .session()
                .races_abandoned_total
                .with_label_values(&["shutdown"])
                .inc_by(discarded as u64);
        }

        info!("Race manager shut down");
        Ok(())
    }

    /// Get a snapshot of one session
    pub async fn session(&self, room_id: RoomId) -> Result<Option<RaceSession>> {
        let sessions = self.sessions.read().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire sessions lock".to_string(),
        })?;

        Ok(sessions.get(&room_id).cloned())
    }

    /// Get a snapshot of the session a user is registered in
    pub async fn session_for_user(&self, user_id: &UserId) -> Result<Option<RaceSession>> {
        match self.registry.room_for_user(user_id)? {
            Some(room_id) => self.session(room_id).await,
            None => Ok(None),
        }
    }

    /// Get snapshots of all live sessions
    pub async fn all_sessions(&self) -> Result<Vec<RaceSession>> {
        let sessions = self.sessions.read().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire sessions lock".to_string(),
        })?;

        Ok(sessions.values().cloned().collect())
    }

    /// Number of players currently waiting in the queue
    pub fn queue_depth(&self) -> Result<usize> {
        let queue = self.queue.lock().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire queue lock".to_string(),
        })?;

        Ok(queue.len())
    }

    /// Snapshot of the waiting queue in FIFO order
    pub fn waiting_players(&self) -> Result<Vec<PlayerTicket>> {
        let queue = self.queue.lock().map_err(|_| RaceError::InternalError {
            message: "Failed to acquire queue lock".to_string(),
        })?;

        Ok(queue.waiting_tickets())
    }

    /// Get current manager statistics
    pub async fn get_stats(&self) -> Result<RaceManagerStats> {
        let mut stats = self
            .stats
            .read()
            .map_err(|_| RaceError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?
            .clone();

        stats.active_sessions = {
            let sessions = self.sessions.read().map_err(|_| RaceError::InternalError {
                message: "Failed to acquire sessions lock".to_string(),
            })?;
            sessions.len()
        };
        stats.players_waiting = self.queue_depth()?;

        Ok(stats)
    }
}

/// Build the end event, the persistence outcome, and the ticket list for a
/// session that just finished
fn finish_artifacts(
    session: &RaceSession,
) -> Result<(GameEnd, RaceOutcome, Vec<PlayerTicket>)> {
    let end_event = session
        .game_end_event()
        .ok_or_else(|| RaceError::InternalError {
            message: format!("Finished session {} produced no end event", session.id()),
        })?;
    let outcome = build_outcome(session).ok_or_else(|| RaceError::InternalError {
        message: format!("Finished session {} produced no outcome", session.id()),
    })?;

    Ok((end_event, outcome, session.players().to_vec()))
}

/// Assemble the persistence record for a finished session
fn build_outcome(session: &RaceSession) -> Option<RaceOutcome> {
    let winner_id = session.winner_id()?;
    let winner = session.player(winner_id)?;
    let start_time = session.start_time()?;
    let end_time = session.end_time()?;

    let players = session
        .players()
        .iter()
        .map(|ticket| PlayerResult {
            user_id: ticket.user_id.clone(),
            username: ticket.username.clone(),
            final_position: session.positions().get(&ticket.user_id).copied().unwrap_or(0.0),
            tap_count: session.tap_counts().get(&ticket.user_id).copied().unwrap_or(0),
            is_winner: ticket.user_id == *winner_id,
        })
        .collect();

    Some(RaceOutcome {
        room_id: session.id(),
        players,
        winner: WinnerSummary {
            user_id: winner.user_id.clone(),
            username: winner.username.clone(),
        },
        duration_ms: session.duration_ms().unwrap_or(0),
        start_time,
        end_time,
    })
}
