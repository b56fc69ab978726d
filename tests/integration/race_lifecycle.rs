//! Complete race lifecycle integration tests
//!
//! These tests validate the entire flow from find match requests through
//! pairing, countdown, the tap race, result persistence, and session
//! retention. The tokio clock is paused so every timer fires on demand.

use starting_grid::race::{RaceManager, SessionStatus};
use starting_grid::results::store::MockResultStore;
use starting_grid::results::{ResultStore, ResultWriter};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

// Import test fixtures
use crate::fixtures::{
    create_test_settings, disconnect_notice, find_match_command, settle, tap_command,
    MockEventPublisher,
};

/// Integration test setup that creates a complete system
async fn create_test_system() -> (
    Arc<RaceManager>,
    Arc<MockEventPublisher>,
    Arc<MockResultStore>,
) {
    let event_publisher = Arc::new(MockEventPublisher::new());
    let result_store = Arc::new(MockResultStore::new());
    let result_writer = Arc::new(ResultWriter::start(
        result_store.clone() as Arc<dyn ResultStore>,
        64,
    ));

    let manager = Arc::new(RaceManager::new(
        create_test_settings(),
        event_publisher.clone(),
        result_writer,
    ));

    (manager, event_publisher, result_store)
}

/// Queue two racers and advance the clock until the race is running
async fn start_race(manager: &Arc<RaceManager>) -> starting_grid::types::RoomId {
    Arc::clone(manager)
        .handle_find_match(find_match_command("alice", "conn-alice"))
        .await
        .unwrap();
    let room_id = Arc::clone(manager)
        .handle_find_match(find_match_command("bob", "conn-bob"))
        .await
        .unwrap()
        .expect("pair should form a room");

    // Start delay plus the full countdown
    sleep(Duration::from_millis(4100)).await;
    room_id
}

#[tokio::test(start_paused = true)]
async fn test_complete_race_lifecycle() {
    let (manager, event_publisher, result_store) = create_test_system().await;

    // Step 1: Two racers queue and are paired immediately
    Arc::clone(&manager)
        .handle_find_match(find_match_command("alice", "conn-alice"))
        .await
        .unwrap();
    let room_id = Arc::clone(&manager)
        .handle_find_match(find_match_command("bob", "conn-bob"))
        .await
        .unwrap()
        .expect("pair should form a room");

    assert_eq!(event_publisher.count_events_of_type("MatchFound"), 1);
    let session = manager.session(room_id).await.unwrap().unwrap();
    assert_eq!(session.status(), SessionStatus::Matched);

    // Step 2: The countdown begins after the start delay
    sleep(Duration::from_millis(1100)).await;
    let session = manager.session(room_id).await.unwrap().unwrap();
    assert_eq!(session.status(), SessionStatus::Countdown);
    assert_eq!(event_publisher.countdown_values(room_id), vec![3]);

    // Step 3: The zero tick starts the race
    sleep(Duration::from_millis(3000)).await;
    let session = manager.session(room_id).await.unwrap().unwrap();
    assert_eq!(session.status(), SessionStatus::Racing);
    assert_eq!(event_publisher.countdown_values(room_id), vec![3, 2, 1, 0]);
    assert_eq!(event_publisher.count_events_of_type("GameStart"), 1);

    // Step 4: Alternating taps move both racers toward the finish line
    for _ in 0..49 {
        Arc::clone(&manager)
            .handle_tap(tap_command(room_id, "conn-alice"))
            .await
            .unwrap();
        Arc::clone(&manager)
            .handle_tap(tap_command(room_id, "conn-bob"))
            .await
            .unwrap();
    }
    let session = manager.session(room_id).await.unwrap().unwrap();
    assert_eq!(session.status(), SessionStatus::Racing);
    assert_eq!(session.positions()["alice"], 98.0);
    assert_eq!(session.positions()["bob"], 98.0);

    // Alice's fiftieth tap crosses the line
    Arc::clone(&manager)
        .handle_tap(tap_command(room_id, "conn-alice"))
        .await
        .unwrap();
    let session = manager.session(room_id).await.unwrap().unwrap();
    assert_eq!(session.status(), SessionStatus::Finished);
    assert_eq!(session.winner_id(), Some(&"alice".to_string()));
    assert_eq!(event_publisher.count_events_of_type("PlayerMove"), 99);

    // Step 5: The end event carries the final standings
    let ends = event_publisher.game_end_events();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].room_id, room_id);
    assert_eq!(ends[0].winner.user_id, "alice");
    assert_eq!(ends[0].final_positions["alice"], 100.0);
    assert_eq!(ends[0].final_positions["bob"], 98.0);
    assert_eq!(ends[0].tap_counts["alice"], 50);
    assert_eq!(ends[0].tap_counts["bob"], 49);
    assert!(ends[0].duration_ms >= 0);

    // Taps after the finish change nothing
    Arc::clone(&manager)
        .handle_tap(tap_command(room_id, "conn-bob"))
        .await
        .unwrap();
    assert_eq!(event_publisher.count_events_of_type("PlayerMove"), 99);

    // Step 6: The outcome is persisted off the hot path
    settle().await;
    assert_eq!(result_store.result_count().await.unwrap(), 1);
    let outcome = &result_store.get_persist_calls()[0];
    assert_eq!(outcome.room_id, room_id);
    assert!(outcome.won_by(&"alice".to_string()));
    assert_eq!(outcome.players.len(), 2);

    // Step 7: Both racers can queue again while the session is retained
    Arc::clone(&manager)
        .handle_find_match(find_match_command("alice", "conn-alice"))
        .await
        .unwrap();
    let second_room = Arc::clone(&manager)
        .handle_find_match(find_match_command("bob", "conn-bob"))
        .await
        .unwrap()
        .expect("finished racers should pair again");
    assert_ne!(second_room, room_id);

    let finished = manager.session(room_id).await.unwrap();
    assert!(finished.is_some(), "finished session should still be queryable");

    // Step 8: The retention window expires and the session is retired
    sleep(Duration::from_secs(31)).await;
    assert!(manager.session(room_id).await.unwrap().is_none());

    let stats = manager.get_stats().await.unwrap();
    assert_eq!(stats.matches_found, 2);
    assert_eq!(stats.races_finished, 1);
    assert!(stats.sessions_cleaned >= 1);

    println!("✅ Complete race lifecycle test passed");
}

#[tokio::test(start_paused = true)]
async fn test_countdown_tick_schedule() {
    let (manager, event_publisher, _result_store) = create_test_system().await;

    Arc::clone(&manager)
        .handle_find_match(find_match_command("alice", "conn-alice"))
        .await
        .unwrap();
    let room_id = Arc::clone(&manager)
        .handle_find_match(find_match_command("bob", "conn-bob"))
        .await
        .unwrap()
        .unwrap();

    // Nothing ticks during the start delay
    sleep(Duration::from_millis(900)).await;
    assert!(event_publisher.countdown_values(room_id).is_empty());

    // One tick per second, counting down to zero
    sleep(Duration::from_millis(200)).await;
    assert_eq!(event_publisher.countdown_values(room_id), vec![3]);
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(event_publisher.countdown_values(room_id), vec![3, 2]);
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(event_publisher.countdown_values(room_id), vec![3, 2, 1]);

    // The zero tick is the last one and flips the session to racing
    sleep(Duration::from_millis(1000)).await;
    assert_eq!(event_publisher.countdown_values(room_id), vec![3, 2, 1, 0]);
    assert_eq!(event_publisher.count_events_of_type("GameStart"), 1);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(event_publisher.countdown_values(room_id), vec![3, 2, 1, 0]);

    println!("✅ Countdown tick schedule test passed");
}

#[tokio::test(start_paused = true)]
async fn test_survivor_wins_when_opponent_disconnects() {
    let (manager, event_publisher, result_store) = create_test_system().await;
    let room_id = start_race(&manager).await;

    // Bob has made some progress when Alice's connection drops
    for _ in 0..10 {
        Arc::clone(&manager)
            .handle_tap(tap_command(room_id, "conn-bob"))
            .await
            .unwrap();
    }
    Arc::clone(&manager)
        .handle_disconnect(disconnect_notice("conn-alice"))
        .await
        .unwrap();

    let session = manager.session(room_id).await.unwrap().unwrap();
    assert_eq!(session.status(), SessionStatus::Finished);
    assert_eq!(session.winner_id(), Some(&"bob".to_string()));

    // The forfeit ends the race with the standings as they were
    let ends = event_publisher.game_end_events();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].winner.user_id, "bob");
    assert_eq!(ends[0].final_positions["bob"], 20.0);
    assert_eq!(ends[0].final_positions["alice"], 0.0);
    assert_eq!(ends[0].tap_counts["bob"], 10);
    assert_eq!(ends[0].tap_counts["alice"], 0);

    settle().await;
    assert_eq!(result_store.result_count().await.unwrap(), 1);
    assert!(result_store.get_persist_calls()[0].won_by(&"bob".to_string()));

    let stats = manager.get_stats().await.unwrap();
    assert_eq!(stats.races_finished, 1);
    assert_eq!(stats.races_abandoned, 0);

    // The survivor is free to queue for another race
    let waiting = Arc::clone(&manager)
        .handle_find_match(find_match_command("bob", "conn-bob"))
        .await
        .unwrap();
    assert!(waiting.is_none());

    println!("✅ Survivor forfeit test passed");
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_countdown_voids_race() {
    let (manager, event_publisher, result_store) = create_test_system().await;

    Arc::clone(&manager)
        .handle_find_match(find_match_command("alice", "conn-alice"))
        .await
        .unwrap();
    let room_id = Arc::clone(&manager)
        .handle_find_match(find_match_command("bob", "conn-bob"))
        .await
        .unwrap()
        .unwrap();

    // One tick has gone out when Alice drops
    sleep(Duration::from_millis(1100)).await;
    assert_eq!(event_publisher.countdown_values(room_id), vec![3]);
    Arc::clone(&manager)
        .handle_disconnect(disconnect_notice("conn-alice"))
        .await
        .unwrap();

    // The session vanishes without an end event
    assert!(manager.session(room_id).await.unwrap().is_none());
    sleep(Duration::from_secs(5)).await;
    assert_eq!(event_publisher.countdown_values(room_id), vec![3]);
    assert_eq!(event_publisher.count_events_of_type("GameStart"), 0);
    assert_eq!(event_publisher.count_events_of_type("GameEnd"), 0);

    settle().await;
    assert_eq!(result_store.result_count().await.unwrap(), 0);

    let stats = manager.get_stats().await.unwrap();
    assert_eq!(stats.races_abandoned, 1);
    assert_eq!(stats.races_finished, 0);

    // Both racers can start over
    Arc::clone(&manager)
        .handle_find_match(find_match_command("bob", "conn-bob"))
        .await
        .unwrap();
    let rematch = Arc::clone(&manager)
        .handle_find_match(find_match_command("alice", "conn-alice-2"))
        .await
        .unwrap();
    assert!(rematch.is_some());

    println!("✅ Countdown disconnect test passed");
}

#[tokio::test]
async fn test_waiting_player_disconnect_clears_queue() {
    let (manager, event_publisher, _result_store) = create_test_system().await;

    Arc::clone(&manager)
        .handle_find_match(find_match_command("alice", "conn-alice"))
        .await
        .unwrap();
    assert_eq!(manager.queue_depth().unwrap(), 1);

    Arc::clone(&manager)
        .handle_disconnect(disconnect_notice("conn-alice"))
        .await
        .unwrap();
    assert_eq!(manager.queue_depth().unwrap(), 0);

    // The next racer finds nobody to pair with
    let waiting = Arc::clone(&manager)
        .handle_find_match(find_match_command("bob", "conn-bob"))
        .await
        .unwrap();
    assert!(waiting.is_none());
    assert_eq!(event_publisher.count_events_of_type("MatchFound"), 0);

    println!("✅ Waiting player disconnect test passed");
}

#[tokio::test(start_paused = true)]
async fn test_racers_accumulate_results_across_races() {
    let (manager, event_publisher, result_store) = create_test_system().await;

    // First race: Alice taps alone and wins
    let first_room = start_race(&manager).await;
    for _ in 0..50 {
        Arc::clone(&manager)
            .handle_tap(tap_command(first_room, "conn-alice"))
            .await
            .unwrap();
    }

    // Second race during the first session's retention window, Bob wins
    let second_room = start_race(&manager).await;
    assert_ne!(second_room, first_room);
    for _ in 0..50 {
        Arc::clone(&manager)
            .handle_tap(tap_command(second_room, "conn-bob"))
            .await
            .unwrap();
    }

    assert_eq!(event_publisher.count_events_of_type("GameEnd"), 2);

    settle().await;
    assert_eq!(result_store.result_count().await.unwrap(), 2);

    // Each racer now has one win and one loss on record
    let alice_stats = result_store
        .player_stats(&"alice".to_string())
        .await
        .unwrap()
        .expect("alice should have stats");
    assert_eq!(alice_stats.games, 2);
    assert_eq!(alice_stats.wins, 1);
    assert_eq!(alice_stats.losses, 1);
    assert_eq!(alice_stats.total_taps, 50);

    let bob_stats = result_store
        .player_stats(&"bob".to_string())
        .await
        .unwrap()
        .expect("bob should have stats");
    assert_eq!(bob_stats.wins, 1);
    assert_eq!(
        result_store
            .wins_for_player(&"bob".to_string())
            .await
            .unwrap()
            .len(),
        1
    );

    let stats = manager.get_stats().await.unwrap();
    assert_eq!(stats.races_finished, 2);

    println!("✅ Results accumulate across races test passed");
}

#[tokio::test(start_paused = true)]
async fn test_race_concludes_when_persistence_fails() {
    let (manager, event_publisher, result_store) = create_test_system().await;
    result_store.set_failing(true);

    let room_id = start_race(&manager).await;
    for _ in 0..50 {
        Arc::clone(&manager)
            .handle_tap(tap_command(room_id, "conn-alice"))
            .await
            .unwrap();
    }

    // The race ends and the event goes out despite the store rejecting writes
    let session = manager.session(room_id).await.unwrap().unwrap();
    assert_eq!(session.status(), SessionStatus::Finished);
    let ends = event_publisher.game_end_events();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].winner.user_id, "alice");

    settle().await;
    assert_eq!(result_store.get_persist_calls().len(), 1);
    assert_eq!(result_store.result_count().await.unwrap(), 0);

    let stats = manager.get_stats().await.unwrap();
    assert_eq!(stats.races_finished, 1);

    // The next race persists normally once the store recovers
    result_store.set_failing(false);
    let second_room = start_race(&manager).await;
    for _ in 0..50 {
        Arc::clone(&manager)
            .handle_tap(tap_command(second_room, "conn-bob"))
            .await
            .unwrap();
    }
    settle().await;
    assert_eq!(result_store.result_count().await.unwrap(), 1);

    println!("✅ Persistence failure tolerance test passed");
}
