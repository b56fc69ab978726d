//! High concurrency stress tests for command processing
//!
//! These tests validate system behavior under high load conditions and
//! ensure the pairing, tap, and cancel paths stay consistent when driven
//! from many tasks at once.

use starting_grid::race::RaceManager;
use starting_grid::results::store::MockResultStore;
use starting_grid::results::{ResultStore, ResultWriter};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

// Import test fixtures
use crate::fixtures::{
    cancel_match_command, create_test_settings, find_match_command, tap_command,
    tap_until_finished, MockEventPublisher,
};

/// Create a test system shared across many concurrent tasks
async fn create_load_test_system() -> (
    Arc<RaceManager>,
    Arc<MockEventPublisher>,
    Arc<MockResultStore>,
) {
    let event_publisher = Arc::new(MockEventPublisher::new());
    let result_store = Arc::new(MockResultStore::new());
    let result_writer = Arc::new(ResultWriter::start(
        result_store.clone() as Arc<dyn ResultStore>,
        256,
    ));

    let manager = Arc::new(RaceManager::new(
        create_test_settings(),
        event_publisher.clone(),
        result_writer,
    ));

    (manager, event_publisher, result_store)
}

#[tokio::test]
async fn test_100_concurrent_find_match_requests() {
    let (manager, event_publisher, _result_store) = create_load_test_system().await;
    let concurrent_requests = 100;

    let start_time = Instant::now();

    // Every racer queues at once
    let handles: Vec<_> = (0..concurrent_requests)
        .map(|i| {
            let command = find_match_command(
                &format!("load_test_player_{}", i),
                &format!("load-conn-{}", i),
            );
            let manager = manager.clone();
            tokio::spawn(async move { manager.handle_find_match(command).await })
        })
        .collect();

    let results = futures::future::join_all(handles).await;

    let duration = start_time.elapsed();

    // Verify all requests completed successfully
    let mut successful_requests = 0;
    let mut paired_requests = 0;
    for result in results {
        match result {
            Ok(Ok(outcome)) => {
                successful_requests += 1;
                if outcome.is_some() {
                    paired_requests += 1;
                }
            }
            Ok(Err(e)) => eprintln!("Request failed: {}", e),
            Err(e) => eprintln!("Task failed: {}", e),
        }
    }

    assert_eq!(
        successful_requests, concurrent_requests,
        "All requests should succeed"
    );
    assert_eq!(
        paired_requests,
        concurrent_requests / 2,
        "Every second racer should complete a pair"
    );
    assert!(
        duration < Duration::from_secs(10),
        "100 requests should complete within 10 seconds, took: {:?}",
        duration
    );

    // An even queue drains completely into rooms
    assert_eq!(
        event_publisher.count_events_of_type("MatchFound"),
        concurrent_requests / 2
    );
    let stats = manager.get_stats().await.unwrap();
    assert_eq!(stats.matches_found, (concurrent_requests / 2) as u64);
    assert_eq!(stats.active_sessions, concurrent_requests / 2);
    assert_eq!(stats.players_waiting, 0);

    let throughput = concurrent_requests as f64 / duration.as_secs_f64();
    println!(
        "✅ 100 concurrent requests test passed - Throughput: {:.1} requests/sec",
        throughput
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_races_run_to_completion() {
    let (manager, event_publisher, result_store) = create_load_test_system().await;
    let room_count = 20;

    // Pair up forty racers into twenty rooms
    let mut rooms = Vec::new();
    for i in 0..room_count {
        Arc::clone(&manager)
            .handle_find_match(find_match_command(
                &format!("racer_a_{}", i),
                &format!("conn-a-{}", i),
            ))
            .await
            .unwrap();
        let room_id = Arc::clone(&manager)
            .handle_find_match(find_match_command(
                &format!("racer_b_{}", i),
                &format!("conn-b-{}", i),
            ))
            .await
            .unwrap()
            .expect("pair should form a room");
        rooms.push(room_id);
    }

    // All countdowns run to the start in parallel
    tokio::time::sleep(Duration::from_millis(4100)).await;
    assert_eq!(
        event_publisher.count_events_of_type("GameStart"),
        room_count
    );

    // Both racers in every room tap flat out until someone wins
    let mut handles = Vec::new();
    for (i, room_id) in rooms.iter().enumerate() {
        for side in ["a", "b"] {
            let manager = manager.clone();
            let room_id = *room_id;
            let connection = format!("conn-{}-{}", side, i);
            handles.push(tokio::spawn(async move {
                tap_until_finished(&manager, room_id, &connection, 60).await
            }));
        }
    }
    futures::future::join_all(handles).await;

    // Every room produced exactly one end event
    assert_eq!(event_publisher.count_events_of_type("GameEnd"), room_count);

    // Wait for the result writer to drain its queue
    for _ in 0..200 {
        if result_store.result_count().await.unwrap() == room_count {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(result_store.result_count().await.unwrap(), room_count);

    let stats = manager.get_stats().await.unwrap();
    assert_eq!(stats.races_started, room_count as u64);
    assert_eq!(stats.races_finished, room_count as u64);
    assert_eq!(stats.active_sessions, room_count);

    println!(
        "✅ Concurrent races test passed - {} rooms raced to completion",
        room_count
    );
}

#[tokio::test]
async fn test_rapid_fire_queue_churn() {
    let (manager, event_publisher, _result_store) = create_load_test_system().await;
    let churn_count = 200;

    let start_time = Instant::now();

    // Queue and immediately cancel, over and over
    for i in 0..churn_count {
        let user = format!("churn_player_{}", i);
        Arc::clone(&manager)
            .handle_find_match(find_match_command(&user, &format!("churn-conn-{}", i)))
            .await
            .unwrap();
        let cancelled = manager
            .handle_cancel_match(cancel_match_command(&user))
            .await
            .unwrap();
        assert!(cancelled, "Racer should still be waiting when cancelled");
    }

    let duration = start_time.elapsed();

    assert_eq!(manager.queue_depth().unwrap(), 0);
    assert_eq!(event_publisher.count_events_of_type("MatchFound"), 0);
    assert!(
        duration < Duration::from_secs(5),
        "Churn should stay fast, took: {:?}",
        duration
    );

    // The queue still pairs racers afterwards
    Arc::clone(&manager)
        .handle_find_match(find_match_command("fresh_a", "fresh-conn-a"))
        .await
        .unwrap();
    let room = Arc::clone(&manager)
        .handle_find_match(find_match_command("fresh_b", "fresh-conn-b"))
        .await
        .unwrap();
    assert!(room.is_some());

    println!(
        "✅ Rapid fire queue churn test passed - {} cycles in {:?}",
        churn_count, duration
    );
}

#[tokio::test]
async fn test_mixed_commands_under_load() {
    let (manager, _event_publisher, _result_store) = create_load_test_system().await;
    let racer_count = 60;

    // Sixty racers queue while thirty cancels and a pile of stray taps
    // race against them
    let find_handles: Vec<_> = (0..racer_count)
        .map(|i| {
            let command = find_match_command(
                &format!("mixed_player_{}", i),
                &format!("mixed-conn-{}", i),
            );
            let manager = manager.clone();
            tokio::spawn(async move { manager.handle_find_match(command).await })
        })
        .collect();

    let cancel_handles: Vec<_> = (0..racer_count / 2)
        .map(|i| {
            let command = cancel_match_command(&format!("mixed_player_{}", i));
            let manager = manager.clone();
            tokio::spawn(async move { manager.handle_cancel_match(command).await })
        })
        .collect();

    let tap_handles: Vec<_> = (0..20)
        .map(|i| {
            let command = tap_command(
                starting_grid::utils::generate_room_id(),
                &format!("stray-conn-{}", i),
            );
            let manager = manager.clone();
            tokio::spawn(async move { manager.handle_tap(command).await })
        })
        .collect();

    let find_results = futures::future::join_all(find_handles).await;
    let cancel_results = futures::future::join_all(cancel_handles).await;
    let tap_results = futures::future::join_all(tap_handles).await;

    for result in find_results {
        assert!(matches!(result, Ok(Ok(_))), "Find match should not error");
    }
    for result in tap_results {
        assert!(matches!(result, Ok(Ok(()))), "Stray taps should be ignored");
    }

    // A cancel only lands while its racer is still waiting
    let cancels_landed = cancel_results
        .into_iter()
        .filter(|result| matches!(result, Ok(Ok(true))))
        .count();

    // Whoever was neither cancelled nor paired is still in the queue
    let stats = manager.get_stats().await.unwrap();
    assert_eq!(
        2 * stats.matches_found as usize + stats.players_waiting + cancels_landed,
        racer_count,
        "Racers must be paired, waiting, or cancelled - nothing else"
    );

    // No racer appears in two rooms
    let sessions = manager.all_sessions().await.unwrap();
    let mut seen_users = HashSet::new();
    for session in &sessions {
        assert_eq!(session.players().len(), 2);
        for player in session.players() {
            assert!(
                seen_users.insert(player.user_id.clone()),
                "Racer {} appears in more than one room",
                player.user_id
            );
        }
    }

    println!(
        "✅ Mixed commands test passed - {} rooms, {} waiting, {} cancelled",
        stats.matches_found, stats.players_waiting, cancels_landed
    );
}

#[tokio::test]
async fn test_system_under_sustained_load() {
    let (manager, _event_publisher, _result_store) = create_load_test_system().await;

    let test_duration = Duration::from_secs(2);
    let request_interval = Duration::from_millis(20);

    let start_time = Instant::now();
    let mut handles = Vec::new();
    let mut counter: usize = 0;

    // A steady stream of arrivals for the whole window
    let mut interval = tokio::time::interval(request_interval);
    while start_time.elapsed() < test_duration {
        interval.tick().await;

        let command = find_match_command(
            &format!("sustained_player_{}", counter),
            &format!("sustained-conn-{}", counter),
        );
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.handle_find_match(command).await
        }));
        counter += 1;
    }

    let results = futures::future::join_all(handles).await;
    let actual_duration = start_time.elapsed();

    let successful_requests = results
        .iter()
        .filter(|result| matches!(result, Ok(Ok(_))))
        .count();

    assert_eq!(
        successful_requests, counter,
        "Every arrival should be processed"
    );
    assert!(
        actual_duration <= test_duration + Duration::from_secs(2),
        "System should stay responsive under load"
    );

    // Arrivals pair off two at a time, with at most one racer left over
    let stats = manager.get_stats().await.unwrap();
    assert_eq!(stats.matches_found as usize, counter / 2);
    assert_eq!(stats.players_waiting, counter % 2);

    let throughput = successful_requests as f64 / actual_duration.as_secs_f64();
    println!(
        "✅ Sustained load test passed - {:.1} req/sec over {:?}",
        throughput, actual_duration
    );
}
