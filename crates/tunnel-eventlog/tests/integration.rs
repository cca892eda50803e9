//! Integration tests for tunnel-eventlog
//!
//! End-to-end scenarios through the public API: fan-out to several readers,
//! following rotations, draining shutdown and restoring a directory.

use std::collections::HashSet;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::time::timeout;

use tunnel_eventlog::{
    Event, EventLogConfig, EventLogError, EventLogPosition, EventManager, EventReader, EventType,
    SubscribeOptions, Subscription, read_log_file, record,
};

const WAIT: Duration = Duration::from_secs(5);

async fn create_manager(config: EventLogConfig) -> EventManager {
    EventManager::new(config).await.unwrap()
}

/// Receive exactly `count` events or fail
async fn collect(sub: &mut Subscription, count: usize) -> Vec<Event> {
    let mut events = Vec::with_capacity(count);
    while events.len() < count {
        match timeout(WAIT, sub.next()).await {
            Ok(Some(Ok(event))) => events.push(event),
            Ok(Some(Err(e))) => panic!("subscription failed after {} events: {e}", events.len()),
            Ok(None) => panic!("subscription closed after {} events", events.len()),
            Err(_) => panic!("timed out after {} events", events.len()),
        }
    }
    events
}

// ============================================================================
// Fan-out
// ============================================================================

#[tokio::test]
async fn test_multi_reader_fan_out() {
    let temp = TempDir::new().unwrap();
    let manager = create_manager(EventLogConfig::with_directory(temp.path())).await;

    for i in 0..10 {
        manager
            .push(EventType::PEER_ADD, 1_700_000_000 + i, &json!({"seq": i}))
            .await
            .unwrap();
    }

    let log_id = manager.current_log().await;
    let mut subs = Vec::new();
    for _ in 0..3 {
        subs.push(
            manager
                .subscribe(SubscribeOptions::from_position(EventLogPosition::start_of(
                    log_id.clone(),
                )))
                .await
                .unwrap(),
        );
    }

    // More writes while the readers are running
    let pusher = manager.clone();
    let extra = tokio::spawn(async move {
        pusher.push(EventType::PEER_REMOVE, 0, "eleven").await.unwrap();
        pusher.push(EventType::PEER_REMOVE, 0, "twelve").await.unwrap();
    });

    let mut offsets_per_reader = Vec::new();
    for sub in subs.iter_mut() {
        let events = collect(sub, 10).await;
        assert!(events.iter().all(|e| e.event_type == EventType::PEER_ADD));
        assert!(events.iter().all(|e| e.log_id == log_id));
        assert!(events.windows(2).all(|w| w[0].offset < w[1].offset));
        for (i, event) in events.iter().enumerate() {
            let value: serde_json::Value = event.decode_data().unwrap();
            assert_eq!(value["seq"], i as i64);
        }
        offsets_per_reader.push(events.iter().map(|e| e.offset).collect::<Vec<_>>());
    }

    // Every reader agrees on where each event lives
    assert_eq!(offsets_per_reader[0], offsets_per_reader[1]);
    assert_eq!(offsets_per_reader[1], offsets_per_reader[2]);

    extra.await.unwrap();
    for sub in subs.iter_mut() {
        let tail = collect(sub, 2).await;
        assert!(tail.iter().all(|e| e.event_type == EventType::PEER_REMOVE));
    }

    manager.shutdown().await.unwrap();
    for sub in subs.iter_mut() {
        assert!(matches!(sub.next().await, Some(Err(EventLogError::Cancelled))));
    }
}

#[tokio::test]
async fn test_offsets_are_contiguous() {
    let temp = TempDir::new().unwrap();
    let manager = create_manager(EventLogConfig::with_directory(temp.path())).await;

    let values = ["a", "bb", "ccc", "dddd", "eeeee"];
    let mut expected = Vec::new();
    let mut offset = 0i64;
    for v in values {
        manager.push(EventType::PEER_TRAFFIC, 7, v).await.unwrap();
        expected.push(offset);
        offset += record::encode(EventType::PEER_TRAFFIC, 7, v).unwrap().len() as i64;
    }

    let mut sub = manager.subscribe(SubscribeOptions::from_start()).await.unwrap();
    let events = collect(&mut sub, values.len()).await;
    let offsets: Vec<_> = events.iter().map(|e| e.offset).collect();
    assert_eq!(offsets, expected);

    manager.shutdown().await.unwrap();

    let files = std::fs::read_dir(temp.path()).unwrap().count();
    assert_eq!(files, 1);
    let path = std::fs::read_dir(temp.path())
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    assert_eq!(std::fs::metadata(path).unwrap().len() as i64, offset);
}

// ============================================================================
// Rotation
// ============================================================================

#[tokio::test]
async fn test_catch_up_across_rotations() {
    let temp = TempDir::new().unwrap();
    let config = EventLogConfig::with_directory(temp.path())
        .with_rotation_size(100)
        .with_max_retained_files(1);
    let manager = create_manager(config).await;
    let first_log = manager.current_log().await;

    let mut sub = manager
        .subscribe(SubscribeOptions::from_position(EventLogPosition::start_of(
            first_log.clone(),
        )))
        .await
        .unwrap();

    let mut seen = Vec::new();
    for i in 0..12 {
        manager
            .push(EventType::PEER_UPDATE, 0, &json!({"n": i, "pad": "xxxxxxxxxxxxxxxxxxxx"}))
            .await
            .unwrap();
        // Keep the reader within retention before writing more
        let event = collect(&mut sub, 1).await.remove(0);
        seen.push(event);
    }

    let numbers: Vec<i64> = seen
        .iter()
        .map(|e| e.decode_data::<serde_json::Value>().unwrap()["n"].as_i64().unwrap())
        .collect();
    assert_eq!(numbers, (0..12).collect::<Vec<_>>());

    let logs: HashSet<_> = seen.iter().map(|e| e.log_id.clone()).collect();
    assert!(logs.len() >= 3, "expected at least two rotations, saw {} logs", logs.len());
    assert_eq!(seen[0].log_id, first_log);

    // Each file restarts at offset zero
    for pair in seen.windows(2) {
        if pair[0].log_id != pair[1].log_id {
            assert_eq!(pair[1].offset, 0);
        }
    }

    let files = manager.log_files().await;
    assert!(files.len() <= 2, "one rotated plus the current file");
    assert!(!manager.storage().has_log(&first_log).await);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reader_behind_retention_gets_too_old() {
    let temp = TempDir::new().unwrap();
    let config = EventLogConfig::with_directory(temp.path())
        .with_rotation_size(50)
        .with_max_retained_files(1)
        .with_subscriber_buffer(1);
    let manager = create_manager(config).await;

    let first_log = manager.current_log().await;
    manager.push(EventType::PEER_ADD, 1, "first").await.unwrap();

    // Nobody reads yet, so the tailer parks on delivery inside the first log
    let mut sub = manager
        .subscribe(SubscribeOptions::from_position(EventLogPosition::start_of(
            first_log.clone(),
        )))
        .await
        .unwrap();

    let storage = manager.storage().clone();
    let mut pushed = 0;
    while storage.has_log(&first_log).await {
        manager.push(EventType::PEER_ADD, 1, "filler").await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        pushed += 1;
        assert!(pushed < 200, "retention never dropped the first log");
    }

    // The reader finishes the sealed file, then learns its log is gone
    let mut delivered = Vec::new();
    let terminal = loop {
        match timeout(WAIT, sub.next()).await.unwrap() {
            Some(Ok(event)) => delivered.push(event),
            Some(Err(e)) => break e,
            None => panic!("subscription closed without an error"),
        }
    };
    assert!(matches!(terminal, EventLogError::TooOld(_)), "got {terminal:?}");
    assert!(!delivered.is_empty());
    assert!(delivered.iter().all(|e| e.log_id == first_log));

    manager.shutdown().await.unwrap();
}

// ============================================================================
// Shutdown and restore
// ============================================================================

#[tokio::test]
async fn test_shutdown_drains_queue() {
    let temp = TempDir::new().unwrap();
    let count = 250;
    {
        let manager = create_manager(EventLogConfig::with_directory(temp.path())).await;
        for i in 0..count {
            manager.push(EventType::PEER_TRAFFIC, 1, &i).await.unwrap();
        }
        manager.shutdown().await.unwrap();
    }

    // Fresh manager on the same directory
    let manager = create_manager(EventLogConfig::with_directory(temp.path())).await;
    let mut sub = manager.subscribe(SubscribeOptions::from_start()).await.unwrap();
    let events = collect(&mut sub, count).await;
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.decode_data::<usize>().unwrap(), i);
    }
    manager.shutdown().await.unwrap();

    // And the file reads back offline too
    let info = manager.log_files().await.pop().unwrap();
    let contents = read_log_file(&info.path, info.file.log_id()).unwrap();
    assert_eq!(contents.events.len(), count);
    assert!(contents.trailing_error.is_none());
}

#[tokio::test]
async fn test_restore_keeps_current_log() {
    let temp = TempDir::new().unwrap();
    let config = EventLogConfig::with_directory(temp.path())
        .with_rotation_size(60)
        .with_max_retained_files(5);

    let (logs, current) = {
        let manager = create_manager(config.clone()).await;
        for i in 0..6 {
            manager.push(EventType::PEER_ADD, 1, &json!({"i": i})).await.unwrap();
        }
        manager.shutdown().await.unwrap();
        let logs: Vec<_> = manager
            .log_files()
            .await
            .into_iter()
            .map(|f| f.file.seq)
            .collect();
        (logs, manager.current_log().await)
    };

    let manager = create_manager(config).await;
    assert_eq!(manager.current_log().await, current);
    let restored: Vec<_> = manager
        .log_files()
        .await
        .into_iter()
        .map(|f| f.file.seq)
        .collect();
    assert_eq!(restored, logs);

    let mut sub = manager.subscribe(SubscribeOptions::from_start()).await.unwrap();
    let events = collect(&mut sub, 6).await;
    assert_eq!(events[0].decode_data::<serde_json::Value>().unwrap()["i"], 0);

    manager.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_push_blocked_on_full_queue_during_shutdown() {
    let temp = TempDir::new().unwrap();
    let config = EventLogConfig::with_directory(temp.path()).with_queue_capacity(1);
    let manager = create_manager(config.clone()).await;

    let pushes: Vec<_> = (0..200)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.push(EventType::PEER_TRAFFIC, 1, &i).await })
        })
        .collect();
    tokio::time::sleep(Duration::from_millis(5)).await;
    manager.shutdown().await.unwrap();

    let mut accepted = HashSet::new();
    for (i, push) in pushes.into_iter().enumerate() {
        match push.await.unwrap() {
            Ok(()) => {
                accepted.insert(i);
            }
            Err(EventLogError::NotRunning) => {}
            Err(e) => panic!("push {i} failed with {e}"),
        }
    }

    // Every accepted event survives a restart, nothing else was written
    let manager = create_manager(config).await;
    let mut persisted = HashSet::new();
    for info in manager.log_files().await {
        let contents = read_log_file(&info.path, info.file.log_id()).unwrap();
        assert!(contents.trailing_error.is_none());
        for event in contents.events {
            assert!(persisted.insert(event.decode_data::<usize>().unwrap()));
        }
    }
    assert_eq!(persisted, accepted);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restore_rejects_foreign_files() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("notes.txt"), b"hello").unwrap();

    let err = EventManager::new(EventLogConfig::with_directory(temp.path()))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, EventLogError::InvalidLayout(_)));
}

// ============================================================================
// Partial and corrupt records
// ============================================================================

#[tokio::test]
async fn test_record_written_in_two_parts() {
    let temp = TempDir::new().unwrap();
    let manager = create_manager(EventLogConfig::with_directory(temp.path())).await;

    let mut sub = manager.subscribe(SubscribeOptions::active()).await.unwrap();

    let bs = record::encode(EventType::PEER_FIRST_CONNECT, 5, &json!({"peer": "p1"})).unwrap();
    let (head, tail) = bs.split_at(10);
    manager.storage().write(head).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.storage().write(tail).await.unwrap();

    let event = collect(&mut sub, 1).await.remove(0);
    assert_eq!(event.event_type, EventType::PEER_FIRST_CONNECT);
    assert_eq!(event.offset, 0);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_sealed_log_fails_subscription() {
    let temp = TempDir::new().unwrap();
    let first = uuid::Uuid::new_v4().to_string();
    let second = uuid::Uuid::new_v4().to_string();

    let good = record::encode(EventType::PEER_ADD, 1, "ok").unwrap();
    let mut bad = good.clone();
    bad[0] = 0x00;
    let mut contents = good.clone();
    contents.extend_from_slice(&bad);
    std::fs::write(temp.path().join(format!("1_1_{first}")), &contents).unwrap();
    std::fs::write(temp.path().join(format!("2_2_{second}")), b"").unwrap();

    let manager = create_manager(EventLogConfig::with_directory(temp.path())).await;
    let mut sub = manager.subscribe(SubscribeOptions::from_start()).await.unwrap();

    let event = collect(&mut sub, 1).await.remove(0);
    assert_eq!(event.log_id, first);

    match timeout(WAIT, sub.next()).await.unwrap() {
        Some(Err(EventLogError::MalformedRecord { log_id, offset, .. })) => {
            assert_eq!(log_id, first);
            assert_eq!(offset, good.len() as i64);
        }
        other => panic!("expected malformed record, got {other:?}"),
    }

    manager.shutdown().await.unwrap();
}

// ============================================================================
// One writer, many readers
// ============================================================================

#[tokio::test]
async fn test_second_writer_is_refused() {
    let temp = TempDir::new().unwrap();
    let config = EventLogConfig::with_directory(temp.path());
    let manager = create_manager(config.clone()).await;
    manager.push(EventType::PEER_ADD, 1, "first").await.unwrap();

    let err = EventManager::new(config.clone()).await.err().unwrap();
    assert!(matches!(err, EventLogError::DirectoryLocked(_)));

    // The refused open left the directory alone
    manager.push(EventType::PEER_ADD, 1, "second").await.unwrap();
    manager.shutdown().await.unwrap();

    let manager = create_manager(config).await;
    let mut sub = manager.subscribe(SubscribeOptions::from_start()).await.unwrap();
    let events = collect(&mut sub, 2).await;
    assert_eq!(events[0].decode_data::<String>().unwrap(), "first");
    assert_eq!(events[1].decode_data::<String>().unwrap(), "second");
    assert!(events[1].offset > events[0].offset);

    manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reader_follows_writer_rotations() {
    let temp = TempDir::new().unwrap();
    let config = EventLogConfig::with_directory(temp.path())
        .with_rotation_size(100)
        .with_max_retained_files(10);
    let manager = create_manager(config.clone()).await;

    // Opened while only the first log exists
    let reader = EventReader::open(config).await.unwrap();
    let mut live = reader.subscribe(SubscribeOptions::from_start()).await.unwrap();

    for i in 0..6 {
        manager
            .push(EventType::PEER_UPDATE, 1, &json!({"i": i, "pad": "x".repeat(40)}))
            .await
            .unwrap();
    }

    let events = collect(&mut live, 6).await;
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.decode_data::<serde_json::Value>().unwrap()["i"], i);
    }
    let logs: HashSet<_> = events.iter().map(|e| e.log_id.clone()).collect();
    assert!(logs.len() > 1, "events should span several logs");

    // A late subscriber sees the same history
    let mut late = reader.subscribe(SubscribeOptions::from_start()).await.unwrap();
    assert_eq!(collect(&mut late, 6).await, events);

    let seen: Vec<_> = reader.log_files().await.unwrap().into_iter().map(|f| f.file).collect();
    let written: Vec<_> = manager.log_files().await.into_iter().map(|f| f.file).collect();
    assert_eq!(seen, written);
    assert_eq!(reader.current_log().await.unwrap(), manager.current_log().await);

    reader.shutdown().await.unwrap();
    manager.shutdown().await.unwrap();
}
