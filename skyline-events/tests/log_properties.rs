//! Behavioural properties of the event log
//!
//! These tests exercise the log through its public API only:
//! - ids are monotonic and never reused across evictions
//! - the retained window and unacknowledged count stay consistent
//! - every cursor resumes at its successor
//! - subscribers are isolated from one another
//! - file-backed logs survive a restart

use std::sync::Arc;
use std::time::Duration;

use skyline_events::{
    AckFilter, EventLog, EventRecord, FileTables, LogConfig, RecordDraft, StartPosition,
    Subscription, SubscriptionConfig, SubscriptionEvent, TableProvider,
};
use tokio::time::timeout;

fn alarm(name: &str) -> RecordDraft {
    RecordDraft::alarm("NodeNotReady")
        .with_cluster("prod")
        .with_name(name)
        .with_message(format!("{name} stopped posting status"))
}

fn ids(records: &[EventRecord]) -> Vec<u64> {
    records.iter().map(|r| r.id).collect()
}

async fn next_record(sub: &mut Subscription) -> EventRecord {
    loop {
        match timeout(Duration::from_secs(2), sub.recv()).await {
            Ok(Some(SubscriptionEvent::Record(record))) => return record,
            Ok(Some(SubscriptionEvent::UnacknowledgedCount(_))) => continue,
            other => panic!("expected a record, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn capacity_scenario_tracks_window_and_count() {
    let log = EventLog::new("prod", LogConfig::default().with_capacity(4));
    for name in ["A", "B", "C", "D", "E"] {
        log.append(alarm(name)).await.unwrap();
    }

    let stats = log.stats().await;
    assert_eq!(stats.first_id, 2);
    assert_eq!(stats.last_id, 5);
    assert_eq!(stats.unacknowledged, 4);

    log.acknowledge(3).await.unwrap();
    assert_eq!(log.unacknowledged_count().await, 3);

    // F evicts B, which was unacknowledged.
    log.append(alarm("F")).await.unwrap();
    let stats = log.stats().await;
    assert_eq!(stats.first_id, 3);
    assert_eq!(stats.unacknowledged, 3);

    let names: Vec<String> = log
        .drain(0, 10, AckFilter::All)
        .await
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["C", "D", "E", "F"]);
}

#[tokio::test]
async fn ids_are_never_reused_across_evictions() {
    let log = EventLog::new("prod", LogConfig::default().with_capacity(3));
    let mut seen = Vec::new();

    for i in 0..50 {
        let record = log.append(alarm(&format!("n{i}"))).await.unwrap().unwrap();
        seen.push(record.id);
    }

    assert!(seen.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(ids(&log.drain(0, 10, AckFilter::All).await), vec![48, 49, 50]);
}

#[tokio::test]
async fn suppressed_repeats_keep_the_window_of_distinct_records() {
    let log = EventLog::new("prod", LogConfig::default().with_capacity(3));
    for name in ["a", "a", "b", "b", "b", "c", "d", "d"] {
        log.append(alarm(name)).await.unwrap();
    }

    let stats = log.stats().await;
    assert_eq!(stats.last_id, 4);
    assert_eq!(stats.retained, 3);
    assert_eq!(ids(&log.drain(0, 10, AckFilter::All).await), vec![2, 3, 4]);
}

#[tokio::test]
async fn every_cursor_resumes_at_its_successor() {
    let log = EventLog::new("prod", LogConfig::default().with_capacity(40));
    for i in 0..60 {
        log.append(alarm(&format!("n{i}"))).await.unwrap();
    }
    let stats = log.stats().await;
    assert_eq!((stats.first_id, stats.last_id), (21, 60));

    for cursor in 0..=stats.last_id {
        let batch = log.drain(cursor, 1, AckFilter::All).await;
        if cursor == stats.last_id {
            assert!(batch.is_empty());
        } else {
            let expected = cursor.max(stats.first_id - 1) + 1;
            assert_eq!(ids(&batch), vec![expected], "cursor {cursor}");
        }
    }
}

#[tokio::test]
async fn acknowledgements_and_appends_interleave_consistently() {
    let log = EventLog::new("prod", LogConfig::default().with_capacity(5));

    let writer = {
        let log = log.clone();
        tokio::spawn(async move {
            for i in 0..100 {
                log.append(alarm(&format!("n{i}"))).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };
    let acker = {
        let log = log.clone();
        tokio::spawn(async move {
            for id in 1..=100 {
                // Evicted or not yet appended ids are fine to miss.
                let _ = log.acknowledge(id).await;
                tokio::task::yield_now().await;
            }
        })
    };
    writer.await.unwrap();
    acker.await.unwrap();

    let records = log.drain(0, 10, AckFilter::All).await;
    let unacked = records.iter().filter(|r| !r.acknowledged).count() as u64;
    assert_eq!(records.len(), 5);
    assert_eq!(log.unacknowledged_count().await, unacked);
}

#[tokio::test]
async fn subscribers_receive_independent_suffixes() {
    let log = EventLog::new("prod", LogConfig::default());
    for name in ["a", "b", "c"] {
        log.append(alarm(name)).await.unwrap();
    }

    let mut from_start = log.subscribe(SubscriptionConfig::replay()).await.unwrap();
    let mut from_two = log
        .subscribe(SubscriptionConfig::replay().with_start(StartPosition::After(2)))
        .await
        .unwrap();

    log.append(alarm("d")).await.unwrap();

    for expected in 1..=4 {
        assert_eq!(next_record(&mut from_start).await.id, expected);
    }
    assert_eq!(next_record(&mut from_two).await.id, 3);
    assert_eq!(next_record(&mut from_two).await.id, 4);

    from_two.stop().await;
    log.append(alarm("e")).await.unwrap();
    assert_eq!(next_record(&mut from_start).await.id, 5);
}

#[tokio::test]
async fn slow_subscriber_does_not_block_appends_or_peers() {
    let log = EventLog::new("prod", LogConfig::default());
    let _stalled = log
        .subscribe(SubscriptionConfig::replay().with_buffer(1))
        .await
        .unwrap();
    let mut reader = log.subscribe(SubscriptionConfig::replay()).await.unwrap();

    timeout(Duration::from_secs(2), async {
        for i in 0..20 {
            log.append(alarm(&format!("n{i}"))).await.unwrap();
        }
    })
    .await
    .expect("appends must not wait on subscribers");

    for expected in 1..=20 {
        assert_eq!(next_record(&mut reader).await.id, expected);
    }
}

#[tokio::test]
async fn file_backed_log_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let provider = FileTables::new(dir.path());

    {
        let log = EventLog::open("prod", LogConfig::default(), provider.open("prod").await.unwrap())
            .await
            .unwrap();
        for name in ["a", "b", "c"] {
            log.append(alarm(name)).await.unwrap();
        }
        log.acknowledge(1).await.unwrap();
        log.close().await;
    }
    assert!(provider.path_for("prod").with_extension("jsonl").exists());

    let table = provider.open("prod").await.unwrap();
    let log = EventLog::open("prod", LogConfig::default(), Arc::clone(&table))
        .await
        .unwrap();

    let stats = log.stats().await;
    assert_eq!((stats.first_id, stats.last_id, stats.unacknowledged), (1, 3, 2));
    assert_eq!(
        ids(&log.drain(0, 10, AckFilter::Unacknowledged).await),
        vec![2, 3]
    );
    assert_eq!(log.append(alarm("d")).await.unwrap().unwrap().id, 4);
}

#[tokio::test]
async fn file_backed_log_keeps_ids_after_evicting_everything() {
    let dir = tempfile::tempdir().unwrap();
    let provider = FileTables::new(dir.path());
    let config = LogConfig::default().with_capacity(0);

    {
        let log = EventLog::open("edge", config.clone(), provider.open("edge").await.unwrap())
            .await
            .unwrap();
        for name in ["a", "b", "c"] {
            log.append(alarm(name)).await.unwrap();
        }
        log.close().await;
    }

    let log = EventLog::open("edge", config, provider.open("edge").await.unwrap())
        .await
        .unwrap();
    let stats = log.stats().await;
    assert_eq!((stats.first_id, stats.last_id, stats.retained), (4, 3, 0));
    assert!(log.append(alarm("c")).await.unwrap().is_none());
    assert_eq!(log.append(alarm("d")).await.unwrap().unwrap().id, 4);
}
