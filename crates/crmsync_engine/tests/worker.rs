//! The polling worker over a file tracker.

use crmsync_engine::{EngineConfig, FileTracker, Tracker, Worker};
use crmsync_testkit::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn single_run_records_the_cycle() {
    let env = TestEnvironment::crm();
    env.db
        .insert_external("accounts", attrs(json!({ "name": "Acme" })))
        .unwrap();
    env.advance();
    let (_dir, tracker) = temp_tracker();
    let path = tracker.path().to_path_buf();
    let config = EngineConfig::new().with_tracker_path(&path).once();

    let worker = Worker::new(env.runner(), env.manager(), Arc::new(tracker), config).unwrap();
    let (_shutdown, stop) = watch::channel(false);
    let stats = worker.run(stop).await.unwrap();

    assert_eq!(stats.cycles_completed, 1);
    assert_eq!(stats.totals.created, 1);
    assert_eq!(env.remote.count("Account"), 1);
    let last_run = FileTracker::new(&path).last_run().unwrap();
    assert_eq!(last_run, Some(START.saturating_add(STEP)));

    // A new worker resumes where the file says.
    let resumed = Worker::new(
        env.runner(),
        env.manager(),
        Arc::new(FileTracker::new(&path)),
        EngineConfig::new(),
    )
    .unwrap();
    assert_eq!(resumed.runner().unwrap().last_run(), last_run);
}

#[tokio::test]
async fn polling_stops_on_shutdown() {
    let env = TestEnvironment::crm();
    let (_dir, tracker) = temp_tracker();
    let config = EngineConfig::new().with_interval(Duration::from_millis(10));
    let worker = Worker::new(env.runner(), env.manager(), Arc::new(tracker), config).unwrap();

    let (shutdown, stop) = watch::channel(false);
    let handle = tokio::spawn(worker.run(stop));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.send(true).unwrap();

    let stats = handle.await.unwrap().unwrap();
    assert!(stats.cycles_completed >= 1);
    assert_eq!(stats.totals.writes(), 0);
}
