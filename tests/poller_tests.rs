//! Integration tests for the poller lifecycle: immediate first fetch,
//! periodic refresh, re-entrancy guard, teardown and restart.

mod common;

use common::{build, names, test_config, ScriptedSource};
use statuswatch::{Poller, PollerState, ResilienceConfig, MIN_POLL_INTERVAL};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};

fn slow_config() -> ResilienceConfig {
    ResilienceConfig {
        request_timeout: Duration::from_secs(120),
        ..test_config()
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_fetch_runs_immediately() {
    let config = test_config();
    let source = Arc::new(ScriptedSource::new());
    let stack = build(source.clone(), &config);
    let poller = Poller::new(stack.scheduler.clone(), names(3), config.poll_interval);
    assert_eq!(poller.state(), PollerState::Idle);

    let start = Instant::now();
    let mut rx = poller.subscribe();
    rx.changed().await.unwrap();

    assert_eq!(start.elapsed(), Duration::ZERO);
    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.cycle, 1);
    assert_eq!(snapshot.services.len(), 3);
    assert!(snapshot.error.is_none());
    assert!(snapshot.updated_at.is_some());
    assert_eq!(poller.state(), PollerState::Waiting);
    assert_eq!(source.call_count(), 9);
}

#[tokio::test(start_paused = true)]
async fn test_cycles_repeat_every_interval() {
    let config = test_config();
    let source = Arc::new(ScriptedSource::new());
    let stack = build(source.clone(), &config);
    let poller = Poller::new(stack.scheduler.clone(), names(2), config.poll_interval);

    let start = Instant::now();
    let mut rx = poller.subscribe();
    rx.changed().await.unwrap();
    rx.changed().await.unwrap();

    assert_eq!(start.elapsed(), config.poll_interval);
    assert_eq!(rx.borrow().cycle, 2);
    // the cached entries were exactly one TTL old, so they were refetched
    assert_eq!(source.call_count(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_second_subscriber_gets_latest_snapshot_without_new_session() {
    let config = test_config();
    let source = Arc::new(ScriptedSource::new());
    let stack = build(source.clone(), &config);
    let poller = Poller::new(stack.scheduler.clone(), names(2), config.poll_interval);

    let mut first = poller.subscribe();
    first.changed().await.unwrap();
    let calls = source.call_count();

    let second = poller.subscribe();
    assert_eq!(second.borrow().cycle, 1);
    assert_eq!(second.borrow().services.len(), 2);
    assert!(poller.is_live());

    tokio::task::yield_now().await;
    assert_eq!(source.call_count(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_slow_cycle_causes_skipped_ticks_not_overlap() {
    let config = slow_config();
    let source = Arc::new(ScriptedSource::new().delay(Duration::from_secs(45)));
    let stack = build(source.clone(), &config);
    let poller = Poller::new(stack.scheduler.clone(), names(1), config.poll_interval);

    let _rx = poller.subscribe();
    time::sleep(Duration::from_secs(50)).await;

    // tick at 30s found the first cycle still running
    assert_eq!(source.call_count(), 3);
    assert_eq!(stack.stats.ticks_skipped.load(Ordering::Relaxed), 1);
    assert!(source.max_concurrency() <= 3);
    assert_eq!(poller.snapshot().cycle, 1);

    time::sleep(Duration::from_secs(15)).await;
    assert_eq!(source.call_count(), 6);
    assert_eq!(poller.state(), PollerState::Fetching);
}

#[tokio::test(start_paused = true)]
async fn test_result_arriving_after_teardown_is_discarded() {
    let config = slow_config();
    let source = Arc::new(ScriptedSource::new().delay(Duration::from_secs(10)));
    let stack = build(source.clone(), &config);
    let poller = Poller::new(stack.scheduler.clone(), names(2), config.poll_interval);

    let rx = poller.subscribe();
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(poller.state(), PollerState::Fetching);

    poller.unsubscribe();
    assert_eq!(poller.state(), PollerState::Stopped);
    assert!(!poller.is_live());

    time::sleep(Duration::from_secs(120)).await;

    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.cycle, 0);
    assert!(snapshot.services.is_empty());
    assert!(snapshot.updated_at.is_none());
    assert_eq!(source.call_count(), 6);
    assert_eq!(stack.stats.late_results_discarded.load(Ordering::Relaxed), 1);
    assert_eq!(stack.fetcher.coalescer().in_flight_count(), 0);
    assert!(stack.cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let config = test_config();
    let source = Arc::new(ScriptedSource::new());
    let stack = build(source.clone(), &config);
    let poller = Poller::new(stack.scheduler.clone(), names(1), config.poll_interval);

    poller.stop();
    assert_eq!(poller.state(), PollerState::Idle);

    let mut rx = poller.subscribe();
    rx.changed().await.unwrap();
    poller.stop();
    poller.stop();
    assert_eq!(poller.state(), PollerState::Stopped);

    let calls = source.call_count();
    time::sleep(config.poll_interval * 3).await;
    assert_eq!(source.call_count(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_restart_cancels_previous_session() {
    let config = slow_config();
    let source = Arc::new(ScriptedSource::new().delay(Duration::from_secs(10)));
    let stack = build(source.clone(), &config);
    let poller = Poller::new(stack.scheduler.clone(), names(1), config.poll_interval);

    let mut rx = poller.subscribe();
    time::sleep(Duration::from_secs(2)).await;
    assert_eq!(source.call_count(), 3);

    // restart while the first session's fetch is still in flight
    poller.start();
    rx.changed().await.unwrap();

    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.cycle, 1);
    assert_eq!(snapshot.services.len(), 1);
    // the new session could not join the cancelled session's calls
    assert_eq!(source.call_count(), 6);
    assert_eq!(stack.stats.late_results_discarded.load(Ordering::Relaxed), 1);
    assert!(poller.is_live());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_poller_stops_polling() {
    let config = test_config();
    let source = Arc::new(ScriptedSource::new());
    let stack = build(source.clone(), &config);

    {
        let poller = Poller::new(stack.scheduler.clone(), names(1), config.poll_interval);
        let mut rx = poller.subscribe();
        rx.changed().await.unwrap();
    }

    let calls = source.call_count();
    time::sleep(config.poll_interval * 3).await;
    assert_eq!(source.call_count(), calls);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_successful_result_finishing_after_teardown_is_discarded() {
    let config = test_config();
    let source = Arc::new(ScriptedSource::new().blocking(Duration::from_millis(200)));
    let stack = build(source.clone(), &config);
    let poller = Poller::new(stack.scheduler.clone(), names(1), config.poll_interval);

    let rx = poller.subscribe();
    let deadline = Instant::now() + Duration::from_secs(5);
    // the three dimension calls run back to back inside one poll
    while source.call_count() < 3 {
        assert!(Instant::now() < deadline, "cycle never reached the source");
        time::sleep(Duration::from_millis(5)).await;
    }

    // the last call is still blocking, so the cycle cannot observe the teardown
    poller.stop();
    assert_eq!(poller.state(), PollerState::Stopped);

    while stack.stats.late_results_discarded.load(Ordering::Relaxed) == 0 {
        assert!(Instant::now() < deadline, "late result was never discarded");
        time::sleep(Duration::from_millis(5)).await;
    }

    // the fetch itself succeeded and reached the cache
    assert_eq!(source.call_count(), 3);
    assert!(stack.cache.get("svc-0").unwrap().value.error.is_none());

    let snapshot = rx.borrow().clone();
    assert_eq!(snapshot.cycle, 0);
    assert!(snapshot.services.is_empty());
    assert_eq!(poller.state(), PollerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_is_clamped() {
    let config = test_config();
    let source = Arc::new(ScriptedSource::new());
    let stack = build(source.clone(), &config);
    let poller = Poller::new(stack.scheduler.clone(), names(1), Duration::ZERO);
    assert_eq!(poller.interval(), MIN_POLL_INTERVAL);

    let mut rx = poller.subscribe();
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().cycle, 1);
    assert!(rx.borrow().error.is_none());
    poller.stop();
}
