//! Polling driver.
//!
//! A `Poller` runs the batch scheduler on a fixed interval and publishes the
//! aggregated result through a `watch` channel. It owns at most one poll
//! session at a time; stopping a session cancels its timer, aborts its
//! in-flight fetches and guarantees that a fetch finishing after teardown is
//! discarded instead of published.

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::batch::{BatchResult, BatchScheduler};

/// Consumer-visible state, replaced after every completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub services: BatchResult,
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub cycle: u64,
}

/// Lifecycle of a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollerState {
    Idle,
    Polling,
    Fetching,
    Waiting,
    Stopped,
}

impl PollerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PollerState::Idle,
            1 => PollerState::Polling,
            2 => PollerState::Fetching,
            3 => PollerState::Waiting,
            _ => PollerState::Stopped,
        }
    }
}

/// State owned by the poller and shared with its tasks.
struct Core {
    scheduler: Arc<BatchScheduler>,
    entities: Arc<Vec<String>>,
    interval: Duration,
    tx: watch::Sender<Snapshot>,
    state: AtomicU8,
    cycles: AtomicU64,
    last_fetch_started_at: Mutex<Option<Instant>>,
}

impl Core {
    fn set_state(&self, state: PollerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Per-session context handed to the timer and every cycle it spawns.
struct SessionCtx {
    id: u64,
    cancel: CancellationToken,
    /// Checked and flipped under the lock so "still live, publish" is atomic
    /// with respect to teardown.
    live: Mutex<bool>,
    /// Re-entrancy guard: set while a cycle of this session is running.
    fetching: AtomicBool,
}

impl SessionCtx {
    fn gate(&self) -> MutexGuard<'_, bool> {
        self.live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct PollSession {
    ctx: Arc<SessionCtx>,
    timer: JoinHandle<()>,
    started_at: Instant,
}

/// Shortest accepted poll interval; `tokio::time::interval` rejects zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Periodic driver for a `BatchScheduler`.
pub struct Poller {
    core: Arc<Core>,
    session: Mutex<Option<PollSession>>,
    next_session: AtomicU64,
}

impl Poller {
    pub fn new(scheduler: Arc<BatchScheduler>, entities: Vec<String>, interval: Duration) -> Self {
        let interval = if interval < MIN_POLL_INTERVAL {
            warn!(
                "Poll interval {:?} is too short, using {:?}",
                interval, MIN_POLL_INTERVAL
            );
            MIN_POLL_INTERVAL
        } else {
            interval
        };
        let (tx, _rx) = watch::channel(Snapshot::default());
        Self {
            core: Arc::new(Core {
                scheduler,
                entities: Arc::new(entities),
                interval,
                tx,
                state: AtomicU8::new(PollerState::Idle as u8),
                cycles: AtomicU64::new(0),
                last_fetch_started_at: Mutex::new(None),
            }),
            session: Mutex::new(None),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> PollerState {
        PollerState::from_u8(self.core.state.load(Ordering::SeqCst))
    }

    pub fn interval(&self) -> Duration {
        self.core.interval
    }

    pub fn entities(&self) -> &[String] {
        &self.core.entities
    }

    pub fn scheduler(&self) -> &Arc<BatchScheduler> {
        &self.core.scheduler
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.core.tx.borrow().clone()
    }

    pub fn is_live(&self) -> bool {
        self.lock_session()
            .as_ref()
            .map(|s| *s.ctx.gate())
            .unwrap_or(false)
    }

    pub fn last_fetch_started_at(&self) -> Option<Instant> {
        *self
            .core
            .last_fetch_started_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts polling unless a session is already live and returns a
    /// receiver that immediately holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        if !self.is_live() {
            self.start();
        }
        self.core.tx.subscribe()
    }

    /// Tears down the current session.
    pub fn unsubscribe(&self) {
        self.stop();
    }

    /// Starts a new session, stopping any predecessor first. The first fetch
    /// runs immediately, then one every `interval`.
    pub fn start(&self) {
        let mut slot = self.lock_session();
        if let Some(previous) = slot.take() {
            teardown(&self.core, previous);
        }

        let ctx = Arc::new(SessionCtx {
            id: self.next_session.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
            live: Mutex::new(true),
            fetching: AtomicBool::new(false),
        });
        self.core.set_state(PollerState::Polling);

        let timer = tokio::spawn(run_timer(self.core.clone(), ctx.clone()));

        info!(
            "Poll session {} started: {} services every {:?}",
            ctx.id,
            self.core.entities.len(),
            self.core.interval
        );

        *slot = Some(PollSession {
            ctx,
            timer,
            started_at: Instant::now(),
        });
    }

    /// Stops the current session. Calling it without a session is a no-op.
    pub fn stop(&self) {
        let previous = self.lock_session().take();
        match previous {
            Some(session) => teardown(&self.core, session),
            None => debug!("Stop requested without a live session"),
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<PollSession>> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn teardown(core: &Core, session: PollSession) {
    *session.ctx.gate() = false;
    session.ctx.cancel.cancel();
    session.timer.abort();
    core.scheduler.abort_in_flight();
    core.set_state(PollerState::Stopped);
    info!(
        "Poll session {} stopped after {:?}",
        session.ctx.id,
        session.started_at.elapsed()
    );
}

async fn run_timer(core: Arc<Core>, ctx: Arc<SessionCtx>) {
    // the first tick of `interval` completes immediately
    let mut ticker = time::interval(core.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if ctx
            .fetching
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Session {}: previous cycle still running, skipping tick", ctx.id);
            core.scheduler.stats().record_skipped_tick();
            continue;
        }

        tokio::spawn(run_cycle(core.clone(), ctx.clone()));
    }
    debug!("Session {} timer stopped", ctx.id);
}

#[instrument(skip(core, ctx), fields(session = ctx.id))]
async fn run_cycle(core: Arc<Core>, ctx: Arc<SessionCtx>) {
    let started = Instant::now();
    {
        let live = ctx.gate();
        if !*live {
            ctx.fetching.store(false, Ordering::SeqCst);
            return;
        }
        core.set_state(PollerState::Fetching);
        if let Ok(mut at) = core.last_fetch_started_at.lock() {
            *at = Some(started);
        }
    }

    let cancel = ctx.cancel.child_token();
    let outcome = AssertUnwindSafe(core.scheduler.process_batch(&core.entities, &cancel))
        .catch_unwind()
        .await;

    let result = match outcome {
        Ok(Ok(services)) => Ok(services),
        Ok(Err(err)) => Err(err.to_string()),
        Err(panic) => Err(panic_message(panic.as_ref())),
    };

    let stats = core.scheduler.stats();
    let published = {
        let live = ctx.gate();
        let is_live = *live;
        if is_live {
            publish(&core, result, started);
            core.set_state(PollerState::Waiting);
        }
        drop(live);
        is_live
    };

    if !published {
        debug!("Discarding cycle result that finished after teardown");
        stats.record_discarded_result();
    }

    ctx.fetching.store(false, Ordering::SeqCst);
}

fn publish(core: &Core, result: Result<BatchResult, String>, started: Instant) {
    let stats = core.scheduler.stats();
    let cycle = core.cycles.fetch_add(1, Ordering::SeqCst) + 1;

    match result {
        Ok(services) => {
            let count = services.len();
            let groups = core.scheduler.group_count(count) as u64;
            core.tx.send_replace(Snapshot {
                services,
                error: None,
                updated_at: Some(Utc::now()),
                cycle,
            });
            stats.record_cycle(started.elapsed().as_secs_f64(), count as u64, groups);
            debug!("Published cycle {} with {} services", cycle, count);
        }
        Err(message) => {
            error!("Poll cycle {} failed: {}", cycle, message);
            stats.record_cycle_failure();
            // keep the last good services, surface the error next to them
            core.tx.send_modify(|snapshot| {
                snapshot.error = Some(message);
                snapshot.cycle = cycle;
            });
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("poll cycle panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("poll cycle panicked: {}", s)
    } else {
        "poll cycle panicked".to_string()
    }
}
