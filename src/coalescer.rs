//! Request coalescing.
//!
//! At most one upstream call is outstanding per key. Callers that arrive
//! while a call is running (and younger than the coalescing window) await
//! the same shared future and receive a clone of its result.
//!
//! A call belongs to all of its callers: one caller giving up never ends it
//! for the others. The call's own cancellation token fires only once the last
//! caller has left.

use ahash::AHashMap as HashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

type SharedCall<R> = Shared<BoxFuture<'static, R>>;
type InFlightMap<R> = Mutex<HashMap<String, InFlight<R>>>;

struct InFlight<R> {
    id: u64,
    handle: SharedCall<R>,
    started_at: Instant,
    cancel: CancellationToken,
    waiters: Arc<AtomicUsize>,
}

/// Snapshot of one outstanding call.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightInfo {
    pub key: String,
    pub age: Duration,
}

/// Removes the registration when the shared call settles or is dropped.
struct Registration<R> {
    map: Weak<InFlightMap<R>>,
    key: String,
    id: u64,
}

impl<R> Drop for Registration<R> {
    fn drop(&mut self) {
        if let Some(map) = self.map.upgrade() {
            let removed = {
                let mut guard = lock(&map);
                match guard.get(&self.key) {
                    Some(entry) if entry.id == self.id => guard.remove(&self.key),
                    _ => None,
                }
            };
            // dropped outside the lock: it may hold the last handle to a future
            drop(removed);
        }
    }
}

/// One caller awaiting a shared call. The last one to leave cancels the call
/// and unregisters it so nobody can join an abandoned call.
struct Waiter<R> {
    map: Weak<InFlightMap<R>>,
    key: String,
    id: u64,
    cancel: CancellationToken,
    waiters: Arc<AtomicUsize>,
}

impl<R> Drop for Waiter<R> {
    fn drop(&mut self) {
        let Some(map) = self.map.upgrade() else {
            if self.waiters.fetch_sub(1, Ordering::SeqCst) == 1 {
                self.cancel.cancel();
            }
            return;
        };

        let removed = {
            // joins increment under the same lock
            let mut guard = lock(&map);
            if self.waiters.fetch_sub(1, Ordering::SeqCst) != 1 {
                return;
            }
            self.cancel.cancel();
            match guard.get(&self.key) {
                Some(entry) if entry.id == self.id => guard.remove(&self.key),
                _ => None,
            }
        };
        drop(removed);
    }
}

fn lock<R>(map: &InFlightMap<R>) -> MutexGuard<'_, HashMap<String, InFlight<R>>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Deduplicates concurrent calls by key.
pub struct Coalescer<R> {
    in_flight: Arc<InFlightMap<R>>,
    window: Duration,
    next_id: AtomicU64,
    started: AtomicU64,
    joined: AtomicU64,
}

impl<R> Coalescer<R>
where
    R: Clone + Send + Sync + 'static,
{
    /// Creates a coalescer whose in-flight calls may be joined for `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            window,
            next_id: AtomicU64::new(1),
            started: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    /// Runs `producer` for `key` unless a call for `key` is already running,
    /// in which case the running call's result is awaited instead.
    ///
    /// `producer` receives the call's token, which is cancelled once every
    /// caller awaiting the call has gone away. The producer is invoked before
    /// the in-flight map is locked; its future is dropped unpolled when an
    /// existing call is joined.
    pub async fn deduped_call<F, Fut>(&self, key: &str, producer: F) -> R
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = R> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let registration = Registration {
            map: Arc::downgrade(&self.in_flight),
            key: key.to_string(),
            id,
        };
        let fut = producer(cancel.clone());
        let fresh: SharedCall<R> = async move {
            let _registration = registration;
            fut.await
        }
        .boxed()
        .shared();

        let (handle, waiter, unused) = {
            let mut map = lock(&self.in_flight);
            let joinable = map
                .get(key)
                .filter(|entry| entry.started_at.elapsed() < self.window)
                .map(|entry| {
                    entry.waiters.fetch_add(1, Ordering::SeqCst);
                    (
                        entry.handle.clone(),
                        self.waiter(key, entry.id, &entry.cancel, &entry.waiters),
                    )
                });

            match joinable {
                Some((handle, waiter)) => {
                    self.joined.fetch_add(1, Ordering::Relaxed);
                    debug!("Joining in-flight call for {}", key);
                    (handle, waiter, Some(fresh))
                }
                None => {
                    self.started.fetch_add(1, Ordering::Relaxed);
                    let waiters = Arc::new(AtomicUsize::new(1));
                    let waiter = self.waiter(key, id, &cancel, &waiters);
                    let replaced = map.insert(
                        key.to_string(),
                        InFlight {
                            id,
                            handle: fresh.clone(),
                            started_at: Instant::now(),
                            cancel,
                            waiters,
                        },
                    );
                    // an expired call keeps running for its own callers
                    (fresh, waiter, replaced.map(|entry| entry.handle))
                }
            }
        };
        drop(unused);

        let _waiter = waiter;
        handle.await
    }

    fn waiter(
        &self,
        key: &str,
        id: u64,
        cancel: &CancellationToken,
        waiters: &Arc<AtomicUsize>,
    ) -> Waiter<R> {
        Waiter {
            map: Arc::downgrade(&self.in_flight),
            key: key.to_string(),
            id,
            cancel: cancel.clone(),
            waiters: waiters.clone(),
        }
    }

    /// Drops every registration so no later caller can join a call that
    /// started before this point.
    pub fn clear(&self) {
        let drained: Vec<InFlight<R>> = {
            let mut map = lock(&self.in_flight);
            map.drain().map(|(_, v)| v).collect()
        };
        if !drained.is_empty() {
            debug!("Cleared {} in-flight registrations", drained.len());
        }
    }

    pub fn in_flight(&self) -> Vec<InFlightInfo> {
        lock(&self.in_flight)
            .iter()
            .map(|(key, entry)| InFlightInfo {
                key: key.clone(),
                age: entry.started_at.elapsed(),
            })
            .collect()
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Number of producer invocations.
    pub fn started_calls(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Number of callers served by an already running call.
    pub fn joined_calls(&self) -> u64 {
        self.joined.load(Ordering::Relaxed)
    }
}
