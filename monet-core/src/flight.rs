//! Keyed single-flight execution.
//!
//! The first caller for a key becomes the leader: its task is spawned and
//! registered. Callers arriving while it runs attach to the same shared
//! result instead of starting their own. The registry entry is removed before
//! the result is published, so a caller that arrives after settlement always
//! starts a fresh flight.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// The leader task ended without producing a value (panic or runtime
/// shutdown).
#[derive(Debug, Clone, Error)]
#[error("in-flight task ended without a result")]
pub struct FlightAborted;

type SharedResult<T> = Shared<BoxFuture<'static, Result<T, FlightAborted>>>;

struct Flight<T: Clone> {
    id: u64,
    result: SharedResult<T>,
}

pub struct SingleFlight<K, T: Clone> {
    in_flight: Arc<DashMap<K, Flight<T>>>,
    next_id: AtomicU64,
    leaders: AtomicU64,
    waiters: AtomicU64,
}

impl<K, T> fmt::Debug for SingleFlight<K, T>
where
    K: Eq + Hash,
    T: Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.in_flight.len())
            .field("sf_leaders", &self.leaders.load(Ordering::Relaxed))
            .field("sf_waiters", &self.waiters.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            leaders: AtomicU64::new(0),
            waiters: AtomicU64::new(0),
        }
    }

    /// Run `make()` for `key` unless a flight for `key` is already running,
    /// in which case wait for that flight's result.
    ///
    /// The work is spawned onto the runtime and runs to completion even if
    /// every caller stops waiting.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Result<T, FlightAborted>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (id, result, launch) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let waiters = self.waiters.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    target: "catalog::flight",
                    key = ?key,
                    leaders = self.leaders.load(Ordering::Relaxed),
                    waiters,
                    "single-flight wait"
                );
                (entry.get().id, entry.get().result.clone(), None)
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel::<T>();
                let result: SharedResult<T> =
                    async move { rx.await.map_err(|_| FlightAborted) }
                        .boxed()
                        .shared();
                entry.insert(Flight {
                    id,
                    result: result.clone(),
                });

                let leaders = self.leaders.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    target: "catalog::flight",
                    key = ?key,
                    leaders,
                    waiters = self.waiters.load(Ordering::Relaxed),
                    "single-flight lead"
                );
                (id, result, Some((tx, make())))
            }
        };

        if let Some((tx, work)) = launch {
            let registry = Arc::clone(&self.in_flight);
            let task_key = key.clone();
            tokio::spawn(async move {
                let value = work.await;
                registry.remove_if(&task_key, |_, flight| flight.id == id);
                debug!(target: "catalog::flight", key = ?task_key, "single-flight complete");
                // Nobody left listening is fine.
                let _ = tx.send(value);
            });
        }

        let outcome = result.await;
        if outcome.is_err() {
            self.in_flight.remove_if(&key, |_, flight| flight.id == id);
        }
        outcome
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of flights started.
    pub fn leaders(&self) -> u64 {
        self.leaders.load(Ordering::Relaxed)
    }

    /// Number of calls that attached to an existing flight.
    pub fn waiters(&self) -> u64 {
        self.waiters.load(Ordering::Relaxed)
    }
}
