//! Concurrency Coordinator: at most one profile build per `candidate:trigger`
//! key, a short-lived result cache, and bounded waits with forced lock recovery.
//!
//! The lock map and the cache belong to one `UpdateCoordinator` instance. The
//! lock map is only touched under its mutex, so "is there an owner?" and
//! "become the owner" are a single step. Lock order is always locks → cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::profile::error::{ErrorKind, ProfileError};
use crate::profile::models::{CandidateProfile, ProfileTrigger};

pub type UpdateOutcome = Result<Arc<CandidateProfile>, ProfileError>;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a successful result answers repeat requests.
    pub idempotency_window: Duration,
    /// How long a joiner waits on an in-flight owner.
    pub join_timeout: Duration,
    /// Locks older than this are force-evicted by the sweep.
    pub lock_max_age: Duration,
    pub sweep_interval: Duration,
    /// How long a non-transient failure keeps its lock.
    pub failure_cooldown: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            idempotency_window: Duration::from_secs(300),
            join_timeout: Duration::from_secs(30),
            lock_max_age: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            failure_cooldown: Duration::from_secs(5),
        }
    }
}

/// Coordination key for one trigger of one candidate.
pub fn update_key(candidate_id: Uuid, trigger: &ProfileTrigger) -> String {
    format!("{candidate_id}:{}", trigger.trigger_key())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub in_flight: usize,
    pub cached: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

struct LockEntry {
    /// Distinguishes this owner from a later one holding the same key.
    generation: u64,
    started_at: Instant,
    outcome: watch::Receiver<Option<UpdateOutcome>>,
}

struct CacheEntry {
    profile: Arc<CandidateProfile>,
    created_at: Instant,
}

struct Shared {
    config: CoordinatorConfig,
    locks: Mutex<HashMap<String, LockEntry>>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    next_generation: AtomicU64,
}

/// A poisoned map is still structurally valid; keep serving.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn cached(&self, key: &str) -> Option<Arc<CandidateProfile>> {
        let cache = lock(&self.cache);
        cache
            .get(key)
            .filter(|entry| entry.created_at.elapsed() < self.config.idempotency_window)
            .map(|entry| Arc::clone(&entry.profile))
    }

    /// Removes the lock only if it still belongs to `generation`.
    fn evict_if_owned(&self, key: &str, generation: u64) -> bool {
        let mut locks = lock(&self.locks);
        if locks.get(key).is_some_and(|e| e.generation == generation) {
            locks.remove(key);
            true
        } else {
            false
        }
    }

    /// Publishes the owner's outcome to every joiner and applies the release policy.
    fn finish(
        self: &Arc<Self>,
        key: &str,
        generation: u64,
        tx: watch::Sender<Option<UpdateOutcome>>,
        outcome: &UpdateOutcome,
    ) {
        let mut locks = lock(&self.locks);
        tx.send_replace(Some(outcome.clone()));
        let owned = locks.get(key).is_some_and(|e| e.generation == generation);

        match outcome {
            Ok(profile) => {
                if owned {
                    locks.remove(key);
                }
                // Cached even if the lock was evicted: the work is done and
                // later requests should not redo it.
                lock(&self.cache).insert(
                    key.to_string(),
                    CacheEntry {
                        profile: Arc::clone(profile),
                        created_at: Instant::now(),
                    },
                );
                debug!(key, version = profile.version, "update complete, result cached");
            }
            Err(err) if err.kind() == ErrorKind::Transient => {
                if owned {
                    locks.remove(key);
                }
                debug!(key, error = %err, "transient failure, lock released");
            }
            Err(err) => {
                if !owned {
                    return;
                }
                let cooldown = self.config.failure_cooldown;
                info!(key, error = %err, cooldown_ms = cooldown.as_millis() as u64, "update failed, holding lock for cooldown");
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    locks.remove(key);
                    return;
                };
                let shared = Arc::clone(self);
                let key = key.to_string();
                runtime.spawn(async move {
                    tokio::time::sleep(cooldown).await;
                    shared.evict_if_owned(&key, generation);
                });
            }
        }
    }

    /// Force-evicts locks past their maximum age and drops expired cache entries.
    fn sweep(&self) -> (usize, usize) {
        let now = Instant::now();
        let mut evicted = 0;
        {
            let mut locks = lock(&self.locks);
            locks.retain(|key, entry| {
                let age = now.duration_since(entry.started_at);
                if age >= self.config.lock_max_age {
                    warn!(
                        key = %key,
                        age_secs = age.as_secs(),
                        "force-evicting stale update lock"
                    );
                    evicted += 1;
                    false
                } else {
                    true
                }
            });
        }

        let mut cache = lock(&self.cache);
        let before = cache.len();
        cache.retain(|_, entry| now.duration_since(entry.created_at) < self.config.idempotency_window);
        (evicted, before - cache.len())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Acquisition handles
// ────────────────────────────────────────────────────────────────────────────

/// What `acquire_or_join` decided for the caller.
pub enum Acquisition {
    /// A recent successful result for this key.
    Cached(Arc<CandidateProfile>),
    /// Someone else is building; wait for their outcome.
    Joined(Joiner),
    /// The caller must run the build and `complete` the guard.
    Owner(OwnerGuard),
}

impl Acquisition {
    pub fn is_owner(&self) -> bool {
        matches!(self, Acquisition::Owner(_))
    }
}

pub struct Joiner {
    key: String,
    generation: u64,
    outcome: watch::Receiver<Option<UpdateOutcome>>,
    shared: Arc<Shared>,
}

impl Joiner {
    /// Waits for the owner's outcome, at most `join_timeout`.
    ///
    /// On timeout the stale lock is discarded and `WaitTimeout` is returned.
    /// The owner itself is left running.
    pub async fn wait(mut self) -> UpdateOutcome {
        let join_timeout = self.shared.config.join_timeout;
        let waited = tokio::time::timeout(join_timeout, self.outcome.wait_for(Option::is_some)).await;

        match waited {
            Ok(Ok(published)) => match &*published {
                Some(outcome) => outcome.clone(),
                None => Err(ProfileError::TransientInfra(
                    "update finished without an outcome".to_string(),
                )),
            },
            Ok(Err(_closed)) => Err(ProfileError::TransientInfra(format!(
                "owner of '{}' went away before publishing",
                self.key
            ))),
            Err(_elapsed) => {
                let evicted = self.shared.evict_if_owned(&self.key, self.generation);
                warn!(
                    key = %self.key,
                    waited_secs = join_timeout.as_secs(),
                    evicted,
                    "join timed out, possible deadlock"
                );
                Err(ProfileError::WaitTimeout {
                    key: self.key,
                    waited: join_timeout,
                })
            }
        }
    }
}

/// Held by the single owner of a key. Dropping it without `complete` fails
/// every joiner: a panic counts as a persistent failure and keeps the lock for
/// the cooldown, a plain cancellation is transient and frees the key.
pub struct OwnerGuard {
    key: String,
    generation: u64,
    tx: Option<watch::Sender<Option<UpdateOutcome>>>,
    shared: Arc<Shared>,
}

impl OwnerGuard {
    /// Sees the same outcome the joiners will see, including one published on drop.
    fn subscribe(&self) -> Option<watch::Receiver<Option<UpdateOutcome>>> {
        self.tx.as_ref().map(watch::Sender::subscribe)
    }

    /// Publishes `outcome` to joiners, releases or cools down the lock, and
    /// hands the outcome back.
    pub fn complete(mut self, outcome: UpdateOutcome) -> UpdateOutcome {
        if let Some(tx) = self.tx.take() {
            self.shared.finish(&self.key, self.generation, tx, &outcome);
        }
        outcome
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let error = if std::thread::panicking() {
                warn!(key = %self.key, "update owner panicked");
                ProfileError::Persistent(format!("profile update for '{}' panicked", self.key))
            } else {
                warn!(key = %self.key, "update owner dropped before completing");
                ProfileError::TransientInfra(format!(
                    "owner of '{}' stopped before completing",
                    self.key
                ))
            };
            self.shared.finish(&self.key, self.generation, tx, &Err(error));
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Coordinator
// ────────────────────────────────────────────────────────────────────────────

pub struct UpdateCoordinator {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
}

impl UpdateCoordinator {
    /// Creates the coordinator and starts its background sweep.
    /// Must be called inside a Tokio runtime.
    pub fn new(config: CoordinatorConfig) -> Self {
        let shared = Arc::new(Shared {
            config,
            locks: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(sweep_loop(Arc::clone(&shared), shutdown_rx));

        Self {
            shared,
            shutdown_tx,
        }
    }

    /// Returns the cached result, joins the in-flight owner, or makes the caller
    /// the owner, decided atomically under the lock map.
    pub fn acquire_or_join(&self, key: &str) -> Acquisition {
        let mut locks = lock(&self.shared.locks);

        if let Some(profile) = self.shared.cached(key) {
            debug!(key, version = profile.version, "serving cached update result");
            return Acquisition::Cached(profile);
        }

        if let Some(entry) = locks.get(key) {
            debug!(key, "update in flight, joining");
            return Acquisition::Joined(Joiner {
                key: key.to_string(),
                generation: entry.generation,
                outcome: entry.outcome.clone(),
                shared: Arc::clone(&self.shared),
            });
        }

        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        locks.insert(
            key.to_string(),
            LockEntry {
                generation,
                started_at: Instant::now(),
                outcome: rx,
            },
        );
        debug!(key, generation, "update lock acquired");
        Acquisition::Owner(OwnerGuard {
            key: key.to_string(),
            generation,
            tx: Some(tx),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Runs `work` for `key` unless a cached or in-flight result can answer.
    ///
    /// Owner work runs on its own task, so it finishes (and fills the cache)
    /// even if this caller stops waiting.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> UpdateOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CandidateProfile, ProfileError>> + Send + 'static,
    {
        match self.acquire_or_join(key) {
            Acquisition::Cached(profile) => Ok(profile),
            Acquisition::Joined(joiner) => joiner.wait().await,
            Acquisition::Owner(guard) => {
                let published = guard.subscribe();
                let work = work();
                let task = tokio::spawn(async move {
                    let outcome = work.await.map(Arc::new);
                    guard.complete(outcome)
                });
                match task.await {
                    Ok(outcome) => outcome,
                    // The guard published on drop; report exactly what joiners got.
                    Err(e) => published
                        .and_then(|rx| {
                            let outcome = rx.borrow().clone();
                            outcome
                        })
                        .unwrap_or_else(|| {
                            Err(ProfileError::Persistent(format!(
                                "profile update task for '{key}' failed: {e}"
                            )))
                        }),
                }
            }
        }
    }

    pub fn stats(&self) -> CoordinatorStats {
        let in_flight = lock(&self.shared.locks).len();
        let cached = lock(&self.shared.cache).len();
        CoordinatorStats { in_flight, cached }
    }

    /// Stops the background sweep. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for UpdateCoordinator {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn sweep_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(shared.config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("update coordinator sweep stopped");
                    break;
                }
            }
            _ = ticker.tick() => {
                let (locks, cache) = shared.sweep();
                if locks > 0 || cache > 0 {
                    debug!(locks, cache, "update coordinator sweep");
                }
            }
        }
    }
}
