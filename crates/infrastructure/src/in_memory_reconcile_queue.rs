use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use jitaccess_application::ReconcileQueue;
use jitaccess_core::{AppResult, ObjectKey};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;


/// Exponential backoff applied to keys whose reconciliation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueBackoff {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
}

impl Default for QueueBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            max: Duration::from_secs(60),
        }
    }
}

impl QueueBackoff {
    fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1_u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<ObjectKey>,
    queued: HashSet<ObjectKey>,
    in_flight: HashSet<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    delayed: HashMap<ObjectKey, Instant>,
    failures: HashMap<ObjectKey, u32>,
}

impl QueueState {
    /// Returns true when a worker should be woken.
    fn push(&mut self, key: ObjectKey) -> bool {
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
            return false;
        }
        if !self.queued.insert(key.clone()) {
            return false;
        }
        self.ready.push_back(key);
        true
    }

    fn promote_due(&mut self, now: Instant) {
        let due: Vec<ObjectKey> = self
            .delayed
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in due {
            self.delayed.remove(&key);
            self.push(key);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.values().min().copied()
    }
}

/// Work queue handing each key to at most one worker at a time.
///
/// A key is held at most once while waiting. Keys enqueued while a worker
/// holds them are re-delivered after that worker calls [`Self::done`].
#[derive(Default)]
pub struct InMemoryReconcileQueue {
    state: Mutex<QueueState>,
    wakeup: Notify,
    backoff: QueueBackoff,
}

impl InMemoryReconcileQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(backoff: QueueBackoff) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            wakeup: Notify::new(),
            backoff,
        }
    }

    /// Waits for the next ready key and marks it in flight.
    ///
    /// Returns `None` once `cancel` fires.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<ObjectKey> {
        loop {
            let notified = self.wakeup.notified();
            let deadline = {
                let mut state = self.state.lock().await;
                state.promote_due(Instant::now());
                if let Some(key) = state.ready.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    if !state.ready.is_empty() {
                        self.wakeup.notify_one();
                    }
                    return Some(key);
                }
                state.next_deadline()
            };

            let sleep = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                () = cancel.cancelled() => return None,
                () = notified => {}
                () = sleep => {}
            }
        }
    }

    /// Releases a key handed out by [`Self::next`].
    pub async fn done(&self, key: &ObjectKey) {
        let wake = {
            let mut state = self.state.lock().await;
            state.in_flight.remove(key);
            state.dirty.remove(key) && state.push(key.clone())
        };
        if wake {
            self.wakeup.notify_one();
        }
    }

    /// Clears the failure count of a key after a successful reconcile.
    pub async fn forget(&self, key: &ObjectKey) {
        self.state.lock().await.failures.remove(key);
    }

    /// Schedules a failed key with exponential backoff and returns the delay.
    pub async fn retry_later(&self, key: ObjectKey) -> Duration {
        let delay = {
            let mut state = self.state.lock().await;
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            self.backoff.delay_for(*failures)
        };
        self.schedule(key, delay).await;
        delay
    }

    /// Returns the number of keys waiting, ready or delayed.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.delayed.len()
    }

    /// Returns whether no key is waiting.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn schedule(&self, key: ObjectKey, delay: Duration) {
        let wake = {
            let mut state = self.state.lock().await;
            if delay.is_zero() {
                state.push(key)
            } else {
                let deadline = Instant::now() + delay;
                let entry = state.delayed.entry(key).or_insert(deadline);
                if deadline < *entry {
                    *entry = deadline;
                }
                true
            }
        };
        if wake {
            self.wakeup.notify_one();
        }
    }
}

#[async_trait]
impl ReconcileQueue for InMemoryReconcileQueue {
    async fn enqueue(&self, key: ObjectKey) -> AppResult<()> {
        self.schedule(key, Duration::ZERO).await;
        Ok(())
    }

    async fn enqueue_after(&self, key: ObjectKey, delay: Duration) -> AppResult<()> {
        self.schedule(key, delay).await;
        Ok(())
    }
}
