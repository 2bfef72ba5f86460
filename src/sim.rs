//! # Deterministic virtual-clock scheduler.
//!
//! [`SimScheduler`] runs everything on the calling thread under a simulated
//! clock, which makes time-dependent task behavior fully deterministic:
//!
//! - `execute` enqueues the runnable; nothing runs until [`run_pending`] or
//!   [`tick`] drains the queue.
//! - `schedule_once` arms a virtual timer; [`tick`] advances the clock and
//!   fires timers in due order.
//! - reported failures are collected for inspection instead of being printed.
//!
//! [`run_pending`]: SimScheduler::run_pending
//! [`tick`]: SimScheduler::tick

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::cancelable::{ActionCancelable, Cancelable};
use crate::config::Config;
use crate::error::TaskError;
use crate::scheduler::{Runnable, Scheduler};

/// Virtual-clock scheduler for tests and simulations.
///
/// Cloning is cheap and clones share the same clock, queue and report log.
#[derive(Clone)]
pub struct SimScheduler {
    inner: Arc<SimInner>,
}

struct SimInner {
    config: Config,
    state: Mutex<SimState>,
    reported: Mutex<Vec<TaskError>>,
}

#[derive(Default)]
struct SimState {
    now: Duration,
    seq: u64,
    ready: VecDeque<Runnable>,
    timers: BTreeMap<(Duration, u64), Runnable>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimScheduler {
    /// Creates a scheduler with the default [`Config`].
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a scheduler with an explicit configuration.
    pub fn with_config(config: Config) -> Self {
        Self {
            inner: Arc::new(SimInner {
                config,
                state: Mutex::new(SimState::default()),
                reported: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        lock(&self.inner.state).now
    }

    /// Number of timers that are armed and not yet fired or canceled.
    pub fn outstanding_timers(&self) -> usize {
        lock(&self.inner.state).timers.len()
    }

    /// Snapshot of the errors handed to `report_failure` so far.
    pub fn reported(&self) -> Vec<TaskError> {
        lock(&self.inner.reported).clone()
    }

    /// Drains the immediate queue, including runnables enqueued while
    /// draining. Virtual time does not advance.
    pub fn run_pending(&self) {
        loop {
            let job = lock(&self.inner.state).ready.pop_front();
            match job {
                Some(job) => job(),
                None => break,
            }
        }
    }

    /// Advances the clock by `dt`, firing due timers in order and draining
    /// the immediate queue around each.
    pub fn tick(&self, dt: Duration) {
        let target = self.now() + dt;
        loop {
            self.run_pending();
            let due = {
                let mut state = lock(&self.inner.state);
                match state.timers.first_key_value().map(|(key, _)| *key) {
                    Some(key) if key.0 <= target => {
                        state.now = key.0;
                        state.timers.remove(&key)
                    }
                    _ => {
                        state.now = target;
                        None
                    }
                }
            };
            match due {
                Some(job) => job(),
                None => break,
            }
        }
        self.run_pending();
    }
}

impl Default for SimScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for SimScheduler {
    fn execute(&self, job: Runnable) {
        lock(&self.inner.state).ready.push_back(job);
    }

    fn schedule_once(&self, delay: Duration, job: Runnable) -> Cancelable {
        let key = {
            let mut state = lock(&self.inner.state);
            let key = (state.now + delay, state.seq);
            state.seq += 1;
            state.timers.insert(key, job);
            key
        };
        let inner = self.inner.clone();
        ActionCancelable::arc(move || {
            lock(&inner.state).timers.remove(&key);
        })
    }

    fn report_failure(&self, error: &TaskError) {
        lock(&self.inner.reported).push(error.clone());
    }

    fn is_always_async(&self) -> bool {
        self.config().always_async
    }

    fn batch_size(&self) -> u32 {
        self.config().batch_size
    }
}

impl SimScheduler {
    fn config(&self) -> Config {
        self.inner.config
    }
}
