use std::sync::{Arc, Mutex};
use std::time::Duration;

use lazytask::{Cancelable, SchedulerRef, SimScheduler, Task, TaskError};

/// A virtual-clock scheduler plus its shared trait handle.
pub fn sim() -> (SimScheduler, SchedulerRef) {
    let sim = SimScheduler::new();
    let scheduler: SchedulerRef = Arc::new(sim.clone());
    (sim, scheduler)
}

/// Starts `task` and collects every delivered outcome.
pub fn run<T: Send + 'static>(
    task: &Task<T>,
    scheduler: &SchedulerRef,
) -> (Arc<Mutex<Vec<Result<T, TaskError>>>>, Cancelable) {
    let out = Arc::new(Mutex::new(Vec::new()));
    let sink = out.clone();
    let handle = task.run_async_fn(scheduler, move |outcome| sink.lock().unwrap().push(outcome));
    (out, handle)
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}
