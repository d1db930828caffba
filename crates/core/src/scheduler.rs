// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Periodic task execution for DMA workers and timeouts.
//!
//! A task is a closure run once per `interval`; returning `false` retires it.
//! [`ThreadScheduler`] gives every task its own native thread sleeping on the
//! wall clock. [`ManualScheduler`] keeps a virtual clock that tests advance
//! explicitly.

use crate::lock;
use std::fmt::Debug;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error};

pub type Job = Box<dyn FnMut() -> bool + Send + 'static>;

pub trait Scheduler: Debug + Send + Sync {
    /// Run `job` every `interval`, starting one interval from now.
    fn spawn(&self, name: &str, interval: Duration, job: Job);

    /// Run `job` once after `delay`.
    fn once(&self, name: &str, delay: Duration, job: Box<dyn FnOnce() + Send + 'static>) {
        let mut job = Some(job);
        self.spawn(
            name,
            delay,
            Box::new(move || {
                if let Some(f) = job.take() {
                    f();
                }
                false
            }),
        );
    }
}

/// One native thread per task.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn spawn(&self, name: &str, interval: Duration, mut job: Job) {
        let result = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                std::thread::sleep(interval);
                if !job() {
                    break;
                }
            });
        if let Err(e) = result {
            error!("scheduler: failed to start task {}: {}", name, e);
        }
    }
}

struct Task {
    seq: u64,
    name: String,
    due: Duration,
    interval: Duration,
    job: Job,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    tasks: Vec<Task>,
}

/// Deterministic virtual-time scheduler.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("tasks", &state.tasks.len())
            .finish()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        lock(&self.state).now
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).tasks.len()
    }

    pub fn task_names(&self) -> Vec<String> {
        lock(&self.state)
            .tasks
            .iter()
            .map(|t| t.name.clone())
            .collect()
    }

    /// Move the clock forward by `dt`, running every task that falls due on
    /// the way, earliest first. Returns the number of job runs.
    pub fn advance(&self, dt: Duration) -> usize {
        let target = lock(&self.state).now + dt;
        let mut runs = 0;
        loop {
            let mut task = {
                let mut state = lock(&self.state);
                let next = state
                    .tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| (t.due, t.seq))
                    .map(|(i, _)| i);
                match next {
                    Some(i) => {
                        let task = state.tasks.swap_remove(i);
                        state.now = task.due;
                        task
                    }
                    None => {
                        state.now = target;
                        return runs;
                    }
                }
            };
            runs += 1;
            // the lock is released so the job may spawn or touch devices
            if (task.job)() {
                task.due += task.interval;
                lock(&self.state).tasks.push(task);
            } else {
                debug!("scheduler: task {} finished", task.name);
            }
        }
    }

    /// Advance in `step` increments until no task is left, or `limit` of
    /// virtual time has passed. Returns true if the queue drained.
    pub fn run_until_idle(&self, step: Duration, limit: Duration) -> bool {
        let start = self.now();
        while self.pending() > 0 {
            if self.now() - start >= limit {
                return false;
            }
            self.advance(step);
        }
        true
    }
}

impl Scheduler for ManualScheduler {
    fn spawn(&self, name: &str, interval: Duration, job: Job) {
        let mut state = lock(&self.state);
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + interval;
        state.tasks.push(Task {
            seq,
            name: name.to_string(),
            due,
            interval,
            job,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_periodic_task_runs_per_interval() {
        let sched = ManualScheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        sched.spawn(
            "tick",
            Duration::from_micros(200),
            Box::new(move || c.fetch_add(1, Ordering::SeqCst) < 4),
        );

        sched.advance(Duration::from_micros(199));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        sched.advance(Duration::from_micros(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        sched.advance(Duration::from_millis(10));
        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn test_tasks_run_in_due_order() {
        let sched = ManualScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (name, us) in [("slow", 300u64), ("fast", 100), ("mid", 200)] {
            let log = log.clone();
            sched.once(
                name,
                Duration::from_micros(us),
                Box::new(move || log.lock().unwrap().push(name)),
            );
        }
        sched.advance(Duration::from_millis(1));
        assert_eq!(*log.lock().unwrap(), vec!["fast", "mid", "slow"]);
    }

    #[test]
    fn test_job_may_spawn_from_inside() {
        let sched = Arc::new(ManualScheduler::new());
        let hit = Arc::new(AtomicU32::new(0));
        let (s, h) = (sched.clone(), hit.clone());
        sched.once(
            "outer",
            Duration::from_micros(10),
            Box::new(move || {
                let h = h.clone();
                s.once(
                    "inner",
                    Duration::from_micros(10),
                    Box::new(move || {
                        h.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );
        sched.advance(Duration::from_micros(15));
        assert_eq!(hit.load(Ordering::SeqCst), 0);
        sched.advance(Duration::from_micros(5));
        assert_eq!(hit.load(Ordering::SeqCst), 1);
        assert_eq!(sched.now(), Duration::from_micros(20));
    }

    #[test]
    fn test_run_until_idle_limit() {
        let sched = ManualScheduler::new();
        sched.spawn("forever", Duration::from_micros(50), Box::new(|| true));
        assert!(!sched.run_until_idle(Duration::from_micros(100), Duration::from_millis(1)));
        assert_eq!(sched.task_names(), vec!["forever".to_string()]);
    }
}
