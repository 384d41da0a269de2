//! Bounded task scheduler for fan-outs.
//!
//! A [`Scheduler`] owns a rayon thread pool sized at construction. With a
//! single worker, tasks run inline on the calling thread in submission
//! order, which makes sequential runs easy to reason about and debug.
//!
//! Results always come back in submission order, whatever order the tasks
//! finished in. A failing task never takes down its siblings: its error, or
//! its panic, is captured in its own [`TaskOutcome`].
//!
//! A fan-out started from inside another scheduler's worker runs from a
//! scoped helper thread. A rayon worker waiting in `install` keeps stealing
//! jobs from its own pool, and a stolen job may block on a cache slot that
//! the waiting worker owns further down its stack.

use crate::error::ConfigError;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tracing::{debug, error};

/// Result of one scheduled task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T, E> {
    Completed(T),
    Failed(E),
    /// The task panicked; holds the panic message.
    Panicked(String),
    /// Skipped because an earlier failure requested cancellation.
    Cancelled,
}

impl<T, E> TaskOutcome<T, E> {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed(_))
    }
}

pub struct Scheduler {
    worker_count: usize,
    pool: Option<ThreadPool>,
}

impl Scheduler {
    /// Build a scheduler with `worker_count` workers.
    ///
    /// # Errors
    /// Returns [`ConfigError::WorkerCount`] for zero workers, or
    /// [`ConfigError::Pool`] if the thread pool cannot be started.
    pub fn new(worker_count: usize) -> Result<Self, ConfigError> {
        if worker_count == 0 {
            return Err(ConfigError::WorkerCount(0));
        }
        let pool = if worker_count == 1 {
            None
        } else {
            Some(
                ThreadPoolBuilder::new()
                    .num_threads(worker_count)
                    .thread_name(|i| format!("geoflow-worker-{i}"))
                    .build()?,
            )
        };
        Ok(Self { worker_count, pool })
    }

    /// A scheduler with one worker per logical core.
    ///
    /// # Errors
    /// Returns [`ConfigError::Pool`] if the thread pool cannot be started.
    pub fn all_cores() -> Result<Self, ConfigError> {
        Self::new(num_cpus::get().max(1))
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run `run` once per task and return the outcomes in submission order.
    ///
    /// With `cancel_on_error`, tasks that have not started when a failure is
    /// observed are skipped and reported as [`TaskOutcome::Cancelled`].
    /// Tasks already running finish normally.
    pub fn run_all<I, T, E, F>(&self, tasks: &[I], cancel_on_error: bool, run: F) -> Vec<TaskOutcome<T, E>>
    where
        I: Sync,
        T: Send,
        E: Send,
        F: Fn(&I) -> Result<T, E> + Sync,
    {
        let cancelled = AtomicBool::new(false);
        let run_one = |task: &I| {
            if cancelled.load(Ordering::Acquire) {
                return TaskOutcome::Cancelled;
            }
            let outcome = match catch_unwind(AssertUnwindSafe(|| run(task))) {
                Ok(Ok(value)) => return TaskOutcome::Completed(value),
                Ok(Err(err)) => TaskOutcome::Failed(err),
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(%message, "task panicked");
                    TaskOutcome::Panicked(message)
                }
            };
            if cancel_on_error {
                cancelled.store(true, Ordering::Release);
            }
            outcome
        };

        debug!(tasks = tasks.len(), workers = self.worker_count, "scheduling tasks");
        let Some(pool) = &self.pool else {
            return tasks.iter().map(run_one).collect();
        };
        let fan_out = || -> Vec<TaskOutcome<T, E>> {
            pool.install(|| tasks.par_iter().with_max_len(1).map(run_one).collect())
        };
        if rayon::current_thread_index().is_none() {
            return fan_out();
        }
        thread::scope(|scope| scope.spawn(fan_out).join()).unwrap_or_else(|payload| resume_unwind(payload))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(Scheduler::new(0), Err(ConfigError::WorkerCount(0))));
    }

    #[test]
    fn inline_cancellation_stops_later_tasks() {
        let s = Scheduler::new(1).unwrap();
        let out = s.run_all(&[0, 1, 2, 3], true, |&i| if i == 1 { Err("boom") } else { Ok(i) });
        assert_eq!(
            out,
            vec![
                TaskOutcome::Completed(0),
                TaskOutcome::Failed("boom"),
                TaskOutcome::Cancelled,
                TaskOutcome::Cancelled
            ]
        );
    }

    #[test]
    fn panics_are_captured_inline() {
        let s = Scheduler::new(1).unwrap();
        let out = s.run_all(&[0, 1, 2], false, |&i| -> Result<i32, ()> {
            assert!(i != 1, "unit {i} exploded");
            Ok(i)
        });
        assert_eq!(out[0], TaskOutcome::Completed(0));
        assert_eq!(out[1], TaskOutcome::Panicked("unit 1 exploded".into()));
        assert_eq!(out[2], TaskOutcome::Completed(2));
    }
}
