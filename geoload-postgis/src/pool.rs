//! Bounded worker pool for the parallel DDL phases.
//!
//! Workers are plain threads pulling boxed tasks from a bounded channel.
//! Every submitted task runs to completion even after another one failed, so
//! producers can never block on capacity nobody consumes; [`WorkerPool::wait`]
//! reports the first failure once the channel is drained.

use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded};
use log::debug;

use crate::WorkerPanic;

type Task<E> = Box<dyn FnOnce() -> Result<(), E> + Send + 'static>;
type FirstError<E> = Arc<Mutex<Option<E>>>;

/// Number of workers used by [`WorkerPool::new`].
#[must_use]
pub fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Fixed-size pool running fallible tasks.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use geoload_postgis::{WorkerPanic, WorkerPool};
///
/// let ran = Arc::new(AtomicUsize::new(0));
/// let pool: WorkerPool<WorkerPanic> = WorkerPool::new(3);
/// for _ in 0..3 {
///     let ran = Arc::clone(&ran);
///     pool.submit(move || {
///         ran.fetch_add(1, Ordering::SeqCst);
///         Ok(())
///     });
/// }
/// pool.wait().unwrap();
/// assert_eq!(ran.load(Ordering::SeqCst), 3);
/// ```
pub struct WorkerPool<E> {
    sender: Option<Sender<Task<E>>>,
    workers: Vec<JoinHandle<()>>,
    first_error: FirstError<E>,
}

impl<E> WorkerPool<E>
where
    E: From<WorkerPanic> + Send + 'static,
{
    /// Pool with [`default_workers`] threads sized for `expected_tasks`.
    #[must_use]
    pub fn new(expected_tasks: usize) -> Self {
        Self::with_workers(default_workers(), expected_tasks)
    }

    /// Pool with an explicit worker count (at least one).
    #[must_use]
    pub fn with_workers(workers: usize, expected_tasks: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = bounded::<Task<E>>(expected_tasks.max(1));
        let first_error: FirstError<E> = Arc::new(Mutex::new(None));
        debug!("starting {workers} workers for {expected_tasks} tasks");

        let handles = (0..workers)
            .map(|_| {
                let receiver = receiver.clone();
                let first_error = Arc::clone(&first_error);
                thread::spawn(move || {
                    for task in receiver {
                        if let Err(err) = run_task(task) {
                            record(&first_error, err);
                        }
                    }
                })
            })
            .collect();

        Self {
            sender: Some(sender),
            workers: handles,
            first_error,
        }
    }

    /// Queue a task; blocks while the channel is full.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(returned) = sender.send(Box::new(task)) {
            // No worker left to receive it; run it here so it is not lost.
            if let Err(err) = run_task(returned.into_inner()) {
                record(&self.first_error, err);
            }
        }
    }

    /// Close submission, wait for every task and return the first error.
    pub fn wait(mut self) -> Result<(), E> {
        drop(self.sender.take());
        for worker in self.workers.drain(..) {
            if let Err(payload) = worker.join() {
                record(&self.first_error, E::from(panic_message(payload.as_ref())));
            }
        }
        let first = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        first.map_or(Ok(()), Err)
    }
}

fn run_task<E: From<WorkerPanic>>(task: Task<E>) -> Result<(), E> {
    panic::catch_unwind(AssertUnwindSafe(task))
        .unwrap_or_else(|payload| Err(E::from(panic_message(payload.as_ref()))))
}

fn record<E>(slot: &Mutex<Option<E>>, err: E) {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        *slot = Some(err);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> WorkerPanic {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned());
    WorkerPanic { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Failed(usize),
        Panicked(String),
    }

    impl From<WorkerPanic> for TestError {
        fn from(panic: WorkerPanic) -> Self {
            Self::Panicked(panic.message)
        }
    }

    #[rstest]
    #[case(1, 1)]
    #[case(2, 10)]
    #[case(4, 64)]
    fn runs_every_task(#[case] workers: usize, #[case] tasks: usize) {
        let ran = Arc::new(AtomicUsize::new(0));
        let pool: WorkerPool<TestError> = WorkerPool::with_workers(workers, tasks);
        for _ in 0..tasks {
            let ran = Arc::clone(&ran);
            pool.submit(move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(pool.wait(), Ok(()));
        assert_eq!(ran.load(Ordering::SeqCst), tasks);
    }

    #[rstest]
    #[case(1)]
    #[case(5)]
    #[case(20)]
    fn failure_drains_all_tasks(#[case] failing: usize) {
        let tasks = 20;
        let ran = Arc::new(AtomicUsize::new(0));
        let pool: WorkerPool<TestError> = WorkerPool::with_workers(3, tasks);
        for k in 1..=tasks {
            let ran = Arc::clone(&ran);
            pool.submit(move || {
                ran.fetch_add(1, Ordering::SeqCst);
                if k == failing {
                    Err(TestError::Failed(k))
                } else {
                    Ok(())
                }
            });
        }
        assert_eq!(pool.wait(), Err(TestError::Failed(failing)));
        assert_eq!(ran.load(Ordering::SeqCst), tasks);
    }

    #[rstest]
    fn more_tasks_than_capacity_do_not_deadlock() {
        let ran = Arc::new(AtomicUsize::new(0));
        let pool: WorkerPool<TestError> = WorkerPool::with_workers(2, 1);
        for _ in 0..50 {
            let ran = Arc::clone(&ran);
            pool.submit(move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(pool.wait(), Ok(()));
        assert_eq!(ran.load(Ordering::SeqCst), 50);
    }

    #[rstest]
    fn panics_surface_as_errors_and_worker_survives() {
        let ran = Arc::new(AtomicUsize::new(0));
        let pool: WorkerPool<TestError> = WorkerPool::with_workers(1, 3);
        pool.submit(|| panic!("boom"));
        for _ in 0..2 {
            let ran = Arc::clone(&ran);
            pool.submit(move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        assert_eq!(pool.wait(), Err(TestError::Panicked("boom".into())));
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[rstest]
    fn empty_pool_waits_cleanly() {
        let pool: WorkerPool<TestError> = WorkerPool::new(0);
        assert_eq!(pool.wait(), Ok(()));
        assert!(default_workers() >= 1);
    }
}
