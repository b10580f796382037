//! Delegated task execution.
//!
//! The handshake state machine only needs every pending task to have run
//! before it re-reads the engine status. Where they run is up to the
//! [`TaskRunner`].

use std::{num::NonZeroUsize, thread};

use super::engine::DelegatedTask;

/// Runs a batch of delegated tasks to completion.
pub trait TaskRunner: Send + Sync {
    /// Run every task in `tasks` and return once all of them finished.
    fn run(&self, tasks: Vec<DelegatedTask>);
}

/// Runs tasks one after another on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineTaskRunner;

impl TaskRunner for InlineTaskRunner {
    fn run(&self, tasks: Vec<DelegatedTask>) {
        for task in tasks {
            task();
        }
    }
}

/// Spreads each batch over freshly spawned scoped threads and joins them
/// before returning.
///
/// This is not a pool: threads live for one batch and are never reused, and
/// at most `max_threads` run per batch. A panicking task propagates its
/// panic to the caller once all threads have been joined.
#[derive(Debug, Clone, Copy)]
pub struct ThreadedTaskRunner {
    max_threads: NonZeroUsize,
}

impl ThreadedTaskRunner {
    /// Runner spawning at most `max_threads` threads per batch.
    pub fn new(max_threads: NonZeroUsize) -> Self {
        Self { max_threads }
    }

    /// Maximum threads per batch
    pub fn max_threads(&self) -> usize {
        self.max_threads.get()
    }
}

impl Default for ThreadedTaskRunner {
    fn default() -> Self {
        Self::new(thread::available_parallelism().unwrap_or(NonZeroUsize::MIN))
    }
}

impl TaskRunner for ThreadedTaskRunner {
    fn run(&self, tasks: Vec<DelegatedTask>) {
        let workers = self.max_threads.get().min(tasks.len());
        if workers <= 1 {
            InlineTaskRunner.run(tasks);
            return;
        }

        let mut batches: Vec<Vec<DelegatedTask>> = (0..workers).map(|_| Vec::new()).collect();
        for (index, task) in tasks.into_iter().enumerate() {
            batches[index % workers].push(task);
        }

        thread::scope(|scope| {
            for batch in batches {
                scope.spawn(move || InlineTaskRunner.run(batch));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    fn counting_tasks(n: usize, counter: &Arc<AtomicUsize>) -> Vec<DelegatedTask> {
        (0..n)
            .map(|_| {
                let counter = Arc::clone(counter);
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as DelegatedTask
            })
            .collect()
    }

    #[test]
    fn inline_runs_all_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        InlineTaskRunner.run(counting_tasks(5, &counter));
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn threaded_joins_before_returning() {
        let counter = Arc::new(AtomicUsize::new(0));
        let runner = ThreadedTaskRunner::new(NonZeroUsize::new(3).unwrap());
        runner.run(counting_tasks(10, &counter));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn threaded_handles_empty_batch() {
        ThreadedTaskRunner::default().run(Vec::new());
    }
}
