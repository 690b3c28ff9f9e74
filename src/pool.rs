// The MIT License (MIT)

// Copyright (c) 2015 Rustcc Developers

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Composes N worker schedulers on N threads on top of the calling
//! thread's own (already-constructed) default scheduler, and routes new
//! coroutines across the workers round-robin. Keeps one scheduler on the
//! creating thread (`is_default`) in addition to the N workers, and
//! starts the default scheduler first.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};

use crate::error::Result;
use crate::options::PoolOptions;
use crate::scheduler::Scheduler;

struct Worker {
    scheduler: Arc<Scheduler>,
    thread: JoinHandle<()>,
}

/// One default scheduler (on the thread that calls `SchedulerPool::new`)
/// plus N worker schedulers, each pinned to its own thread.
pub struct SchedulerPool {
    default: Arc<Scheduler>,
    workers: Vec<Worker>,
    next: AtomicUsize,
}

impl SchedulerPool {
    /// Build a pool of `opts.workers` worker schedulers around
    /// `default` — the caller's own scheduler, already constructed on
    /// the calling thread but not yet run. Blocks until every worker's
    /// reactor has initialized and published itself.
    pub fn new(default: Arc<Scheduler>, opts: PoolOptions) -> Result<SchedulerPool> {
        let barrier = Arc::new(Barrier::new(opts.workers + 1));
        let mut workers = Vec::with_capacity(opts.workers);

        for idx in 0..opts.workers {
            let scheduler = Arc::new(Scheduler::new(opts.scheduler.clone())?);
            scheduler.mark_worker();
            let published = scheduler.clone();
            let barrier = barrier.clone();

            let thread = thread::Builder::new()
                .name(format!("coros-worker-{idx}"))
                .spawn(move || {
                    barrier.wait();
                    published.run();
                })
                .expect("failed to spawn scheduler pool worker thread");

            workers.push(Worker { scheduler, thread });
        }

        barrier.wait();

        Ok(SchedulerPool {
            default,
            workers,
            next: AtomicUsize::new(0),
        })
    }

    /// Next worker scheduler by round-robin.
    pub fn next(&self) -> &Scheduler {
        if self.workers.is_empty() {
            return &self.default;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[idx].scheduler
    }

    /// The scheduler on the thread that created this pool.
    pub fn default_scheduler(&self) -> &Scheduler {
        &self.default
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signal every worker scheduler to stop gracefully and join all
    /// worker threads. Does not touch the default scheduler — the
    /// caller drives that one directly (typically via `Scheduler::run`).
    pub fn stop(self) {
        for worker in &self.workers {
            worker.scheduler.stop(true);
        }
        for worker in self.workers {
            let _ = worker.thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SchedulerOptions;

    #[test]
    fn pool_publishes_all_workers_before_returning() {
        let default = Arc::new(Scheduler::new(SchedulerOptions::default()).unwrap());
        let pool = SchedulerPool::new(
            default,
            PoolOptions {
                workers: 3,
                scheduler: SchedulerOptions::default(),
            },
        )
        .unwrap();

        assert_eq!(pool.worker_count(), 3);
        let ids: std::collections::HashSet<u64> =
            (0..6).map(|_| pool.next().id()).collect();
        assert_eq!(ids.len(), 3, "round robin should cycle through all workers");

        pool.stop();
    }
}
