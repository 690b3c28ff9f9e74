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

//! Process-global compute offload pool. A coroutine that calls
//! `BeginCompute` is handed to one of these worker threads, which
//! `Resume`s it in place — so the segment between `BeginCompute` and
//! `EndCompute` runs on the compute thread, not the reactor thread — and
//! posts it back to its owning scheduler's mailbox once that segment
//! suspends again. Lazily started on first use and torn down once every
//! default scheduler sharing it has stopped running (see
//! `register_root`/`release_root`, called from `Scheduler::run`).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, OnceLock};
use std::thread::{self, JoinHandle};

use crate::coroutine::Handle;
use crate::scheduler::Scheduler;

struct Job {
    handle: Handle,
    scheduler: *const Scheduler,
}

// The compute worker only ever touches `scheduler` to call methods that
// are themselves safe from a foreign thread (`post_compute_done`), and
// `handle` transfers exclusive access to the coroutine for the duration
// of the job (see coroutine.rs's concurrency invariant).
unsafe impl Send for Job {}

struct Queue {
    jobs: Mutex<Vec<Job>>,
    cond: Condvar,
    shutdown: AtomicBool,
}

pub(crate) struct ComputePool {
    queue: std::sync::Arc<Queue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ComputePool {
    fn new(threads: usize) -> ComputePool {
        let queue = std::sync::Arc::new(Queue {
            jobs: Mutex::new(Vec::new()),
            cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(threads);
        for idx in 0..threads {
            let queue = queue.clone();
            workers.push(
                thread::Builder::new()
                    .name(format!("coros-compute-{idx}"))
                    .spawn(move || worker_loop(queue))
                    .expect("failed to spawn compute pool worker thread"),
            );
        }

        ComputePool {
            queue,
            workers: Mutex::new(workers),
        }
    }

    /// Hand a COMPUTE-state coroutine to the pool. `scheduler` is the
    /// coroutine's owning scheduler, used to post it back once its
    /// compute segment suspends.
    pub(crate) fn submit(&self, handle: Handle, scheduler: *const Scheduler) {
        let mut jobs = self.queue.jobs.lock().unwrap();
        jobs.push(Job { handle, scheduler });
        self.queue.cond.notify_one();
    }

    /// Wake every worker and let them drain; in-flight jobs finish
    /// normally. Queued-but-not-started coroutines are simply left in
    /// `jobs` and dropped — they get cancelled via their owning
    /// scheduler's own Cleanup path instead.
    pub(crate) fn shutdown(&self) {
        self.queue.shutdown.store(true, Ordering::SeqCst);
        self.queue.cond.notify_all();
        let mut workers = self.workers.lock().unwrap();
        for w in workers.drain(..) {
            let _ = w.join();
        }
    }
}

fn worker_loop(queue: std::sync::Arc<Queue>) {
    loop {
        let job = {
            let mut jobs = queue.jobs.lock().unwrap();
            loop {
                if let Some(job) = jobs.pop() {
                    break Some(job);
                }
                if queue.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
                jobs = queue.cond.wait(jobs).unwrap();
            }
        };
        let Some(job) = job else { break };

        log::debug!(
            "compute worker {:?} resuming coroutine {}",
            thread::current().name(),
            job.handle.id()
        );
        job.handle.resume(crate::coroutine::Event::Wakeup);

        let sched = unsafe { &*job.scheduler };
        sched.post_compute_done(job.handle);
    }
}

static POOL: OnceLock<ComputePool> = OnceLock::new();

/// Count of live default (root) schedulers sharing the process-global
/// pool. Bumped when one starts running, dropped when it stops; the
/// pool is torn down once this reaches zero again.
static LIVE_ROOTS: AtomicUsize = AtomicUsize::new(0);

/// The process-global compute pool, lazily started (with the default
/// thread count) on first use by any scheduler's `BeginCompute` handoff.
pub(crate) fn global() -> &'static ComputePool {
    POOL.get_or_init(|| ComputePool::new(crate::options::SchedulerOptions::default().compute_threads))
}

/// Called by a default scheduler as it starts `run()`.
pub(crate) fn register_root() {
    LIVE_ROOTS.fetch_add(1, Ordering::SeqCst);
}

/// Called by a default scheduler once its `run()` loop exits. Tears
/// down the process-global pool — draining its queue and joining its
/// worker threads — once every default scheduler that might still be
/// sharing it has ended.
pub(crate) fn release_root() {
    if LIVE_ROOTS.fetch_sub(1, Ordering::SeqCst) == 1 {
        if let Some(pool) = POOL.get() {
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_starts_the_configured_number_of_worker_threads() {
        let pool = ComputePool::new(3);
        assert_eq!(pool.workers.lock().unwrap().len(), 3);
        pool.shutdown();
    }
}
