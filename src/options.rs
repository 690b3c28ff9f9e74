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

//! Per-coroutine and per-scheduler configuration knobs.

use crate::sys;

/// Coroutine spawn options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Requested stack size in bytes. Clamped to the platform minimum and
    /// page-rounded by `Stack::allocate`.
    pub stack_size: usize,

    /// Name, used only for identification in log messages.
    pub name: Option<String>,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            stack_size: sys::default_stack_size(),
            name: None,
        }
    }
}

/// Fairness and timing knobs for a single scheduler: 512 outer
/// iterations per tick by default, 32 resumes per coroutine per batch,
/// a 1000ms sweep interval, and 2 lazily-started compute threads.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Outer-loop multiplier: `loop_limit = tight_loop * ready.len()`.
    pub tight_loop: u32,

    /// Resume tokens granted to each coroutine at the start of a batch.
    pub coro_budget: u32,

    /// Number of compute-pool worker threads lazily started by the first
    /// default scheduler that calls `BeginCompute`.
    pub compute_threads: usize,

    /// Sweep timer period in milliseconds.
    pub sweep_millis: u64,
}

impl Default for SchedulerOptions {
    fn default() -> SchedulerOptions {
        SchedulerOptions {
            tight_loop: 512,
            coro_budget: 32,
            compute_threads: 2,
            sweep_millis: 1000,
        }
    }
}

/// Worker count for a `SchedulerPool`.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Number of worker schedulers, each on its own OS thread, in
    /// addition to the default scheduler on the creating thread.
    pub workers: usize,

    /// Per-worker scheduler options.
    pub scheduler: SchedulerOptions,
}

impl Default for PoolOptions {
    fn default() -> PoolOptions {
        PoolOptions {
            workers: 1,
            scheduler: SchedulerOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_use_platform_stack_size() {
        let opts = Options::default();
        assert_eq!(opts.stack_size, sys::default_stack_size());
        assert!(opts.name.is_none());
    }

    #[test]
    fn scheduler_options_match_boundary_constants() {
        let opts = SchedulerOptions::default();
        assert_eq!(opts.tight_loop, 512);
        assert_eq!(opts.coro_budget, 32);
        assert_eq!(opts.compute_threads, 2);
        assert_eq!(opts.sweep_millis, 1000);
    }
}
