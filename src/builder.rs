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

//! Chained configuration for spawning a coroutine onto a scheduler.

use crate::coroutine::Handle;
use crate::error::Result;
use crate::options::Options;
use crate::scheduler::Scheduler;

/// Coroutine configuration. Provides detailed control over the stack
/// size and name of a new coroutine before it's spawned.
///
/// ```ignore
/// let handle = Builder::new()
///     .name("worker-1".to_string())
///     .stack_size(64 * 1024)
///     .spawn(&scheduler, || println!("hello from a coroutine"))
///     .unwrap();
/// ```
pub struct Builder {
    opts: Options,
}

impl Builder {
    /// Generate the base configuration for spawning a coroutine, from
    /// which configuration methods can be chained.
    pub fn new() -> Builder {
        Builder {
            opts: Default::default(),
        }
    }

    /// Name the coroutine-to-be. Used for identification in panic and
    /// log messages only.
    pub fn name(mut self, name: String) -> Builder {
        self.opts.name = Some(name);
        self
    }

    /// Set the size of the stack for the new coroutine.
    pub fn stack_size(mut self, size: usize) -> Builder {
        self.opts.stack_size = size;
        self
    }

    /// Spawn a new coroutine onto `scheduler` and return its handle.
    /// The coroutine is enqueued READY; it starts running on
    /// `scheduler`'s next tick.
    pub fn spawn<F>(self, scheduler: &Scheduler, body: F) -> Result<Handle>
    where
        F: FnOnce() + Send + 'static,
    {
        Handle::create(scheduler, body, || {}, &self.opts)
    }

    /// Spawn a new coroutine, additionally running `exit` once the
    /// coroutine is torn down (after its body returns or unwinds from
    /// cancellation, right before its stack is freed).
    pub fn spawn_with_exit<F, E>(self, scheduler: &Scheduler, body: F, exit: E) -> Result<Handle>
    where
        F: FnOnce() + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        Handle::create(scheduler, body, exit, &self.opts)
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SchedulerOptions;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn spawn_runs_the_named_coroutine_to_completion() {
        let sched = Scheduler::new(SchedulerOptions::default()).unwrap();
        let ran = Rc::new(RefCell::new(false));
        let ran2 = ran.clone();

        Builder::new()
            .name("test-coro".to_string())
            .stack_size(16 * 1024)
            .spawn(&sched, move || {
                *ran2.borrow_mut() = true;
            })
            .unwrap();

        sched.run();
        assert!(*ran.borrow());
    }

    #[test]
    fn spawn_with_exit_runs_the_exit_callback_after_the_body() {
        let sched = Scheduler::new(SchedulerOptions::default()).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let body_log = log.clone();
        let exit_log = log.clone();

        Builder::new()
            .spawn_with_exit(
                &sched,
                move || body_log.borrow_mut().push("body"),
                move || exit_log.borrow_mut().push("exit"),
            )
            .unwrap();

        sched.run();
        assert_eq!(*log.borrow(), vec!["body", "exit"]);
    }
}
