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

//! A single-threaded cooperative stackful coroutine runtime for
//! non-blocking network I/O and compute offload.
//!
//! A [`Scheduler`] owns one OS thread, one [`mio::Poll`] reactor, and a
//! set of [`Handle`]s it round-robins between ticks. Coroutines yield
//! control by calling blocking-looking methods — [`Socket`] reads and
//! writes, [`Handle::wait`], [`Condition::wait`] — that suspend the
//! calling coroutine and hand control back to the scheduler rather than
//! blocking the OS thread. Multiple schedulers can run side by side via
//! [`SchedulerPool`], and CPU-bound work can be moved off the reactor
//! thread entirely with [`Handle::begin_compute`]/[`Handle::end_compute`].
//!
//! ```ignore
//! use coros::{Builder, Scheduler, SchedulerOptions};
//!
//! let sched = Scheduler::new(SchedulerOptions::default())?;
//! Builder::new().spawn(&sched, || {
//!     println!("hello from a coroutine");
//! })?;
//! sched.run();
//! ```

mod builder;
mod buffer;
mod compute;
mod condition;
mod coroutine;
mod error;
mod options;
mod pool;
mod scheduler;
mod socket;
mod stack;
mod sys;

pub use buffer::Buffer;
pub use builder::Builder;
pub use condition::Condition;
pub use coroutine::{Event, Handle, State};
pub use error::{Error, Result};
pub use options::{Options, PoolOptions, SchedulerOptions};
pub use pool::SchedulerPool;
pub use scheduler::Scheduler;
pub use socket::{Socket, BAD_SOCKET};

/// Spawn a new coroutine onto `scheduler` with default [`Options`].
/// Equivalent to `Builder::new().spawn(scheduler, body)`.
pub fn spawn<F>(scheduler: &Scheduler, body: F) -> Result<Handle>
where
    F: FnOnce() + Send + 'static,
{
    Builder::new().spawn(scheduler, body)
}

/// The coroutine currently running on this thread, if any.
/// Equivalent to [`Handle::current`].
pub fn current() -> Option<Handle> {
    Handle::current()
}

/// Yield the current coroutine back to its scheduler, to be resumed
/// again on a later tick. Equivalent to [`Handle::nice`].
pub fn nice() {
    Handle::current()
        .expect("coros::nice called outside a coroutine")
        .nice()
}
