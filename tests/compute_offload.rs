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

//! Compute offload scenario: a coroutine's segment between
//! `begin_compute`/`end_compute` runs on a different OS thread than the
//! scheduler, and a second coroutine's `Wait(100)` completes on the
//! scheduler thread while the first is still blocked on the compute
//! pool — offload must not stall the rest of the scheduler.

use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use coros::{Builder, Event, Handle, Scheduler, SchedulerOptions};

#[test]
fn compute_segment_runs_off_thread_without_blocking_other_coroutines() {
    let _ = env_logger::try_init();

    let sched = Scheduler::new(SchedulerOptions::default()).unwrap();
    let scheduler_thread = thread::current().id();

    let during: Arc<Mutex<Option<ThreadId>>> = Arc::new(Mutex::new(None));
    let after: Arc<Mutex<Option<ThreadId>>> = Arc::new(Mutex::new(None));
    let y_woke = Arc::new(Mutex::new(false));

    let during2 = during.clone();
    let after2 = after.clone();
    Builder::new()
        .name("compute-coro".to_string())
        .spawn(&sched, move || {
            let me = Handle::current().unwrap();
            me.begin_compute();
            *during2.lock().unwrap() = Some(thread::current().id());
            thread::sleep(Duration::from_millis(200));
            me.end_compute();
            *after2.lock().unwrap() = Some(thread::current().id());
        })
        .unwrap();

    let y_woke2 = y_woke.clone();
    Builder::new()
        .name("waiter-coro".to_string())
        .spawn(&sched, move || {
            let me = Handle::current().unwrap();
            let ev = me.wait(100);
            *y_woke2.lock().unwrap() = ev == Event::Timeout;
        })
        .unwrap();

    sched.run();

    let during = during.lock().unwrap().expect("compute segment should have run");
    let after = after.lock().unwrap().expect("post-compute segment should have run");

    assert_ne!(
        during, scheduler_thread,
        "the BeginCompute..EndCompute segment must run off the scheduler thread"
    );
    assert_eq!(
        after, scheduler_thread,
        "code after EndCompute must resume on the owning scheduler thread"
    );
    assert!(
        *y_woke.lock().unwrap(),
        "a concurrent Wait(100) must still complete while the other coroutine is offloaded"
    );
}
