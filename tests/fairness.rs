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

//! Tight-loop fairness scenario: a coroutine that never
//! yields anything but `Nice()` must not starve a sibling parked on a
//! `Wait` — the budget/tight_loop knobs exist exactly so the scheduler
//! periodically drains the reactor even while a runaway `Ready` coroutine
//! keeps re-enqueuing itself.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use coros::{Builder, Handle, Scheduler, SchedulerOptions};

#[test]
fn a_nice_looping_coroutine_does_not_starve_a_waiting_sibling() {
    let _ = env_logger::try_init();

    let mut opts = SchedulerOptions::default();
    opts.tight_loop = 8;
    let sched = Scheduler::new(opts).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let wakes = Arc::new(AtomicUsize::new(0));

    let stop2 = stop.clone();
    Builder::new()
        .name("spinner".to_string())
        .spawn(&sched, move || {
            let me = Handle::current().unwrap();
            while !stop2.load(Ordering::SeqCst) {
                me.nice();
            }
        })
        .unwrap();

    let stop3 = stop.clone();
    let wakes2 = wakes.clone();
    Builder::new()
        .name("waiter".to_string())
        .spawn(&sched, move || {
            let me = Handle::current().unwrap();
            me.wait(500);
            wakes2.fetch_add(1, Ordering::SeqCst);
            stop3.store(true, Ordering::SeqCst);
        })
        .unwrap();

    let start = Instant::now();
    sched.run();
    let elapsed = start.elapsed();

    assert_eq!(
        wakes.load(Ordering::SeqCst),
        1,
        "the waiting coroutine must wake exactly once"
    );
    assert!(
        elapsed < Duration::from_millis(900),
        "the spinner must not delay the waiter past its deadline: {:?}",
        elapsed
    );
}
