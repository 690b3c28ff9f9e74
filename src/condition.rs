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

//! A first-in-first-wake rendezvous point for coroutines on the *same*
//! scheduler. No cross-thread notification: a `Condition` is only
//! ever touched by coroutines running on the scheduler thread that
//! created it, so a plain `RefCell<VecDeque<Handle>>` is enough.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::coroutine::{Event, Handle, State};

#[derive(Default)]
pub struct Condition {
    waiters: RefCell<VecDeque<Handle>>,
}

impl Condition {
    pub fn new() -> Condition {
        Condition {
            waiters: RefCell::new(VecDeque::new()),
        }
    }

    /// Suspend the current coroutine WAITING until `notify_one` or
    /// `notify_all` wakes it with `Event::Cond`.
    pub fn wait(&self) -> Event {
        let me = Handle::current().expect("Condition::wait called outside a coroutine");
        self.waiters.borrow_mut().push_back(me.clone());
        me.suspend(State::Waiting)
    }

    /// Wake the longest-waiting coroutine, if any.
    pub fn notify_one(&self) {
        if let Some(h) = self.waiters.borrow_mut().pop_front() {
            h.wakeup(Event::Cond);
        }
    }

    /// Wake every currently-waiting coroutine, oldest first.
    pub fn notify_all(&self) {
        let waiters: Vec<Handle> = self.waiters.borrow_mut().drain(..).collect();
        for h in waiters {
            h.wakeup(Event::Cond);
        }
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::scheduler::Scheduler;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    #[test]
    fn notify_one_wakes_the_oldest_waiter_first() {
        let sched = Scheduler::new(Default::default()).unwrap();
        let cond = Rc::new(Condition::new());
        let order = Rc::new(StdRefCell::new(Vec::new()));

        for id in 0..3 {
            let cond = cond.clone();
            let order = order.clone();
            Handle::create(
                &sched,
                move || {
                    cond.wait();
                    order.borrow_mut().push(id);
                },
                || {},
                &Options::default(),
            )
            .unwrap();
        }

        // Runs after the three waiters (created first, so resumed
        // first within the same tick) have already parked on `cond`.
        let notifier_cond = cond.clone();
        Handle::create(
            &sched,
            move || {
                notifier_cond.notify_one();
                notifier_cond.notify_one();
                notifier_cond.notify_one();
            },
            || {},
            &Options::default(),
        )
        .unwrap();

        sched.run();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        assert_eq!(cond.waiter_count(), 0);
    }
}
