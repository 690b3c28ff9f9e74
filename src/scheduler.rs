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

//! Single-threaded reactor + ready/waiting queues. One `Scheduler`
//! owns one OS thread; `Handle::resume` is only ever called from that
//! thread. Everything else (new coroutines, cross-thread cancellation,
//! compute-pool handoff) comes in through `Mailbox`, woken with a
//! `mio::Waker`.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Token, Waker};

use crate::coroutine::{Event, Handle, State};
use crate::error::{Error, Result};
use crate::options::SchedulerOptions;

const WAKE_TOKEN: Token = Token(0);

struct Mailbox {
    posted: Vec<Handle>,
    wakes: Vec<(Handle, Event)>,
    compute_done: Vec<Handle>,
    shutdown: bool,
    graceful: bool,
}

impl Mailbox {
    fn new() -> Mailbox {
        Mailbox {
            posted: Vec::new(),
            wakes: Vec::new(),
            compute_done: Vec::new(),
            shutdown: false,
            graceful: false,
        }
    }
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    handle: Handle,
    event: Event,
    /// The handle's timer epoch at the moment this entry was armed; only
    /// fire if it still matches `handle.timer_epoch()` when popped.
    epoch: u64,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for TimerEntry {}
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest deadline on top.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

thread_local! {
    static CURRENT: Cell<*const Scheduler> = Cell::new(ptr::null());
}

fn next_scheduler_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

fn next_timer_seq() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// A single-threaded reactor driving a ready list, a waiting list, and a
/// cross-thread mailbox. `Scheduler::run` is the whole lifetime of the
/// OS thread it is pinned to.
pub struct Scheduler {
    pub(crate) id: u64,
    opts: SchedulerOptions,
    is_default: Cell<bool>,

    poll: RefCell<Poll>,
    events: RefCell<Events>,
    waker: Arc<Waker>,
    next_token: Cell<usize>,
    waiting_tokens: RefCell<HashMap<Token, Handle>>,

    ready: RefCell<VecDeque<Handle>>,
    /// Coroutines that exhausted their per-tick budget; merged back into
    /// `ready` at the start of the next `run_coros` so a tight
    /// CPU-bound coroutine can't starve everyone else in one tick.
    deferred: RefCell<Vec<Handle>>,
    waiting: RefCell<Vec<Handle>>,
    timers: RefCell<BinaryHeap<TimerEntry>>,
    outstanding: Cell<u64>,

    mailbox: Mutex<Mailbox>,

    sweep_at: Cell<Instant>,
}

impl Scheduler {
    pub fn new(opts: SchedulerOptions) -> Result<Scheduler> {
        let poll = Poll::new().map_err(Error::ReactorInit)?;
        let waker =
            Waker::new(poll.registry(), WAKE_TOKEN).map_err(Error::ReactorInit)?;
        let sweep_at = Instant::now() + Duration::from_millis(opts.sweep_millis);
        Ok(Scheduler {
            id: next_scheduler_id(),
            opts,
            is_default: Cell::new(true),
            poll: RefCell::new(poll),
            events: RefCell::new(Events::with_capacity(1024)),
            waker: Arc::new(waker),
            next_token: Cell::new(1),
            waiting_tokens: RefCell::new(HashMap::new()),
            ready: RefCell::new(VecDeque::new()),
            deferred: RefCell::new(Vec::new()),
            waiting: RefCell::new(Vec::new()),
            timers: RefCell::new(BinaryHeap::new()),
            outstanding: Cell::new(0),
            mailbox: Mutex::new(Mailbox::new()),
            sweep_at: Cell::new(sweep_at),
        })
    }

    pub(crate) fn mark_worker(&self) {
        self.is_default.set(false);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The scheduler currently running on this thread, if any.
    pub fn current() -> Option<&'static Scheduler> {
        let ptr = CURRENT.with(|c| c.get());
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }

    fn is_own_thread(&self) -> bool {
        CURRENT.with(|c| c.get() == self as *const Scheduler)
    }

    /// Allocate a fresh mio registration token for a socket.
    pub(crate) fn alloc_token(&self) -> Token {
        let n = self.next_token.get();
        self.next_token.set(n + 1);
        Token(n)
    }

    /// Borrow the underlying `mio::Poll`, e.g. to register/deregister a
    /// raw socket fd via its `Registry`.
    pub(crate) fn poll_handle(&self) -> std::cell::Ref<'_, Poll> {
        self.poll.borrow()
    }

    /// Register interest in `token` waking `handle`; the caller (socket
    /// code) has already registered the fd itself with the reactor.
    pub(crate) fn arm_io(&self, token: Token, handle: Handle) {
        self.waiting_tokens.borrow_mut().insert(token, handle);
    }

    pub(crate) fn disarm_io(&self, token: Token) {
        self.waiting_tokens.borrow_mut().remove(&token);
    }

    /// Arm a one-shot timer that wakes `handle` with `Event::Timeout`
    /// after `millis` milliseconds. Stamped with a fresh timer epoch so
    /// that if `handle` leaves WAITING through some other event first,
    /// `fire_timers` can recognize this entry as stale when it pops.
    pub(crate) fn arm_timer(&self, handle: Handle, millis: u64) {
        let epoch = handle.bump_timer_epoch();
        let deadline = Instant::now() + Duration::from_millis(millis);
        self.timers.borrow_mut().push(TimerEntry {
            deadline,
            seq: next_timer_seq(),
            handle,
            event: Event::Timeout,
            epoch,
        });
    }

    /// A freshly-created coroutine's first enqueue.
    pub(crate) fn enqueue_new(&self, handle: Handle) {
        if self.is_own_thread() {
            self.ready.borrow_mut().push_back(handle);
        } else {
            let mut mailbox = self.mailbox.lock().unwrap();
            mailbox.posted.push(handle);
            drop(mailbox);
            let _ = self.waker.wake();
        }
    }

    /// Wake a coroutine (cancellation or an explicit `Wakeup`). From the
    /// owning thread this moves it straight from waiting to ready; from
    /// a foreign thread it goes through the mailbox.
    pub(crate) fn wakeup(&self, handle: Handle, event: Event) {
        if self.is_own_thread() {
            self.move_to_ready(&handle, event);
        } else {
            let mut mailbox = self.mailbox.lock().unwrap();
            mailbox.wakes.push((handle, event));
            drop(mailbox);
            let _ = self.waker.wake();
        }
    }

    /// Called by a compute-pool worker thread once a coroutine's COMPUTE
    /// segment suspends back to READY.
    pub(crate) fn post_compute_done(&self, handle: Handle) {
        let mut mailbox = self.mailbox.lock().unwrap();
        mailbox.compute_done.push(handle);
        drop(mailbox);
        let _ = self.waker.wake();
    }

    fn push_waiting(&self, handle: Handle) {
        self.waiting.borrow_mut().push(handle);
    }

    /// Fast-swap-remove `handle` out of the waiting list (if present)
    /// and push it onto ready with `event`. O(1), does not preserve
    /// waiting-list order, which affects resume order within a batch but
    /// not fairness.
    fn move_to_ready(&self, handle: &Handle, event: Event) {
        let mut waiting = self.waiting.borrow_mut();
        if let Some(pos) = waiting.iter().position(|h| h == handle) {
            waiting.swap_remove(pos);
        }
        drop(waiting);
        // Invalidates any timer still pending for this handle from an
        // earlier `wait()`, so it can't resurface as a spurious Timeout
        // (or, worse, fire after `destroy()` has freed the stack).
        handle.bump_timer_epoch();
        handle.wakeup_local(event);
        self.ready.borrow_mut().push_back(handle.clone());
    }

    fn drain_mailbox(&self) {
        let (posted, wakes, compute_done) = {
            let mut mailbox = self.mailbox.lock().unwrap();
            (
                std::mem::take(&mut mailbox.posted),
                std::mem::take(&mut mailbox.wakes),
                std::mem::take(&mut mailbox.compute_done),
            )
        };
        for handle in posted {
            self.ready.borrow_mut().push_back(handle);
        }
        for (handle, event) in wakes {
            self.move_to_ready(&handle, event);
        }
        let n = compute_done.len() as u64;
        for handle in compute_done {
            // The compute worker resumed this coroutine in place; it
            // either suspended again via EndCompute (state Ready, the
            // common case) or ran to completion on the compute thread
            // (state Done). Either way Destroy must happen here, on the
            // owning scheduler's thread, never on the compute thread.
            if handle.state() == State::Done {
                handle.destroy();
            } else {
                handle.wakeup_local(Event::Wakeup);
                self.ready.borrow_mut().push_back(handle);
            }
        }
        self.outstanding.set(self.outstanding.get().saturating_sub(n));
    }

    fn poll_reactor(&self) {
        let timeout = self.next_timeout();
        let mut events = self.events.borrow_mut();
        let mut poll = self.poll.borrow_mut();
        match poll.poll(&mut events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => return,
            Err(e) => {
                log::warn!("scheduler {} reactor poll failed: {}", self.id, e);
                return;
            }
        }
        for event in events.iter() {
            if event.token() == WAKE_TOKEN {
                continue;
            }
            let handle = self.waiting_tokens.borrow_mut().remove(&event.token());
            let Some(handle) = handle else {
                continue;
            };
            let wake = if event.is_error() {
                Event::PollErr
            } else if event.is_read_closed() || event.is_write_closed() {
                Event::Disconnect
            } else if event.is_readable() {
                Event::Readable
            } else if event.is_writable() {
                Event::Writable
            } else {
                Event::Wakeup
            };
            self.move_to_ready(&handle, wake);
        }
        self.fire_timers();
    }

    fn next_timeout(&self) -> Option<Duration> {
        let now = Instant::now();
        let timer_at = self.timers.borrow().peek().map(|t| t.deadline);
        let candidate = match timer_at {
            Some(d) => d.min(self.sweep_at.get()),
            None => self.sweep_at.get(),
        };
        Some(candidate.saturating_duration_since(now))
    }

    fn fire_timers(&self) {
        let now = Instant::now();
        loop {
            let due = {
                let timers = self.timers.borrow();
                matches!(timers.peek(), Some(t) if t.deadline <= now)
            };
            if !due {
                break;
            }
            let entry = self.timers.borrow_mut().pop().unwrap();
            // Stale if the handle already left WAITING (woken by
            // cancel/wakeup/IO, or already destroyed) since this timer
            // was armed — its epoch will have moved on. Dropping it here
            // rather than waking unconditionally is what keeps this from
            // resuming a coroutine whose stack `destroy()` already freed.
            if entry.handle.state() == State::Waiting && entry.handle.timer_epoch() == entry.epoch
            {
                self.move_to_ready(&entry.handle, entry.event);
            }
        }
    }

    fn sweep_if_due(&self) {
        let now = Instant::now();
        if now < self.sweep_at.get() {
            return;
        }
        self.sweep_at
            .set(now + Duration::from_millis(self.opts.sweep_millis));
        let timed_out: Vec<Handle> = self
            .waiting
            .borrow()
            .iter()
            .filter(|h| h.tick_deadline())
            .cloned()
            .collect();
        for handle in timed_out {
            self.move_to_ready(&handle, Event::Timeout);
        }
    }

    fn run_coros(&self) {
        self.ready
            .borrow_mut()
            .extend(self.deferred.borrow_mut().drain(..));
        let ready_len = self.ready.borrow().len();
        if ready_len == 0 {
            return;
        }
        for h in self.ready.borrow().iter() {
            h.set_budget(self.opts.coro_budget);
        }
        let mut loop_limit = self.opts.tight_loop as u64 * ready_len as u64;
        while loop_limit > 0 {
            let handle = match self.ready.borrow_mut().pop_front() {
                Some(h) => h,
                None => break,
            };
            loop_limit -= 1;

            let event = handle.event();
            handle.resume(event);
            handle.decrement_budget();

            match handle.state() {
                State::Done => {
                    handle.destroy();
                }
                State::Waiting => {
                    self.push_waiting(handle);
                }
                State::Compute => {
                    self.outstanding.set(self.outstanding.get() + 1);
                    crate::compute::global().submit(handle, self as *const Scheduler);
                }
                State::Ready => {
                    if handle.budget() == 0 {
                        self.deferred.borrow_mut().push(handle);
                    } else {
                        self.ready.borrow_mut().push_back(handle);
                    }
                }
                State::Running => unreachable!("coroutine observed RUNNING after resume returned"),
            }
        }
    }

    fn should_stop(&self) -> bool {
        let mailbox = self.mailbox.lock().unwrap();
        if mailbox.shutdown {
            if mailbox.graceful {
                self.waiting.borrow().is_empty()
                    && self.outstanding.get() == 0
                    && self.ready.borrow().is_empty()
                    && self.deferred.borrow().is_empty()
                    && mailbox.posted.is_empty()
                    && mailbox.compute_done.is_empty()
            } else {
                true
            }
        } else if self.is_default.get() {
            self.waiting.borrow().is_empty()
                && self.outstanding.get() == 0
                && self.ready.borrow().is_empty()
                && self.deferred.borrow().is_empty()
                && mailbox.posted.is_empty()
                && mailbox.compute_done.is_empty()
        } else {
            false
        }
    }

    fn tick(&self) {
        self.poll_reactor();
        self.run_coros();
        self.drain_mailbox();
        self.sweep_if_due();
    }

    /// Run this scheduler's reactor loop on the calling thread until it
    /// is asked to stop (explicitly, or — for the default scheduler —
    /// once it runs out of waiting and outstanding work).
    pub fn run(&self) {
        let is_default = self.is_default.get();
        if is_default {
            crate::compute::register_root();
        }
        CURRENT.with(|c| c.set(self as *const Scheduler));
        loop {
            self.tick();
            if self.should_stop() {
                break;
            }
        }
        self.cleanup();
        CURRENT.with(|c| c.set(ptr::null()));
        if is_default {
            crate::compute::release_root();
        }
    }

    /// Signal this scheduler to stop. Safe from any thread. `graceful =
    /// true` waits for outstanding waiting/compute work to drain first;
    /// `false` stops on the scheduler's next tick regardless.
    pub fn stop(&self, graceful: bool) {
        let mut mailbox = self.mailbox.lock().unwrap();
        mailbox.shutdown = true;
        mailbox.graceful = graceful;
        drop(mailbox);
        let _ = self.waker.wake();
    }

    /// Wake every surviving coroutine with CANCEL, resume it so it
    /// unwinds, and destroy it. Then drain the reactor once more,
    /// non-blocking, so close callbacks complete.
    fn cleanup(&self) {
        let mut all: Vec<Handle> = self.ready.borrow_mut().drain(..).collect();
        all.extend(self.waiting.borrow_mut().drain(..));
        all.extend(self.deferred.borrow_mut().drain(..));
        {
            let mut mailbox = self.mailbox.lock().unwrap();
            all.extend(mailbox.posted.drain(..));
            all.extend(mailbox.wakes.drain(..).map(|(h, _)| h));
            all.extend(mailbox.compute_done.drain(..));
        }
        self.waiting_tokens.borrow_mut().clear();
        for (_, _, handle, _) in self
            .timers
            .borrow_mut()
            .drain()
            .map(|t| (t.deadline, t.seq, t.handle, t.event))
        {
            all.push(handle);
        }

        for handle in all {
            if handle.state() != State::Done {
                handle.resume(Event::Cancel);
            }
            handle.destroy();
        }

        let mut events = Events::with_capacity(16);
        let mut poll = self.poll.borrow_mut();
        let _ = poll.poll(&mut events, Some(Duration::from_millis(0)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::Handle as CoHandle;
    use crate::options::Options;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn a_single_coroutine_runs_to_completion_and_default_scheduler_stops() {
        let sched = Scheduler::new(SchedulerOptions::default()).unwrap();
        let ran = Rc::new(RefCell::new(false));
        let ran2 = ran.clone();
        CoHandle::create(
            &sched,
            move || {
                *ran2.borrow_mut() = true;
            },
            || {},
            &Options::default(),
        )
        .unwrap();

        sched.run();
        assert!(*ran.borrow());
    }

    #[test]
    fn nice_forever_is_bounded_by_tight_loop_so_wait_still_wakes() {
        let mut opts = SchedulerOptions::default();
        opts.tight_loop = 4;
        let sched = Scheduler::new(opts).unwrap();

        let woke = Rc::new(RefCell::new(false));
        let woke2 = woke.clone();
        CoHandle::create(
            &sched,
            move || {
                let me = CoHandle::current().unwrap();
                let ev = me.wait(50);
                *woke2.borrow_mut() = ev == Event::Timeout;
            },
            || {},
            &Options::default(),
        )
        .unwrap();

        let spins = Rc::new(RefCell::new(0u32));
        let spins2 = spins.clone();
        CoHandle::create(
            &sched,
            move || loop {
                *spins2.borrow_mut() += 1;
                if *spins2.borrow() > 1000 {
                    break;
                }
                CoHandle::current().unwrap().nice();
            },
            || {},
            &Options::default(),
        )
        .unwrap();

        sched.run();
        assert!(*woke.borrow(), "the waiting coroutine must still wake");
    }

    #[test]
    fn a_timer_superseded_by_an_earlier_wakeup_never_fires_after_destroy() {
        let sched = Scheduler::new(SchedulerOptions::default()).unwrap();

        let events = Rc::new(RefCell::new(Vec::new()));
        let events_a = events.clone();
        let handle_slot: Rc<RefCell<Option<CoHandle>>> = Rc::new(RefCell::new(None));
        let handle_slot_a = handle_slot.clone();

        CoHandle::create(
            &sched,
            move || {
                *handle_slot_a.borrow_mut() = Some(CoHandle::current().unwrap());
                let ev = CoHandle::current().unwrap().wait(200);
                events_a.borrow_mut().push(ev);
            },
            || {},
            &Options::default(),
        )
        .unwrap();

        // Wakes `a` with an explicit event well before its 200ms timer
        // would fire, leaving a stale `TimerEntry` behind in the heap.
        let handle_slot_b = handle_slot.clone();
        CoHandle::create(
            &sched,
            move || {
                CoHandle::current().unwrap().nice();
                let target = handle_slot_b.borrow().clone().unwrap();
                target.wakeup(Event::Wakeup);
            },
            || {},
            &Options::default(),
        )
        .unwrap();

        // Keeps the reactor looping past `a`'s original 200ms deadline so
        // the stale timer entry gets a chance to pop; pre-fix this would
        // resume a coroutine whose `destroy()` had already freed its stack.
        CoHandle::create(
            &sched,
            move || {
                CoHandle::current().unwrap().wait(260);
            },
            || {},
            &Options::default(),
        )
        .unwrap();

        sched.run();

        assert_eq!(*events.borrow(), vec![Event::Wakeup]);
    }
}
