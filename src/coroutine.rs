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

//! A coroutine is a (register context, stack) pair plus the bookkeeping a
//! scheduler needs to drive it: lifecycle state, the wake event that
//! explains the most recent WAITING -> READY transition, an optional
//! deadline, a fairness budget and a joiner.
//!
//! Two context-switch directions are used, symmetrically, on the same
//! pair of `context::Context` cells: whichever side calls `.resume()`
//! hands the other side control and receives back, once that side jumps
//! back, a fresh `Context` representing "where to resume me next time".
//! Both the scheduler (in `Handle::resume`) and the coroutine body (in
//! `Handle::suspend`) follow that same pattern, so the two threads of
//! control ping-pong through the pair without either owning a direction.

use std::any::Any;
use std::cell::{Cell, UnsafeCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use context::{Context, Transfer};

use crate::error::{Error, Result};
use crate::options::Options;
use crate::scheduler::Scheduler;
use crate::stack::Stack;

/// Lifecycle state of a coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Running,
    Waiting,
    Compute,
    Done,
}

/// Wake event, set whenever a coroutine transitions WAITING -> READY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Wakeup,
    Cancel,
    Readable,
    Writable,
    Timeout,
    Join,
    Cond,
    PollErr,
    Disconnect,
}

/// Thrown (via `panic::panic_any`) to unwind a coroutine whose wake event
/// is `Cancel`. Never meant to cross a coroutine boundary as a real
/// error; `suspend`/`resume` recognize and swallow it.
struct Unwind;

fn next_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// The scheduler-owned representation of one coroutine. Every field is a
/// `Cell`/`UnsafeCell`: only one thread ever touches a live coroutine at
/// a time (its owning scheduler thread, or the compute thread currently
/// running its COMPUTE segment), so ordinary interior mutability is
/// enough; no lock is taken scheduler-locally.
pub(crate) struct Inner {
    pub id: u64,
    pub name: Option<String>,

    state: Cell<State>,
    event: Cell<Event>,
    deadline: Cell<Option<u32>>,
    budget: Cell<u32>,

    joiner: Cell<Option<Handle>>,

    /// Bumped every time this coroutine leaves WAITING, for any reason.
    /// Lets the scheduler tell a still-pending one-shot timer apart from
    /// a stale one left over from a wait the coroutine already left by
    /// some other event (or that it's since been destroyed after).
    timer_epoch: Cell<u64>,

    scheduler: Cell<*const Scheduler>,

    /// What the scheduler (or a compute worker) calls `.resume()` on to
    /// re-enter the coroutine. `None` only while the coroutine is
    /// actually running.
    entry_ctx: Cell<Option<Context>>,

    /// What the coroutine calls `.resume()` on to return control to
    /// whichever thread last resumed it. Populated on first entry and
    /// replaced on every subsequent suspend.
    return_ctx: Cell<Option<Context>>,

    stack: UnsafeCell<Option<Stack>>,
    body: UnsafeCell<Option<Box<dyn FnOnce() + Send>>>,
    exit: UnsafeCell<Option<Box<dyn FnOnce() + Send>>>,
    cls: UnsafeCell<Option<Box<dyn Any + Send>>>,
}

// Exactly one thread ever has a live access path into a running
// coroutine at a time (see module doc); cross-thread handoff (mailbox
// post, compute pool) is how that access moves between threads.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

/// A cheaply-cloneable reference to a coroutine. This is what schedulers
/// store in their ready/waiting lists and mailboxes, and what crosses
/// thread boundaries on a cross-thread post or a compute-pool handoff.
#[derive(Clone)]
pub struct Handle(pub(crate) Arc<Inner>);

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("state", &self.0.state.get())
            .finish()
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Handle {}

thread_local! {
    static CURRENT: Cell<Option<Handle>> = Cell::new(None);
}

fn encode_event(e: Event) -> usize {
    e as usize
}

fn decode_event(v: usize) -> Event {
    match v {
        0 => Event::Wakeup,
        1 => Event::Cancel,
        2 => Event::Readable,
        3 => Event::Writable,
        4 => Event::Timeout,
        5 => Event::Join,
        6 => Event::Cond,
        7 => Event::PollErr,
        _ => Event::Disconnect,
    }
}

extern "C" fn trampoline(t: Transfer) -> ! {
    let handle = CURRENT
        .with(|c| c.replace(None))
        .expect("coroutine trampoline entered without a handle installed by Handle::create");
    handle.0.return_ctx.set(Some(t.context));
    CURRENT.with(|c| c.set(Some(handle.clone())));

    let body =
        unsafe { (*handle.0.body.get()).take() }.expect("coroutine body already consumed");

    let result = panic::catch_unwind(AssertUnwindSafe(body));
    if let Err(payload) = result {
        if payload.downcast_ref::<Unwind>().is_none() {
            log::error!(
                "coroutine {} ({:?}) panicked: {}",
                handle.0.id,
                handle.0.name,
                describe_panic(&payload)
            );
        }
    }

    handle.0.state.set(State::Done);
    CURRENT.with(|c| c.set(None));

    let return_ctx = handle
        .0
        .return_ctx
        .take()
        .expect("return context missing at coroutine exit");
    // The coroutine never runs again past this point; the data we pass
    // back is ignored by the scheduler side of resume().
    let _ = return_ctx.resume(encode_event(Event::Wakeup));
    unreachable!("a finished coroutine's stack was resumed");
}

fn describe_panic(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

impl Handle {
    /// Create a coroutine on `sched` and enqueue it on its ready list
    /// (directly if called from `sched`'s own thread, otherwise via its
    /// cross-thread mailbox).
    pub fn create<F, E>(sched: &Scheduler, body: F, exit: E, opts: &Options) -> Result<Handle>
    where
        F: FnOnce() + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let stack = Stack::allocate(opts.stack_size).map_err(|_| Error::StackAlloc)?;
        let ctx = unsafe { Context::new(stack.context_stack(), trampoline) };

        let inner = Arc::new(Inner {
            id: next_id(),
            name: opts.name.clone(),
            state: Cell::new(State::Ready),
            event: Cell::new(Event::Wakeup),
            deadline: Cell::new(None),
            budget: Cell::new(0),
            joiner: Cell::new(None),
            timer_epoch: Cell::new(0),
            scheduler: Cell::new(sched as *const Scheduler),
            entry_ctx: Cell::new(Some(ctx)),
            return_ctx: Cell::new(None),
            stack: UnsafeCell::new(Some(stack)),
            body: UnsafeCell::new(Some(Box::new(body))),
            exit: UnsafeCell::new(Some(Box::new(exit))),
            cls: UnsafeCell::new(None),
        });

        let handle = Handle(inner);
        sched.enqueue_new(handle.clone());
        Ok(handle)
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn state(&self) -> State {
        self.0.state.get()
    }

    pub fn event(&self) -> Event {
        self.0.event.get()
    }

    pub(crate) fn scheduler_ptr(&self) -> *const Scheduler {
        self.0.scheduler.get()
    }

    pub(crate) fn budget(&self) -> u32 {
        self.0.budget.get()
    }

    pub(crate) fn set_budget(&self, n: u32) {
        self.0.budget.set(n);
    }

    pub(crate) fn decrement_budget(&self) -> u32 {
        let n = self.0.budget.get().saturating_sub(1);
        self.0.budget.set(n);
        n
    }

    pub(crate) fn deadline(&self) -> Option<u32> {
        self.0.deadline.get()
    }

    pub(crate) fn set_deadline(&self, secs: Option<u32>) {
        self.0.deadline.set(secs);
    }

    /// Bump and return this coroutine's timer epoch. Called both when
    /// arming a fresh one-shot timer and from every path that wakes the
    /// coroutine out of WAITING, so a `TimerEntry` captured under an
    /// older epoch is recognizable as stale once it fires.
    pub(crate) fn bump_timer_epoch(&self) -> u64 {
        let n = self.0.timer_epoch.get() + 1;
        self.0.timer_epoch.set(n);
        n
    }

    pub(crate) fn timer_epoch(&self) -> u64 {
        self.0.timer_epoch.get()
    }

    /// Decrement a positive deadline by one sweep tick; returns `true`
    /// if it just reached zero.
    pub(crate) fn tick_deadline(&self) -> bool {
        match self.0.deadline.get() {
            Some(0) | None => false,
            Some(n) => {
                let n = n - 1;
                self.0.deadline.set(Some(n));
                n == 0
            }
        }
    }

    /// Scheduler-only: resume this coroutine, delivering `event` as the
    /// reason it was woken (ignored on the very first resume, where the
    /// coroutine hasn't suspended yet and has no event to observe).
    pub(crate) fn resume(&self, event: Event) {
        self.0.state.set(State::Running);
        self.0.event.set(event);

        let previous = CURRENT.with(|c| c.replace(Some(self.clone())));
        let ctx = self
            .0
            .entry_ctx
            .take()
            .expect("resume called while coroutine already running");

        let Transfer { context, .. } = ctx.resume(encode_event(event));
        self.0.entry_ctx.set(Some(context));

        CURRENT.with(|c| c.set(previous));
    }

    /// Coroutine-self only: suspend with `new_state`, returning control
    /// to whichever thread most recently resumed this coroutine. When
    /// resumed again, returns the wake event that explains the resume —
    /// unless that event is `Cancel`, in which case this unwinds the
    /// coroutine's stack instead of returning at all.
    pub fn suspend(&self, new_state: State) -> Event {
        self.0.state.set(new_state);

        let return_ctx = self
            .0
            .return_ctx
            .take()
            .expect("suspend called outside a running coroutine");
        let Transfer { context, data } = return_ctx.resume(0);
        self.0.return_ctx.set(Some(context));

        let event = decode_event(data);
        self.0.event.set(event);
        if event == Event::Cancel {
            panic::panic_any(Unwind);
        }
        event
    }

    /// Current coroutine, if one is running on this thread.
    pub fn current() -> Option<Handle> {
        CURRENT.with(|c| {
            let h = c.take();
            let out = h.clone();
            c.set(h);
            out
        })
    }

    /// Cooperative yield: READY, then suspend. Returns once re-resumed
    /// in a later batch or tick.
    pub fn nice(&self) {
        self.suspend(State::Ready);
    }

    /// Arm a one-shot timer for `millis` milliseconds on the owning
    /// reactor, then suspend WAITING until it fires (or another wake
    /// reaches this coroutine first).
    pub fn wait(&self, millis: u64) -> Event {
        let sched = unsafe { &*self.scheduler_ptr() };
        sched.arm_timer(self.clone(), millis);
        self.suspend(State::Waiting)
    }

    /// Join another coroutine: returns immediately if it is already
    /// DONE, otherwise registers as its joiner and suspends until its
    /// `destroy` wakes us with `Event::Join`.
    pub fn join(&self, other: &Handle) {
        if other.state() == State::Done {
            return;
        }
        other.0.joiner.set(Some(self.clone()));
        self.suspend(State::Waiting);
    }

    /// Mark this coroutine for cancellation: wake=Cancel, state=Ready,
    /// enqueue on its scheduler (directly, or via mailbox if called from
    /// another thread). The unwind happens at the coroutine's next
    /// resume, not synchronously here.
    pub fn cancel(&self) {
        let sched = unsafe { &*self.scheduler_ptr() };
        sched.wakeup(self.clone(), Event::Cancel);
    }

    /// Wake a WAITING coroutine with the given event, moving it to
    /// READY.
    pub fn wakeup(&self, event: Event) {
        let sched = unsafe { &*self.scheduler_ptr() };
        sched.wakeup(self.clone(), event);
    }

    /// Scheduler-internal: set state=Ready/event without going back
    /// through `Scheduler::wakeup` (which is what calls this in the
    /// first place, while moving the handle between lists).
    pub(crate) fn wakeup_local(&self, event: Event) {
        self.0.state.set(State::Ready);
        self.0.event.set(event);
    }

    /// Suspend with COMPUTE; the owning scheduler hands this coroutine
    /// to the process-global compute pool, which resumes it on a worker
    /// thread.
    pub fn begin_compute(&self) {
        self.suspend(State::Compute);
    }

    /// Suspend back to READY from inside a COMPUTE segment; the compute
    /// worker posts this coroutine back to its owning scheduler's
    /// mailbox as `compute_done`.
    pub fn end_compute(&self) {
        self.suspend(State::Ready);
    }

    /// Access (or lazily initialize) this coroutine's coroutine-local
    /// storage. A separate heap allocation rather than a region carved
    /// out of the stack — an accepted simplification per the design
    /// notes on coroutine-control-block placement.
    pub fn cls_get_or_init<T, F>(&self, init: F) -> &T
    where
        T: Any + Send,
        F: FnOnce() -> T,
    {
        let slot = unsafe { &mut *self.0.cls.get() };
        if slot.is_none() {
            *slot = Some(Box::new(init()));
        }
        slot.as_deref()
            .unwrap()
            .downcast_ref::<T>()
            .expect("Cls() type mismatch: a coroutine's local storage may only hold one type")
    }

    /// Scheduler-only: wake this coroutine's joiner (if any) with
    /// `Event::Join`, invoke its exit callback, and release its stack.
    /// Invoked exactly once, after the coroutine observes DONE.
    pub(crate) fn destroy(&self) {
        if let Some(joiner) = self.0.joiner.take() {
            joiner.wakeup(Event::Join);
        }
        if let Some(exit) = unsafe { (*self.0.exit.get()).take() } {
            exit();
        }
        unsafe {
            *self.0.stack.get() = None;
        }
    }
}
