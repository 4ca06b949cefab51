//! Cooperative multitasking module.
//!
//! With the fiber module, you can:
//! - create and run [fibers](struct.Scheduler.html) multiplexed over a
//!   single host thread with a round-robin [`Scheduler`],
//! - use a synchronization mechanism for fibers, similar to "condition
//!   variables" and similar to operating-system functions such as
//!   `pthread_cond_wait()` plus `pthread_cond_signal()` (see [`Cond`]),
//! - exchange typed messages between fibers or threads (see [`channel`]).
//!
//! A fiber is a set of instructions which are executed with cooperative
//! multitasking: control is surrendered only at explicit yield points
//! ([`yield_now`], [`Cond::wait`], a parking channel operation, [`sleep`],
//! [`Scheduler::spawn`]). Each fiber is backed by a dedicated OS thread
//! with its own stack; a handshake between the host and the fiber makes
//! sure exactly one of them runs at any moment, so the scheduler's fibers
//! still behave as a single-threaded cooperative group.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crate::context;
use crate::error::{Error, Result};

pub mod channel;

pub use channel::{Channel, SendError, TryRecvError};

/// Default stack size for a new fiber's backing thread.
pub const DEFAULT_STACK_SIZE: usize = 4 << 20;

////////////////////////////////////////////////////////////////////////////////
// State
////////////////////////////////////////////////////////////////////////////////

/// A fiber has four possible states. It is **ready** after construction
/// and before its first resume, **running** while it executes on the host,
/// **suspended** while it is parked at a yield point, and **terminated**
/// once its body has returned (or unwound).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Running,
    Suspended,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Host,
    Fiber,
}

/// What a fiber body left behind when it terminated.
enum Outcome {
    Finished,
    Failed(Error),
    Panicked(Box<dyn Any + Send>),
}

/// Result of resuming a fiber: it either yielded back or terminated.
/// Failures are carried as values, never unwound into the dispatcher.
enum Resume {
    Yielded,
    Finished,
    Failed(Error),
    Panicked(Box<dyn Any + Send>),
}

/// Unwind payload used to cancel a fiber at its next yield point.
struct CancelFiber;

type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

////////////////////////////////////////////////////////////////////////////////
// FiberCore
////////////////////////////////////////////////////////////////////////////////

/// Shared state of the host/fiber handshake. `flow.turn` says whose move
/// it is; whoever does not hold the turn waits on `cv`.
struct FiberCore {
    name: String,
    flow: Mutex<Flow>,
    cv: Condvar,
}

struct Flow {
    turn: Turn,
    state: State,
    cancelled: bool,
    /// Context switches into this fiber, see [`csw`].
    switches: u64,
    outcome: Option<Outcome>,
}

impl FiberCore {
    /// Runs the fiber until it next yields or terminates. Must only be
    /// called while the fiber is ready or suspended.
    fn resume(&self) -> Resume {
        let mut flow = self.flow.lock().unwrap();
        debug_assert!(flow.state == State::Ready || flow.state == State::Suspended);
        flow.turn = Turn::Fiber;
        flow.state = State::Running;
        flow.switches += 1;
        self.cv.notify_all();
        while flow.turn == Turn::Fiber {
            flow = self.cv.wait(flow).unwrap();
        }
        match flow.state {
            State::Suspended => Resume::Yielded,
            State::Terminated => match flow.outcome.take() {
                Some(Outcome::Failed(e)) => Resume::Failed(e),
                Some(Outcome::Panicked(payload)) => Resume::Panicked(payload),
                Some(Outcome::Finished) | None => Resume::Finished,
            },
            state => unreachable!("fiber handed control back while {:?}", state),
        }
    }

    fn state(&self) -> State {
        self.flow.lock().unwrap().state
    }

    fn switches(&self) -> u64 {
        self.flow.lock().unwrap().switches
    }
}

thread_local! {
    /// The fiber currently executing on this thread, if any. Set for the
    /// whole lifetime of a fiber body by [`fiber_main`].
    static CURRENT: RefCell<Option<Arc<FiberCore>>> = RefCell::new(None);
}

/// Entry function of a fiber's backing thread.
fn fiber_main(core: Arc<FiberCore>, scheduler: WeakScheduler, task: Task) {
    // Wait for the first resume (or for cancellation of a fiber that was
    // never started).
    {
        let mut flow = core.flow.lock().unwrap();
        while flow.turn != Turn::Fiber {
            flow = core.cv.wait(flow).unwrap();
        }
        if flow.cancelled {
            flow.state = State::Terminated;
            flow.turn = Turn::Host;
            core.cv.notify_all();
            return;
        }
    }

    // The fiber body runs on this thread, so the owning scheduler must be
    // visible in this thread's context slot.
    context::install_weak_scheduler(scheduler);
    CURRENT.with(|current| *current.borrow_mut() = Some(core.clone()));

    let result = panic::catch_unwind(AssertUnwindSafe(move || task()));

    CURRENT.with(|current| *current.borrow_mut() = None);
    let outcome = match result {
        Ok(Ok(())) => Outcome::Finished,
        Ok(Err(e)) => Outcome::Failed(e),
        Err(payload) if payload.is::<CancelFiber>() => Outcome::Finished,
        Err(payload) => Outcome::Panicked(payload),
    };

    let mut flow = core.flow.lock().unwrap();
    flow.state = State::Terminated;
    flow.outcome = Some(outcome);
    flow.turn = Turn::Host;
    core.cv.notify_all();
}

////////////////////////////////////////////////////////////////////////////////
// Fiber
////////////////////////////////////////////////////////////////////////////////

/// An owned fiber, held by its scheduler's ready list. Dropping a live
/// fiber cancels it: the next yield point unwinds its stack and the
/// backing thread is joined.
struct Fiber {
    core: Arc<FiberCore>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Fiber {
    fn new(name: String, stack_size: usize, scheduler: WeakScheduler, task: Task) -> Result<Self> {
        let core = Arc::new(FiberCore {
            name: name.clone(),
            flow: Mutex::new(Flow {
                turn: Turn::Host,
                state: State::Ready,
                cancelled: false,
                switches: 0,
                outcome: None,
            }),
            cv: Condvar::new(),
        });
        let thread = thread::Builder::new()
            .name(name)
            .stack_size(stack_size)
            .spawn({
                let core = core.clone();
                move || fiber_main(core, scheduler, task)
            })?;
        Ok(Self {
            core,
            thread: Some(thread),
        })
    }

    fn handle(&self) -> FiberHandle {
        FiberHandle {
            core: self.core.clone(),
        }
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        {
            let mut flow = self.core.flow.lock().unwrap();
            if flow.state != State::Terminated {
                log::trace!("cancelling fiber {:?}", self.core.name);
                flow.cancelled = true;
                flow.turn = Turn::Fiber;
                self.core.cv.notify_all();
            }
        }
        if let Some(thread) = self.thread.take() {
            // Reclaims the fiber's stack. The thread either already
            // terminated or is unwinding after the cancellation above.
            let _ = thread.join();
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// FiberHandle
////////////////////////////////////////////////////////////////////////////////

/// A non-owning handle to a fiber, returned by [`Scheduler::spawn`].
///
/// The handle observes the fiber; it does not keep it alive and it cannot
/// cancel it. Use it to query the fiber's [`state`](Self::state) or to
/// [`join`](Self::join) it from a sibling fiber.
#[derive(Clone)]
pub struct FiberHandle {
    core: Arc<FiberCore>,
}

impl FiberHandle {
    /// The name the fiber was built with.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn state(&self) -> State {
        self.core.state()
    }

    /// Yields until the fiber terminates.
    ///
    /// This is cooperative: it must be called from another fiber of the
    /// same scheduler (while the dispatch loop is running), otherwise
    /// there is nothing to advance the joined fiber and this call spins.
    pub fn join(self) {
        debug_assert!(
            current().map_or(true, |cur| !Arc::ptr_eq(&cur.core, &self.core)),
            "a fiber cannot join itself"
        );
        while self.state() != State::Terminated {
            yield_now();
        }
    }
}

impl fmt::Debug for FiberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("name", &self.core.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Builder
////////////////////////////////////////////////////////////////////////////////

/// Fiber factory which can be used to configure the properties of the new
/// fiber.
///
/// Methods can be chained on it in order to configure it. The configured
/// builder is passed to [`Scheduler::spawn_with`].
///
/// The currently supported configurations are:
///
/// * `name`:       specifies an associated name for the fiber
/// * `stack_size`: specifies the desired stack size for the fiber
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl Builder {
    /// Generates the base configuration for spawning a fiber, from which
    /// configuration methods can be chained.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the fiber-to-be.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the size of the stack (in bytes) for the new fiber.
    pub fn stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }
}

////////////////////////////////////////////////////////////////////////////////
// Scheduler
////////////////////////////////////////////////////////////////////////////////

/// A round-robin scheduler of fibers, pinned to the host thread that calls
/// [`start`](Self::start).
///
/// The handle is cheaply clonable; all clones refer to the same scheduler.
/// Dropping the last handle cancels any fibers that are still alive and
/// reclaims their stacks.
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<SchedulerCore>,
}

/// A non-owning scheduler handle, as stored in the per-thread context
/// slot. See [`context::set_scheduler`](crate::context::set_scheduler).
#[derive(Clone)]
pub struct WeakScheduler {
    inner: Weak<SchedulerCore>,
}

impl WeakScheduler {
    pub fn upgrade(&self) -> Option<Scheduler> {
        self.inner.upgrade().map(|inner| Scheduler { inner })
    }
}

#[derive(Default)]
struct SchedulerCore {
    ready: Mutex<ReadyList>,
    terminated: AtomicBool,
    dispatching: AtomicBool,
}

#[derive(Default)]
struct ReadyList {
    fibers: Vec<Fiber>,
    /// Index of the next fiber to resume. Invariant: `pos < fibers.len()`
    /// whenever the list is non-empty.
    pos: usize,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakScheduler {
        WeakScheduler {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Creates the first fiber wrapping `task` and enters the dispatch
    /// loop, returning when the loop exits.
    ///
    /// A nested `start` on an already-dispatching scheduler is a no-op
    /// returning `Ok(())`.
    ///
    /// An error returned from a fiber body re-emerges here, except
    /// [`Error::OwnerTerminated`] which exits the loop cleanly (remaining
    /// fibers are left unresumed). A panic in a fiber body is resumed at
    /// this call site.
    pub fn start<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        if self.inner.dispatching.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _guard = DispatchGuard(&self.inner.dispatching);
        self.insert(Builder::new(), Box::new(task))?;
        self.dispatch()
    }

    /// Creates a new fiber for `task`, appends it to the ready list, then
    /// yields, giving the newcomer a prompt chance to begin. The yield is
    /// a no-op when called from outside any fiber (e.g. before `start`).
    pub fn spawn<F>(&self, task: F) -> Result<FiberHandle>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.spawn_with(Builder::new(), task)
    }

    /// Like [`spawn`](Self::spawn), with an explicit fiber configuration.
    pub fn spawn_with<F>(&self, builder: Builder, task: F) -> Result<FiberHandle>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let handle = self.insert(builder, Box::new(task))?;
        yield_now();
        Ok(handle)
    }

    /// Requests termination of the dispatch loop. Cooperative: the flag is
    /// observed between dispatch iterations, never mid-fiber. The flag is
    /// monotonic, a stopped scheduler stays stopped.
    pub fn stop(&self) {
        self.inner.terminated.store(true, Ordering::Release);
    }

    /// Constructs a condition variable for fibers of this scheduler.
    pub fn cond(&self) -> Cond {
        Cond::new()
    }

    fn insert(&self, builder: Builder, task: Task) -> Result<FiberHandle> {
        let name = builder.name.unwrap_or_else(|| "<fiber>".into());
        let stack_size = builder.stack_size.unwrap_or(DEFAULT_STACK_SIZE);
        log::trace!("spawning fiber {:?}", name);
        let fiber = Fiber::new(name, stack_size, self.downgrade(), task)?;
        let handle = fiber.handle();
        self.inner.ready.lock().unwrap().fibers.push(fiber);
        Ok(handle)
    }

    /// The dispatch loop: strict round-robin over the ready list, in
    /// insertion order, until the list drains or `stop` is observed.
    fn dispatch(&self) -> Result<()> {
        log::trace!("dispatch loop entered");
        loop {
            if self.inner.terminated.load(Ordering::Acquire) {
                break;
            }
            let core = {
                let ready = self.inner.ready.lock().unwrap();
                if ready.fibers.is_empty() {
                    break;
                }
                debug_assert!(ready.pos < ready.fibers.len());
                ready.fibers[ready.pos].core.clone()
            };
            match core.resume() {
                Resume::Yielded => {
                    let mut ready = self.inner.ready.lock().unwrap();
                    ready.pos += 1;
                    if ready.pos >= ready.fibers.len() {
                        ready.pos = 0;
                    }
                }
                Resume::Finished => {
                    log::trace!("fiber {:?} terminated", core.name);
                    self.remove_current();
                }
                Resume::Failed(Error::OwnerTerminated) => {
                    log::trace!("fiber {:?} observed owner termination", core.name);
                    self.remove_current();
                    break;
                }
                Resume::Failed(e) => {
                    log::debug!("fiber {:?} failed: {}", core.name, e);
                    self.remove_current();
                    return Err(e);
                }
                Resume::Panicked(payload) => {
                    log::debug!("fiber {:?} panicked", core.name);
                    self.remove_current();
                    panic::resume_unwind(payload);
                }
            }
        }
        log::trace!("dispatch loop exited");
        Ok(())
    }

    /// Removes the fiber at `pos` from the ready list, in the iteration
    /// step that observed its termination.
    fn remove_current(&self) {
        let mut ready = self.inner.ready.lock().unwrap();
        let pos = ready.pos;
        ready.fibers.remove(pos);
        if ready.pos >= ready.fibers.len() {
            ready.pos = 0;
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

/// Resets the `dispatching` flag however the dispatch loop exits,
/// including by unwinding.
struct DispatchGuard<'a>(&'a AtomicBool);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

////////////////////////////////////////////////////////////////////////////////
// Free functions
////////////////////////////////////////////////////////////////////////////////

/// Returns a handle to the fiber currently executing on this thread, or
/// `None` when called from outside any fiber.
pub fn current() -> Option<FiberHandle> {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .map(|core| FiberHandle { core: core.clone() })
    })
}

/// Suspends the currently running fiber and returns control to its
/// scheduler. A no-op when called from outside any fiber, or while the
/// calling fiber is unwinding.
pub fn yield_now() {
    let core = match CURRENT.with(|current| current.borrow().clone()) {
        Some(core) => core,
        None => return,
    };
    if thread::panicking() {
        return;
    }
    let mut flow = core.flow.lock().unwrap();
    if flow.cancelled {
        drop(flow);
        panic::resume_unwind(Box::new(CancelFiber));
    }
    flow.state = State::Suspended;
    flow.turn = Turn::Host;
    core.cv.notify_all();
    while flow.turn == Turn::Host {
        flow = core.cv.wait(flow).unwrap();
    }
    let cancelled = flow.cancelled;
    flow.state = State::Running;
    drop(flow);
    if cancelled {
        panic::resume_unwind(Box::new(CancelFiber));
    }
}

/// Puts the current fiber to sleep for at least `timeout`, yielding so
/// that sibling fibers keep running. On a bare thread this simply blocks.
pub fn sleep(timeout: Duration) {
    if current().is_none() {
        thread::sleep(timeout);
        return;
    }
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        yield_now();
    }
}

/// Returns the number of context switches into the calling fiber, or 0
/// when called from outside any fiber.
///
/// Mostly used for testing, see [`check_yield`].
pub fn csw() -> u64 {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .map(|core| core.switches())
            .unwrap_or(0)
    })
}

/// Calls a function and checks whether the calling fiber yielded.
///
/// It's mostly useful in tests.
pub fn check_yield<F, T>(f: F) -> YieldResult<T>
where
    F: FnOnce() -> T,
{
    let csw_before = csw();
    let res = f();
    if csw() == csw_before {
        YieldResult::DidntYield(res)
    } else {
        YieldResult::Yielded(res)
    }
}

/// Possible [`check_yield`] results.
#[derive(Debug, PartialEq, Eq)]
pub enum YieldResult<T> {
    /// The function didn't yield.
    DidntYield(T),
    /// The function did yield.
    Yielded(T),
}

////////////////////////////////////////////////////////////////////////////////
// Cond
////////////////////////////////////////////////////////////////////////////////

/// Conditional variable for cooperative multitasking (fibers).
///
/// A cond (short for "condition variable") is a synchronization primitive
/// that allows fibers to yield until some predicate is satisfied. Fiber
/// conditions have two basic operations, [`wait`](Self::wait) and
/// [`signal`](Self::signal): `wait` suspends execution of the fiber (i.e.
/// yields) until `signal` is called, and never blocks the host thread.
///
/// The notification flag is atomic, so a `Cond` may be signalled from
/// another host thread (e.g. a bare thread waking a fiber). Waiting,
/// however, is cooperative: on a bare thread, where yielding is a no-op,
/// `wait` degenerates to spinning. Bare threads should use OS primitives
/// instead.
#[derive(Debug, Default)]
pub struct Cond {
    notified: AtomicBool,
}

impl Cond {
    /// Instantiate a new fiber cond object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake up a waiter: set the flag and yield once, giving it a prompt
    /// chance to observe the notification.
    pub fn signal(&self) {
        self.notified.store(true, Ordering::Release);
        yield_now();
    }

    /// Equivalent to [`signal`](Self::signal): the flag is a single
    /// boolean and the first waiter to observe it consumes it, so only one
    /// waiter is released. This is a known limitation inherited from the
    /// single-flag design.
    pub fn broadcast(&self) {
        self.signal();
    }

    /// Suspends the current fiber (i.e. yields) until
    /// [`signal`](Self::signal) is called, consuming the notification.
    pub fn wait(&self) {
        while !self.notified.swap(false, Ordering::AcqRel) {
            yield_now();
        }
    }

    /// Like [`wait`](Self::wait), but gives up once the monotonic clock
    /// passes the deadline. Returns whether the notification arrived
    /// before the deadline. The flag is left reset either way.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.notified.swap(false, Ordering::AcqRel) {
            if Instant::now() >= deadline {
                self.notified.store(false, Ordering::Release);
                return false;
            }
            yield_now();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn start_runs_to_completion() {
        let sched = Scheduler::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        sched
            .start(move || {
                flag.store(true, Ordering::Relaxed);
                Ok(())
            })
            .unwrap();
        assert!(ran.load(Ordering::Relaxed));
    }

    #[test]
    fn round_robin_order() {
        let sched = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let order = order.clone();
            sched
                .spawn(move || {
                    for _ in 0..3 {
                        order.lock().unwrap().push(tag);
                        yield_now();
                    }
                    Ok(())
                })
                .unwrap();
        }
        let order2 = order.clone();
        sched
            .start(move || {
                order2.lock().unwrap().push("c");
                Ok(())
            })
            .unwrap();
        // Strict round-robin in insertion order: a b c a b a b.
        assert_eq!(
            *order.lock().unwrap(),
            vec!["a", "b", "c", "a", "b", "a", "b"]
        );
    }

    #[test]
    fn spawn_gives_newcomer_a_prompt_chance() {
        let sched = Scheduler::new();
        let sched2 = sched.clone();
        let steps = Arc::new(Mutex::new(Vec::new()));
        let steps2 = steps.clone();
        sched
            .start(move || {
                let steps3 = steps2.clone();
                sched2.spawn(move || {
                    steps3.lock().unwrap().push("spawned");
                    Ok(())
                })?;
                steps2.lock().unwrap().push("spawner");
                Ok(())
            })
            .unwrap();
        assert_eq!(*steps.lock().unwrap(), vec!["spawned", "spawner"]);
    }

    #[test]
    fn nested_start_is_a_noop() {
        let sched = Scheduler::new();
        let sched2 = sched.clone();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        sched
            .start(move || {
                let ran3 = ran2.clone();
                sched2.start(move || {
                    ran3.store(true, Ordering::Relaxed);
                    Ok(())
                })?;
                assert!(!ran2.load(Ordering::Relaxed));
                Ok(())
            })
            .unwrap();
        assert!(!ran.load(Ordering::Relaxed));
    }

    #[test]
    fn owner_terminated_exits_cleanly() {
        let sched = Scheduler::new();
        let ran = Arc::new(AtomicBool::new(false));
        sched.spawn(|| Err(Error::OwnerTerminated)).unwrap();
        let ran2 = ran.clone();
        sched
            .spawn(move || {
                ran2.store(true, Ordering::Relaxed);
                Ok(())
            })
            .unwrap();
        sched.start(|| Ok(())).unwrap();
        // The loop broke before the second fiber was resumed.
        assert!(!ran.load(Ordering::Relaxed));
    }

    #[test]
    fn other_errors_reemerge_from_start() {
        let sched = Scheduler::new();
        let res = sched.start(|| Err(Error::other("boom")));
        assert!(matches!(res, Err(Error::Other(_))));
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn panics_reemerge_from_start() {
        let sched = Scheduler::new();
        let _ = sched.start(|| panic!("boom"));
    }

    #[test]
    fn stop_is_observed_between_iterations() {
        let sched = Scheduler::new();
        let sched2 = sched.clone();
        let parked = Arc::new(AtomicBool::new(false));
        let parked2 = parked.clone();
        sched
            .spawn(move || {
                Cond::new().wait();
                parked2.store(true, Ordering::Relaxed);
                Ok(())
            })
            .unwrap();
        sched
            .start(move || {
                sched2.stop();
                Ok(())
            })
            .unwrap();
        // The parked fiber was left unresumed; dropping the scheduler
        // cancels it and joins its backing thread.
        assert!(!parked.load(Ordering::Relaxed));
        drop(sched);
    }

    #[test]
    fn join_waits_for_sibling() {
        let sched = Scheduler::new();
        let sched2 = sched.clone();
        sched
            .start(move || {
                let worker = sched2.spawn_with(Builder::new().name("worker"), || {
                    for _ in 0..5 {
                        yield_now();
                    }
                    Ok(())
                })?;
                assert_eq!(worker.name(), "worker");
                worker.join();
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn check_yield_distinguishes_yields() {
        let sched = Scheduler::new();
        sched
            .start(|| {
                assert_eq!(check_yield(|| ()), YieldResult::DidntYield(()));
                assert_eq!(check_yield(yield_now), YieldResult::Yielded(()));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn yield_now_outside_fiber_is_a_noop() {
        yield_now();
        assert_eq!(csw(), 0);
    }

    #[test]
    fn cond_signal_wakes_waiter() {
        let sched = Scheduler::new();
        let sched2 = sched.clone();
        let cond = Arc::new(Cond::new());
        let woken = Arc::new(AtomicBool::new(false));
        let (cond2, woken2) = (cond.clone(), woken.clone());
        sched
            .start(move || {
                let (cond3, woken3) = (cond2.clone(), woken2.clone());
                sched2.spawn(move || {
                    cond3.wait();
                    woken3.store(true, Ordering::Relaxed);
                    Ok(())
                })?;
                yield_now();
                assert!(!woken2.load(Ordering::Relaxed));
                cond2.signal();
                while !woken2.load(Ordering::Relaxed) {
                    yield_now();
                }
                Ok(())
            })
            .unwrap();
        assert!(woken.load(Ordering::Relaxed));
    }

    #[test]
    fn cond_wait_timeout_expires() {
        let sched = Scheduler::new();
        sched
            .start(|| {
                let cond = Cond::new();
                assert!(!cond.wait_timeout(Duration::from_millis(10)));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn cond_signalled_before_wait_timeout() {
        let sched = Scheduler::new();
        sched
            .start(|| {
                let cond = Cond::new();
                cond.signal();
                assert!(cond.wait_timeout(Duration::from_secs(60)));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn csw_counts_resumes() {
        let sched = Scheduler::new();
        let counts = Arc::new(AtomicU32::new(0));
        let counts2 = counts.clone();
        sched
            .start(move || {
                let before = csw();
                yield_now();
                yield_now();
                counts2.store((csw() - before) as u32, Ordering::Relaxed);
                Ok(())
            })
            .unwrap();
        assert_eq!(counts.load(Ordering::Relaxed), 2);
    }
}
