//! Cords: OS threads hosting fiber schedulers.
//!
//! A *cord* is an OS thread with a fresh [`Scheduler`] pre-installed in
//! its [context slot](crate::context). Spawning cords is how the two
//! scheduling models compose: the host operating system preempts across
//! cords, while each cord multiplexes its own fibers cooperatively.
//!
//! ```no_run
//! use strand::{context, cord};
//!
//! let cord = cord::Builder::new().name("worker").spawn(|| {
//!     context::scheduler()
//!         .expect("installed by cord::spawn")
//!         .start(|| {
//!             // fiber code
//!             Ok(())
//!         })
//! })?;
//! cord.join()?;
//! # Ok::<(), strand::Error>(())
//! ```
//!
//! [`Scheduler`]: crate::fiber::Scheduler

use std::thread;

use crate::context;
use crate::error::Result;
use crate::fiber::Scheduler;

////////////////////////////////////////////////////////////////////////////////
// Builder
////////////////////////////////////////////////////////////////////////////////

/// Cord factory which can be used to configure the properties of the new
/// cord. Methods can be chained on it in order to configure it.
#[derive(Debug, Default)]
pub struct Builder {
    name: Option<String>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the cord-to-be (used as the OS thread name).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Starts a new OS thread which installs a fresh scheduler into its
    /// context slot, invokes `task`, and clears the slot on exit (normal
    /// or panicking).
    pub fn spawn<F>(self, task: F) -> Result<JoinHandle>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let name = self.name.unwrap_or_else(|| "<cord>".into());
        log::trace!("spawning cord {:?}", name);
        let inner = thread::Builder::new().name(name).spawn(move || {
            let _slot = SlotGuard::install();
            task()
        })?;
        Ok(JoinHandle { inner })
    }
}

/// Owns the cord's scheduler and keeps the context slot pointed at it for
/// the duration of the task. Dropping the guard clears the slot and drops
/// the scheduler, which cancels any fibers it still owns.
struct SlotGuard {
    _scheduler: Scheduler,
}

impl SlotGuard {
    fn install() -> Self {
        let scheduler = Scheduler::new();
        context::set_scheduler(Some(&scheduler));
        Self {
            _scheduler: scheduler,
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        context::set_scheduler(None);
    }
}

////////////////////////////////////////////////////////////////////////////////
// JoinHandle
////////////////////////////////////////////////////////////////////////////////

/// A handle to a spawned cord. Joining waits for the cord's task and
/// propagates its result; a panic in the task is resumed at the joiner.
pub struct JoinHandle {
    inner: thread::JoinHandle<Result<()>>,
}

impl JoinHandle {
    pub fn join(self) -> Result<()> {
        match self.inner.join() {
            Ok(result) => result,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Free functions
////////////////////////////////////////////////////////////////////////////////

/// Runs `task` synchronously on the caller. A trivial shell kept for
/// symmetry with [`Scheduler::start`](crate::fiber::Scheduler::start):
/// code written against "a scheduler" can treat the calling thread as one.
pub fn start<F>(task: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    task()
}

/// Spawns a cord with the default configuration. See [`Builder::spawn`].
pub fn spawn<F>(task: F) -> Result<JoinHandle>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    Builder::new().spawn(task)
}
