//! Per-thread context slots.
//!
//! Every OS thread carries three slots: the currently installed
//! [`Scheduler`] plus two opaque slots (a transceiver and a waiting
//! manager) reserved for the request/response layer built on top of this
//! crate. The core itself never reads the reserved slots; it only
//! guarantees that their lifetime equals the lifetime of the thread.
//!
//! The scheduler slot is what lets [`Channel`](crate::fiber::Channel)
//! operations tell fibers from bare threads: a caller with no scheduler in
//! its slot gets OS-level blocking primitives instead of cooperative ones.
//!
//! The slot does not own the scheduler. The installer keeps its own handle
//! and is responsible for teardown; a slot left pointing at a scheduler
//! that was dropped simply reads back as `None`.
//!
//! [`Scheduler`]: crate::fiber::Scheduler

use std::any::Any;
use std::cell::RefCell;

use crate::fiber::{Scheduler, WeakScheduler};

thread_local! {
    static SCHEDULER: RefCell<Option<WeakScheduler>> = RefCell::new(None);
    static TRANSCEIVER: RefCell<Option<Box<dyn Any>>> = RefCell::new(None);
    static WAITING_MANAGER: RefCell<Option<Box<dyn Any>>> = RefCell::new(None);
}

/// Returns a handle to the scheduler installed in the calling thread's
/// slot, or `None` if no scheduler is installed (a "bare" thread) or the
/// installed scheduler has since been dropped.
pub fn scheduler() -> Option<Scheduler> {
    SCHEDULER.with(|slot| slot.borrow().as_ref().and_then(WeakScheduler::upgrade))
}

/// Installs `scheduler` into the calling thread's slot, replacing whatever
/// was there. Passing `None` clears the slot.
pub fn set_scheduler(scheduler: Option<&Scheduler>) {
    SCHEDULER.with(|slot| *slot.borrow_mut() = scheduler.map(Scheduler::downgrade));
}

/// Installs an already-downgraded handle. Used by fiber entry functions,
/// which must not keep their scheduler alive.
pub(crate) fn install_weak_scheduler(scheduler: WeakScheduler) {
    SCHEDULER.with(|slot| *slot.borrow_mut() = Some(scheduler));
}

/// Takes the value out of the calling thread's transceiver slot.
pub fn take_transceiver() -> Option<Box<dyn Any>> {
    TRANSCEIVER.with(|slot| slot.borrow_mut().take())
}

/// Stores `value` in the calling thread's transceiver slot, returning the
/// previous occupant. The core never touches this slot.
pub fn set_transceiver(value: Option<Box<dyn Any>>) -> Option<Box<dyn Any>> {
    TRANSCEIVER.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), value))
}

/// Takes the value out of the calling thread's waiting-manager slot.
pub fn take_waiting_manager() -> Option<Box<dyn Any>> {
    WAITING_MANAGER.with(|slot| slot.borrow_mut().take())
}

/// Stores `value` in the calling thread's waiting-manager slot, returning
/// the previous occupant. The core never touches this slot.
pub fn set_waiting_manager(value: Option<Box<dyn Any>>) -> Option<Box<dyn Any>> {
    WAITING_MANAGER.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), value))
}
