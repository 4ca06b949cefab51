//! Typed channels with CSP-style rendezvous semantics.
//!
//! A [`Channel`] brokers values of one type between producers and
//! consumers. It works whether its endpoints are fibers sharing one
//! thread, fibers across separate threads, or bare threads with no
//! scheduler at all: a parking fiber yields cooperatively (so sibling
//! fibers keep running), while a parking bare thread genuinely blocks on
//! an OS condition variable. Wakers never need to know which kind of
//! waiter they release.
//!
//! A channel of capacity 0 is a pure rendezvous point: send and receive
//! must pair up before either proceeds.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::context;
use crate::fiber::{self, Cond};

////////////////////////////////////////////////////////////////////////////////
// WaitContext
////////////////////////////////////////////////////////////////////////////////

/// Parks one sender or receiver across a channel operation.
///
/// The record carries the value in flight (a parked sender's offer, or a
/// waker's delivery to a parked receiver), an `aborted` flag set when the
/// waiter is released by [`Channel::close`] rather than by a peer, and the
/// parker matching the waiter's execution context.
struct WaitContext<T> {
    slot: Mutex<Option<T>>,
    aborted: AtomicBool,
    parker: Parker,
}

/// How a waiter surrenders control: fibers yield, bare threads block.
enum Parker {
    Fiber(Cond),
    Thread { woken: Mutex<bool>, cv: Condvar },
}

impl<T> WaitContext<T> {
    /// Builds a wait context for the calling execution context: a
    /// cooperative parker if the caller runs inside a fiber with a
    /// scheduler installed in the current thread's slot, an OS parker
    /// otherwise.
    fn for_caller(value: Option<T>) -> Arc<Self> {
        let parker = if fiber::current().is_some() && context::scheduler().is_some() {
            Parker::Fiber(Cond::new())
        } else {
            Parker::Thread {
                woken: Mutex::new(false),
                cv: Condvar::new(),
            }
        };
        Arc::new(Self {
            slot: Mutex::new(value),
            aborted: AtomicBool::new(false),
            parker,
        })
    }

    fn park(&self) {
        match &self.parker {
            Parker::Fiber(cond) => cond.wait(),
            Parker::Thread { woken, cv } => {
                let mut woken = woken.lock().unwrap();
                while !*woken {
                    woken = cv.wait(woken).unwrap();
                }
            }
        }
    }

    fn unpark(&self) {
        match &self.parker {
            Parker::Fiber(cond) => cond.signal(),
            Parker::Thread { woken, cv } => {
                *woken.lock().unwrap() = true;
                cv.notify_one();
            }
        }
    }

    fn put(&self, value: T) {
        *self.slot.lock().unwrap() = Some(value);
    }

    fn take(&self) -> Option<T> {
        self.slot.lock().unwrap().take()
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }
}

////////////////////////////////////////////////////////////////////////////////
// Channel
////////////////////////////////////////////////////////////////////////////////

/// A bounded FIFO channel with rendezvous fallback.
///
/// All state lives under one mutex. When an operation cannot complete
/// against the buffer or an already-parked peer, the caller parks on a
/// wait context appended to the matching waiter queue; waiters are
/// released in FIFO order. Notification happens after the mutex is
/// released, so a woken party never contends with its waker.
///
/// The only error condition is "channel closed". A send into a full,
/// not-yet-closed channel with no receivers blocks indefinitely; that
/// starvation hazard is intentional, and [`try_recv`](Self::try_recv) is
/// the only non-blocking path.
pub struct Channel<T> {
    state: Mutex<ChannelState<T>>,
}

struct ChannelState<T> {
    closed: bool,
    capacity: usize,
    buffer: VecDeque<T>,
    send_waiters: VecDeque<Arc<WaitContext<T>>>,
    recv_waiters: VecDeque<Arc<WaitContext<T>>>,
}

impl<T> Channel<T> {
    /// Creates a channel holding at most `capacity` buffered values.
    /// Capacity 0 means pure rendezvous.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(ChannelState {
                closed: false,
                capacity,
                buffer: VecDeque::with_capacity(capacity),
                send_waiters: VecDeque::new(),
                recv_waiters: VecDeque::new(),
            }),
        }
    }

    /// Sends a message over the channel.
    ///
    /// Completes synchronously when a receiver is already parked or the
    /// buffer has room; otherwise parks until a receiver (or
    /// [`close`](Self::close)) releases the caller. A fiber parks by
    /// yielding, a bare thread by blocking.
    ///
    /// On a closed channel the value is handed back, so the caller has an
    /// option to reuse it. A sender parked at close time gets its value
    /// back the same way.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(SendError(value));
        }
        if let Some(waiter) = state.recv_waiters.pop_front() {
            waiter.put(value);
            drop(state);
            waiter.unpark();
            return Ok(());
        }
        if state.buffer.len() < state.capacity {
            state.buffer.push_back(value);
            return Ok(());
        }
        let ctx = WaitContext::for_caller(Some(value));
        state.send_waiters.push_back(ctx.clone());
        drop(state);
        ctx.park();
        if ctx.is_aborted() {
            let value = ctx.take().expect("aborted sender keeps its value");
            return Err(SendError(value));
        }
        Ok(())
    }

    /// Receives a message from the channel, or `None` if the channel is
    /// (or becomes) closed.
    ///
    /// Completes synchronously when a sender is already parked or the
    /// buffer is non-empty; otherwise parks until a sender (or
    /// [`close`](Self::close)) releases the caller.
    pub fn recv(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return None;
        }
        if let Some(waiter) = state.send_waiters.pop_front() {
            let value = waiter.take().expect("parked sender carries a value");
            drop(state);
            waiter.unpark();
            return Some(value);
        }
        if let Some(value) = state.buffer.pop_front() {
            return Some(value);
        }
        let ctx = WaitContext::for_caller(None);
        state.recv_waiters.push_back(ctx.clone());
        drop(state);
        ctx.park();
        // The slot is empty exactly when close() released us.
        ctx.take()
    }

    /// Like [`recv`](Self::recv), but never parks: an empty open channel
    /// reports [`TryRecvError::Empty`] instead.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(TryRecvError::Disconnected);
        }
        if let Some(waiter) = state.send_waiters.pop_front() {
            let value = waiter.take().expect("parked sender carries a value");
            drop(state);
            waiter.unpark();
            return Ok(value);
        }
        if let Some(value) = state.buffer.pop_front() {
            return Ok(value);
        }
        Err(TryRecvError::Empty)
    }

    /// Closes the channel: discards buffered values and releases every
    /// parked sender and receiver, in FIFO order (receivers first).
    /// Subsequent sends and receives fail immediately. Closing an
    /// already-closed channel is a no-op.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.closed = true;
        let mut released: Vec<Arc<WaitContext<T>>> =
            Vec::with_capacity(state.recv_waiters.len() + state.send_waiters.len());
        released.extend(state.recv_waiters.drain(..));
        state.buffer.clear();
        released.extend(state.send_waiters.drain(..));
        drop(state);
        if !released.is_empty() {
            log::debug!("channel closed with {} parked waiters", released.len());
        }
        for ctx in &released {
            ctx.abort();
        }
        for ctx in &released {
            ctx.unpark();
        }
    }

    /// Whether [`close`](Self::close) has been called. Monotonic.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// The number of values currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().capacity
    }

    /// A blocking iterator over received values, ending when the channel
    /// is closed.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { chan: self }
    }

    /// A non-blocking iterator, ending when the channel is empty or
    /// closed.
    pub fn try_iter(&self) -> TryIter<'_, T> {
        TryIter { chan: self }
    }
}

impl<T> Drop for Channel<T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if let Ok(state) = self.state.get_mut() {
            // A parked waiter at this point would never be woken.
            debug_assert!(
                state.send_waiters.is_empty() && state.recv_waiters.is_empty(),
                "channel dropped with parked waiters"
            );
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Iterators
////////////////////////////////////////////////////////////////////////////////

pub struct Iter<'a, T: 'a> {
    chan: &'a Channel<T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.chan.recv()
    }
}

impl<'a, T> IntoIterator for &'a Channel<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

pub struct TryIter<'a, T: 'a> {
    chan: &'a Channel<T>,
}

impl<'a, T> Iterator for TryIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.chan.try_recv().ok()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////

/// Returned from [`Channel::send`] on a closed channel; hands the
/// unsendable value back to the caller.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sending on a closed channel")
    }
}

impl<T> std::error::Error for SendError<T> {}

#[derive(Debug, PartialEq, Eq, Clone, Copy, thiserror::Error)]
pub enum TryRecvError {
    #[error("receiving on an empty channel")]
    Empty,
    #[error("receiving on a closed channel")]
    Disconnected,
}
