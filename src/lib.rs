//! Cooperative fibers and CSP-style channels for Rust.
//!
//! This library is a small concurrency substrate with two composable
//! primitives:
//!
//! - [Fibers](fiber): lightweight cooperative tasks multiplexed over a
//!   single host thread by a round-robin [`fiber::Scheduler`], with a
//!   condition-variable analog ([`fiber::Cond`]) whose waits yield instead
//!   of blocking the host.
//! - [Channels](fiber::channel): typed, bounded, with rendezvous
//!   semantics. A channel works between fibers on one thread, fibers on
//!   different threads, or bare threads with no scheduler at all; parked
//!   fibers yield while parked threads block, and neither side needs to
//!   know which kind of peer it wakes.
//!
//! [Cords](cord) tie the two scheduling models together: a cord is an OS
//! thread spawned with a fresh fiber scheduler pre-installed in its
//! per-thread [context slot](context). The context slots also reserve room
//! for the transceiver and waiting-manager of a request/response layer
//! built on top of this crate.
//!
//! ```
//! use std::sync::Arc;
//! use strand::fiber::{Channel, Scheduler};
//!
//! let sched = Scheduler::new();
//! let chan = Arc::new(Channel::new(0));
//!
//! let (sched2, chan2) = (sched.clone(), chan.clone());
//! sched.start(move || {
//!     let chan3 = chan2.clone();
//!     sched2.spawn(move || {
//!         let n: i32 = chan3.recv().expect("channel is open");
//!         chan3.send(n * n).expect("channel is open");
//!         Ok(())
//!     })?;
//!     chan2.send(2).expect("a receiver is parked");
//!     assert_eq!(chan2.recv(), Some(4));
//!     Ok(())
//! })?;
//! # Ok::<(), strand::Error>(())
//! ```

pub mod context;
pub mod cord;
pub mod error;
pub mod fiber;

pub use error::{Error, Result};
