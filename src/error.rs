//! Error handling utils.
//!
//! Channel operations never raise: a closed channel is reported through the
//! return value (`Err(SendError)`, `None`, `Err(TryRecvError::Disconnected)`).
//! Everything else in the crate funnels through [`Error`], and failures
//! returned from a fiber body re-emerge from [`Scheduler::start`].
//!
//! [`Scheduler::start`]: crate::fiber::Scheduler::start

use std::io;

/// A specialized [`Result`] type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////
// Error
////////////////////////////////////////////////////////////////////////////////

/// Represents all error cases for all routines of the crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The termination signal. A fiber body returns this when its owner is
    /// shutting down; the dispatch loop recognizes it and exits cleanly
    /// instead of propagating it to the caller of
    /// [`Scheduler::start`](crate::fiber::Scheduler::start).
    #[error("owner terminated")]
    OwnerTerminated,

    /// Spawning the backing thread for a fiber or a cord failed.
    #[error("io error: {0}")]
    IO(#[from] io::Error),

    /// This should only be used if the error doesn't fall into one of the
    /// above categories.
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps an arbitrary error in [`Error::Other`].
    pub fn other<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }
}
