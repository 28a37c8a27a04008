//! Error types surfaced by the public facade.

use std::io;

use thiserror::Error;

/// Errors produced by the server's public operations.
///
/// Most operations on a vacant fd do not return `Err`; they return a
/// sentinel (`-1`/`None`) per the C-style facade this crate mirrors. This
/// type instead covers the handful of cases that are genuine failures:
/// bind/listen, capacity exhaustion, a full task queue, and fatal I/O.
#[derive(Debug, Error)]
pub enum Error {
    /// The listening socket could not be bound or put into listen mode.
    #[error("failed to bind/listen: {0}")]
    BindFailed(#[source] io::Error),

    /// The connection table has no free slot for a new fd.
    #[error("connection table is at capacity")]
    CapacityExhausted,

    /// The operation targeted an fd that is not currently managed.
    #[error("fd is not an active connection")]
    VacantFd,

    /// The bounded task queue rejected an enqueue because it is full.
    #[error("task queue is full")]
    QueueFull,

    /// A read/write hook, or the underlying socket, reported a fatal error.
    #[error("fatal connection I/O: {0}")]
    Io(#[source] io::Error),

    /// Raising or reading `RLIMIT_NOFILE` failed.
    #[error("failed to query/raise the open file descriptor limit: {0}")]
    Rlimit(#[source] io::Error),
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(value)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
