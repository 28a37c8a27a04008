//! The readiness reactor: a thin, thread-safe wrapper over an OS readiness
//! primitive (here, `mio::Poll`, which itself binds to epoll/kqueue/IOCP),
//! keyed by raw fd rather than `mio`'s own `Token` newtype, since the
//! connection table is addressed directly by fd (see `table.rs`).
//!
//! Keyed this way so arbitrary raw fds (timers, attached sockets) can be
//! registered via [`mio::unix::SourceFd`], not just `mio::net` types.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};

/// One readiness notification for a single fd.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessEvent {
    /// The fd the event occurred on.
    pub fd: RawFd,
    /// The fd is ready for reading (or a listening socket has a backlog).
    pub readable: bool,
    /// The fd is ready for writing.
    pub writable: bool,
    /// The peer has closed its half of the connection, or an error
    /// occurred. Takes precedence over `readable`/`writable` in the
    /// orchestrator's dispatch (see `orchestrator.rs`).
    pub hup: bool,
}

/// Which edges a registration should be notified on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Only readable edges.
    Readable,
    /// Only writable edges.
    Writable,
    /// Both readable and writable edges.
    Both,
}

impl Mode {
    fn interest(self) -> Interest {
        match self {
            Mode::Readable => Interest::READABLE,
            Mode::Writable => Interest::WRITABLE,
            Mode::Both => Interest::READABLE | Interest::WRITABLE,
        }
    }
}

/// The reactor abstraction the orchestrator drives.
///
/// Implementations must be safe to call `register`/`unregister` from any
/// thread: close paths may run on any worker, not just the thread that
/// calls `wait`.
pub trait Reactor: Send + Sync {
    /// Registers `fd` for the given interest. `fd` becomes the token used
    /// to identify events for this registration.
    fn register(&self, fd: RawFd, mode: Mode) -> io::Result<()>;

    /// Changes the interest for an already-registered `fd`.
    fn modify(&self, fd: RawFd, mode: Mode) -> io::Result<()>;

    /// Removes `fd` from the reactor. Idempotent: unregistering an fd that
    /// isn't registered is not an error.
    fn unregister(&self, fd: RawFd) -> io::Result<()>;

    /// Blocks up to `timeout` (or indefinitely, if `None`) for readiness
    /// events, returning the batch observed. An empty batch means the
    /// timeout elapsed with nothing ready.
    fn wait(&self, timeout: Option<Duration>) -> io::Result<Vec<ReadinessEvent>>;
}

/// `mio`-backed [`Reactor`].
///
/// Registration is keyed 1:1 by raw fd (`Token(fd as usize)`), matching
/// the connection table's own fd-indexing, rather than `mio`'s usual
/// slab-allocated token convention.
pub struct MioReactor {
    poll: std::sync::Mutex<Poll>,
    registry: mio::Registry,
    capacity: usize,
}

impl MioReactor {
    /// Creates a reactor sized to hold up to `capacity` events per
    /// `wait()` batch.
    pub fn new(capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            poll: std::sync::Mutex::new(poll),
            registry,
            capacity: capacity.max(1024),
        })
    }
}

impl Reactor for MioReactor {
    fn register(&self, fd: RawFd, mode: Mode) -> io::Result<()> {
        self.registry
            .register(&mut SourceFd(&fd), Token(fd as usize), mode.interest())
    }

    fn modify(&self, fd: RawFd, mode: Mode) -> io::Result<()> {
        self.registry
            .reregister(&mut SourceFd(&fd), Token(fd as usize), mode.interest())
    }

    fn unregister(&self, fd: RawFd) -> io::Result<()> {
        match self.registry.deregister(&mut SourceFd(&fd)) {
            Ok(()) => Ok(()),
            // Already gone (e.g. the socket itself closed) — treat as success.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> io::Result<Vec<ReadinessEvent>> {
        let mut events = Events::with_capacity(self.capacity);
        let mut poll = self
            .poll
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        poll.poll(&mut events, timeout)?;

        Ok(events
            .iter()
            .map(|e| ReadinessEvent {
                fd: e.token().0 as RawFd,
                readable: e.is_readable(),
                writable: e.is_writable(),
                hup: e.is_read_closed() || e.is_write_closed() || e.is_error(),
            })
            .collect())
    }
}
