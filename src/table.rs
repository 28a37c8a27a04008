//! The connection table: a fixed-size array indexed directly by fd,
//! holding one [`Slot`] per managed connection, rather than a
//! slab-allocated key, since §4.2 requires lookup by the fd's own number.
//! Sized once at startup to the process's file-descriptor capacity.

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::net::tcp_stream::TcpStream;
use crate::protocol::Protocol;

/// A table-owned wrapper around one [`Connection`]: a `busy` flag queried
/// without blocking on the lock, plus the lock itself, held for the
/// duration of exactly one protected callback or one drain cycle (§4.2).
pub struct Slot<S: TcpStream> {
    busy: AtomicBool,
    conn: Mutex<Connection<S>>,
}

impl<S: TcpStream> Slot<S> {
    /// True while a protected callback ([`crate::Server::fd_task`] body,
    /// `on_data`) is currently running on this fd.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Runs `f` with the connection locked and `busy` set for the
    /// duration, per the "protected" callback rule in §4.2.
    pub fn with_protected<R>(&self, f: impl FnOnce(&mut Connection<S>) -> R) -> R {
        let mut conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.busy.store(true, Ordering::Release);
        let result = f(&mut conn);
        self.busy.store(false, Ordering::Release);
        result
    }

    /// Runs `f` with the connection locked but `busy` left untouched, for
    /// `on_open`/`on_ready`/`on_close`/`ping`, per §4.2.
    pub fn with_unprotected<R>(&self, f: impl FnOnce(&mut Connection<S>) -> R) -> R {
        let mut conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut conn)
    }
}

/// Computes the adjusted open-file-descriptor capacity for this process:
/// raises `RLIMIT_NOFILE` toward its hard cap, then reserves headroom for
/// response-side fds, per §4.2's recommended
/// `min(raised, max(raised - 64, raised * 7 / 8))`.
pub fn capacity() -> io::Result<usize> {
    let mut limits = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    // SAFETY: `limits` is a valid, appropriately-sized out-parameter.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limits) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let raised = libc::rlimit {
        rlim_cur: limits.rlim_max,
        rlim_max: limits.rlim_max,
    };

    // Best-effort: if we can't raise it, proceed with whatever rlim_cur
    // already allows.
    // SAFETY: `raised` is a valid, appropriately-sized in-parameter.
    unsafe {
        libc::setrlimit(libc::RLIMIT_NOFILE, &raised);
    }

    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `current` is a valid, appropriately-sized out-parameter.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut current) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let raised = current.rlim_cur as usize;
    let reserved = raised.saturating_sub(64).max(raised * 7 / 8);
    Ok(raised.min(reserved).max(1))
}

/// Fixed-size, fd-indexed connection table.
pub struct ConnectionTable<S: TcpStream> {
    slots: Vec<RwLock<Option<Arc<Slot<S>>>>>,
}

impl<S: TcpStream> ConnectionTable<S> {
    /// Builds a table sized to hold fds `0..capacity`.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || RwLock::new(None));
        ConnectionTable { slots }
    }

    /// The table's fixed capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Initializes the slot for `fd` with a fresh [`Connection`]. Fails
    /// with [`Error::CapacityExhausted`] if `fd >= capacity()`.
    pub fn reserve(
        &self,
        fd: RawFd,
        stream: S,
        protocol: &'static Protocol,
        timeout: u8,
    ) -> Result<Arc<Slot<S>>> {
        let idx = fd as usize;
        let Some(cell) = self.slots.get(idx) else {
            return Err(Error::CapacityExhausted);
        };

        let slot = Arc::new(Slot {
            busy: AtomicBool::new(false),
            conn: Mutex::new(Connection::new(fd, stream, protocol, timeout)),
        });

        *cell.write().unwrap_or_else(std::sync::PoisonError::into_inner) = Some(slot.clone());
        Ok(slot)
    }

    /// Borrows the slot for `fd`, if occupied.
    pub fn lookup(&self, fd: RawFd) -> Option<Arc<Slot<S>>> {
        let idx = fd as usize;
        self.slots
            .get(idx)?
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Vacates the slot for `fd`, draining (dropping, not sending) any
    /// queued writes and clearing transport hooks first, per §4.2.
    /// Returns the removed slot, if it was occupied, so the caller can
    /// finish any bookkeeping (e.g. invoking `on_close`) after it has been
    /// unlinked from the table.
    pub fn release(&self, fd: RawFd) -> Option<Arc<Slot<S>>> {
        let idx = fd as usize;
        let cell = self.slots.get(idx)?;
        let mut guard = cell.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let slot = guard.take()?;
        drop(guard);

        {
            let mut conn = slot
                .conn
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            conn.clear_hooks();
        }

        Some(slot)
    }

    /// Removes `fd` from the table's own bookkeeping — used by
    /// [`crate::Server::hijack`], which takes over the fd without invoking
    /// `on_close` or letting `release` drain/close anything. Does not by
    /// itself relinquish the connection's real ownership of the fd: other
    /// `Arc<Slot<S>>` clones (e.g. a `fd_task` dispatch still on the call
    /// stack, since `hijack` is commonly called from within a protected
    /// callback) can keep the slot, and the socket inside it, alive past
    /// this call. The caller must extract the raw fd via
    /// [`crate::connection::Connection::take_raw_fd`] before dropping its
    /// own reference, or the eventual `Drop` of that last `Arc` closes the
    /// very fd the caller now owns.
    pub fn take(&self, fd: RawFd) -> Option<Arc<Slot<S>>> {
        let idx = fd as usize;
        let cell = self.slots.get(idx)?;
        cell.write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }

    /// Number of occupied slots whose active protocol's `service` matches
    /// `filter` (`None` matches any occupied slot).
    pub fn count(&self, filter: Option<&str>) -> usize {
        self.slots
            .iter()
            .filter(|cell| {
                let guard = cell.read().unwrap_or_else(std::sync::PoisonError::into_inner);
                match (&*guard, filter) {
                    (None, _) => false,
                    (Some(_), None) => true,
                    (Some(slot), Some(name)) => {
                        slot.conn
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner)
                            .protocol()
                            .service
                            == name
                    }
                }
            })
            .count()
    }

    /// A snapshot of the fds currently occupied whose protocol's
    /// `service` matches `filter` (`None` matches any), per the snapshot
    /// semantics `each`/`each_block` require in §4.5: the set is fixed at
    /// the moment of the call, regardless of protocol changes afterward.
    pub fn snapshot(&self, filter: Option<&str>) -> Vec<RawFd> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, cell)| {
                let guard = cell.read().unwrap_or_else(std::sync::PoisonError::into_inner);
                let slot = guard.as_ref()?;
                let matches = match filter {
                    None => true,
                    Some(name) => {
                        slot.conn
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner)
                            .protocol()
                            .service
                            == name
                    }
                };
                matches.then_some(idx as RawFd)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_positive_and_bounded_by_rlimit() {
        let cap = capacity().expect("rlimit query should succeed in test sandboxes");
        assert!(cap > 0);
    }
}
