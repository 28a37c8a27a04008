//! The thread pool and bounded task queue driving fd tasks, pool tasks,
//! and broadcast tasks: worker threads pulling off a
//! `crossbeam_channel::Receiver` until the sender disconnects, generalized
//! into a generic task queue per §4.5.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::Server;

type PoolTask = Box<dyn FnOnce(&Server) + Send>;
type FdTaskFn = Box<dyn FnOnce(&Server, RawFd) + Send>;

enum Task {
    Pool(PoolTask),
    Fd {
        fd: RawFd,
        task: FdTaskFn,
        fallback: Option<FdTaskFn>,
    },
}

/// Bounded queue + N worker threads, or inline execution when
/// `threads <= 1` (invariant 6).
///
/// `sender`/`handles` are `Mutex`-wrapped (rather than requiring `&mut
/// self`) so [`ThreadPool::shutdown`] can be called through the shared
/// `Server` handle every worker and protocol callback already holds.
pub struct ThreadPool {
    sender: Mutex<Option<Sender<Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    inline: bool,
    shutdown: std::sync::Arc<AtomicBool>,
}

const QUEUE_CAPACITY: usize = 4096;

impl ThreadPool {
    /// Builds a pool. With `threads <= 1`, no threads are spawned and
    /// every `run_async`/`fd_task` call executes synchronously on the
    /// calling thread, preserving its identity per invariant 6.
    pub fn new(
        threads: usize,
        server: Server,
        on_init_thread: Option<crate::settings::ThreadInitHook>,
        on_finish_thread: Option<crate::settings::ThreadFinishHook>,
    ) -> Self {
        let shutdown = std::sync::Arc::new(AtomicBool::new(false));

        if threads <= 1 {
            return ThreadPool {
                sender: Mutex::new(None),
                handles: Mutex::new(Vec::new()),
                inline: true,
                shutdown,
            };
        }

        let (tx, rx): (Sender<Task>, Receiver<Task>) = crossbeam_channel::bounded(QUEUE_CAPACITY);
        let mut handles = Vec::with_capacity(threads);

        for id in 0..threads {
            let rx = rx.clone();
            let server = server.clone();
            let shutdown = shutdown.clone();
            handles.push(
                std::thread::Builder::new()
                    .name(format!("reactor-server-worker-{id}"))
                    .spawn(move || {
                        worker_loop(id, rx, server, on_init_thread, on_finish_thread, shutdown)
                    })
                    .expect("failed to spawn worker thread"),
            );
        }

        ThreadPool {
            sender: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            inline: false,
            shutdown,
        }
    }

    fn send(&self, task: Task) -> Result<()> {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sender) => match sender.try_send(task) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => Err(Error::QueueFull),
                Err(TrySendError::Disconnected(_)) => Err(Error::QueueFull),
            },
            None => Err(Error::QueueFull),
        }
    }

    /// `run_async`: runs `f(server)` on a worker thread, or inline if
    /// `threads <= 1`. Returns [`Error::QueueFull`] if the bounded queue
    /// is full; never blocks.
    pub fn run_async(
        &self,
        server: &Server,
        f: impl FnOnce(&Server) + Send + 'static,
    ) -> Result<()> {
        if self.inline {
            f(server);
            return Ok(());
        }

        match self.send(Task::Pool(Box::new(f))) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("task queue full, rejecting run_async");
                Err(e)
            }
        }
    }

    /// `fd_task`: schedules `task` to run on fd's slot lock with `busy`
    /// set. If, by the time the task is popped, the fd is no longer
    /// occupied, `fallback` runs instead — exactly one of the two ever
    /// runs, never both, per §4.5 / design note (b).
    pub fn fd_task(
        &self,
        server: &Server,
        fd: RawFd,
        task: impl FnOnce(&Server, RawFd) + Send + 'static,
        fallback: Option<impl FnOnce(&Server, RawFd) + Send + 'static>,
    ) -> Result<()> {
        let task: FdTaskFn = Box::new(task);
        let fallback: Option<FdTaskFn> = fallback.map(|f| Box::new(f) as FdTaskFn);

        if self.inline {
            dispatch_fd_task(server, fd, task, fallback);
            return Ok(());
        }

        match self.send(Task::Fd { fd, task, fallback }) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("task queue full, rejecting fd_task for fd {fd}");
                Err(e)
            }
        }
    }

    /// Stops accepting new work, drains whatever is already queued, then
    /// joins every worker thread. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let handles = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            let _ = handle.join();
        }
    }
}

/// Dispatches one `fd_task`: if `fd` is occupied, runs `task` with the
/// slot locked and `busy` set, stashing the locked connection as the
/// "active connection" for this thread so that `task` (typically a
/// protocol callback body) can re-enter the public facade's `read`/
/// `write`/etc. without deadlocking on the same, non-reentrant slot lock.
/// If `fd` is vacant by the time this runs, `fallback` runs instead (not
/// under any lock), per §4.5 / design note (b).
///
/// Checks for reentrancy first: with `threads <= 1`, `fd_task` executes
/// inline on the calling thread (invariant 6), and `Server::each`'s
/// snapshot legitimately includes the fd of the connection currently
/// running the protected callback that called `each` (e.g. a broadcast
/// that targets every connection sharing a service, including the
/// sender). Without this check, scheduling a `fd_task` against that same
/// fd from inside its own protected callback would try to re-lock the
/// slot's non-reentrant mutex on the same thread that already holds it —
/// a guaranteed self-deadlock, not just a slow path.
fn dispatch_fd_task(server: &Server, fd: RawFd, task: FdTaskFn, fallback: Option<FdTaskFn>) {
    if crate::active_connection_for(fd).is_some() {
        // This thread already holds `fd`'s slot lock (see
        // `with_active_connection`); run `task` directly instead of
        // trying to acquire it again.
        task(server, fd);
        return;
    }

    match server.table().lookup(fd) {
        Some(slot) => slot.with_protected(|conn| {
            crate::with_active_connection(fd, conn, || task(server, fd));
        }),
        None => {
            trace!("fd {fd} vacant at fd_task execution, running fallback");
            if let Some(fallback) = fallback {
                fallback(server, fd);
            }
        }
    }
}

fn worker_loop(
    id: usize,
    rx: Receiver<Task>,
    server: Server,
    on_init_thread: Option<crate::settings::ThreadInitHook>,
    on_finish_thread: Option<crate::settings::ThreadFinishHook>,
    shutdown: std::sync::Arc<AtomicBool>,
) {
    if let Some(hook) = on_init_thread {
        hook(&server);
    }

    debug!("worker {id} started");

    while let Ok(task) = rx.recv() {
        match task {
            Task::Pool(f) => f(&server),
            Task::Fd { fd, task, fallback } => dispatch_fd_task(&server, fd, task, fallback),
        }

        if shutdown.load(Ordering::Acquire) && rx.is_empty() {
            break;
        }
    }

    if let Some(hook) = on_finish_thread {
        hook(&server);
    }

    debug!("worker {id} exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    // fd_task dispatch (inline path) is covered end-to-end in the
    // integration tests, which build a full `Server`. This module's own
    // unit tests focus on queue-capacity behavior in isolation.

    #[test]
    fn bounded_channel_reports_full_without_blocking() {
        let (tx, _rx) = crossbeam_channel::bounded::<i32>(1);
        tx.try_send(1).unwrap();
        assert!(matches!(tx.try_send(2), Err(TrySendError::Full(2))));
    }

    #[test]
    fn atomic_shutdown_flag_is_observable_across_clones() {
        let flag = std::sync::Arc::new(AtomicBool::new(false));
        let counter = std::sync::Arc::new(AtomicUsize::new(0));
        let flag2 = flag.clone();
        let counter2 = counter.clone();
        flag2.store(true, Ordering::Release);
        counter2.fetch_add(1, Ordering::Release);
        assert!(flag.load(Ordering::Acquire));
        assert_eq!(counter.load(Ordering::Acquire), 1);
    }
}
