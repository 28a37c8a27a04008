//! A reactor-based, single-host, multi-process, multi-threaded TCP server
//! framework.
//!
//! Applications supply a [`Protocol`] (a bundle of callbacks) and a
//! [`Settings`] value to [`listen`]; the framework owns the listening
//! socket, the readiness reactor, the per-fd connection table, and the
//! thread pool that drives callbacks. See `SPEC_FULL.md` in the repository
//! root for the full design; this module wires together the pieces
//! documented in each submodule: [`reactor`] (readiness notification),
//! [`table`] (per-fd state and locking), [`write_queue`] (the
//! asynchronous write buffer), [`pool`] (the task queue and workers),
//! [`timer`] (one-shot/periodic timers), and [`orchestrator`] (the accept
//! loop, fork, signals, and shutdown).
//!
//! ```no_run
//! use reactor_server::{listen, Protocol, Settings};
//!
//! static ECHO: Protocol = Protocol {
//!     on_data: Some(|server, fd| {
//!         let mut buf = [0u8; 1024];
//!         if let Ok(n) = server.read(fd, &mut buf) {
//!             if n > 0 {
//!                 server.write(fd, &buf[..n]);
//!             }
//!         }
//!     }),
//!     ..Protocol::empty("echo")
//! };
//!
//! fn main() {
//!     let settings = Settings::new(&ECHO);
//!     let _ = listen(settings);
//! }
//! ```

pub mod connection;
pub mod error;
pub mod hooks;
pub mod net;
pub mod orchestrator;
pub mod pool;
pub mod protocol;
pub mod reactor;
pub mod settings;
pub mod table;
pub mod timer;
pub mod write_queue;

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::{debug, trace, warn};

pub use error::{Error, Result};
pub use hooks::{HookResult, ReadHook, WriteHook};
pub use orchestrator::listen;
pub use protocol::{Callback, Protocol};
pub use settings::{Settings, SettingsBuilder};

use connection::Connection;
use pool::ThreadPool;
use reactor::{MioReactor, Mode, Reactor};
use table::ConnectionTable;
use timer::ArmedTimer;

/// The concrete, non-blocking stream type connections are driven over in
/// production. Tests drive [`connection::Connection`]/[`table::ConnectionTable`]
/// directly against a mock implementing [`net::tcp_stream::TcpStream`]
/// instead.
pub type Stream = mio::net::TcpStream;

thread_local! {
    /// While a thread is executing a "protected" callback for a given fd
    /// (see [`table::Slot::with_protected`]), holds a pointer to that
    /// fd's already-locked [`Connection`] so that re-entrant facade calls
    /// made from *within* the callback — which is exactly how `on_data`
    /// is meant to call [`Server::read`]/[`Server::write`] — reach the
    /// connection without trying to re-acquire the slot's non-reentrant
    /// mutex a second time on the same thread (which would deadlock).
    ///
    /// Saved/restored (not pushed to a stack) because at most one
    /// protected callback is ever on a given thread's stack at a time in
    /// this design: workers process one task to completion before
    /// picking up the next.
    static ACTIVE_CONNECTION: Cell<Option<(RawFd, *mut Connection<Stream>)>> = Cell::new(None);
}

/// Runs `f` with `fd`'s connection accessible as `active` for the
/// duration, so nested calls on this thread for the same fd see it too.
fn with_active_connection<R>(fd: RawFd, conn: &mut Connection<Stream>, f: impl FnOnce() -> R) -> R {
    let ptr: *mut Connection<Stream> = conn;
    let previous = ACTIVE_CONNECTION.with(|cell| cell.replace(Some((fd, ptr))));
    let result = f();
    ACTIVE_CONNECTION.with(|cell| cell.set(previous));
    result
}

pub(crate) fn active_connection_for(fd: RawFd) -> Option<*mut Connection<Stream>> {
    ACTIVE_CONNECTION.with(|cell| match cell.get() {
        Some((active_fd, ptr)) if active_fd == fd => Some(ptr),
        _ => None,
    })
}

/// Process-wide registry of listening servers, used to implement
/// [`stop_all`] and SIGINT/SIGTERM dispatch (design note, §9): "a
/// process-wide registry of active Servers ... initialized on first
/// listen, torn down on last stop."
static REGISTRY: OnceLock<Mutex<Vec<Server>>> = OnceLock::new();

fn registry() -> &'static Mutex<Vec<Server>> {
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

fn register_server(server: Server) {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(server);
}

fn unregister_server(server: &Server) {
    let mut servers = registry().lock().unwrap_or_else(PoisonError::into_inner);
    servers.retain(|s| !Arc::ptr_eq(&s.0, &server.0));
}

/// Stops every server currently registered in this process (§6, §9).
/// Called automatically on SIGINT/SIGTERM; applications may also call it
/// directly.
pub fn stop_all() {
    let servers = registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    for server in servers {
        server.stop();
    }
}

/// Opaque user data slots for fds 0, 1, and 2 (design note (c), §9):
/// these fds are never treated as connections (invariant 5), but
/// `get_udata`/`set_udata` still accept them as an out-of-band storage
/// affordance. Documented as racy with any other use of stdio in the
/// same process.
struct StdioUdata([Mutex<Option<Box<dyn Any + Send>>>; 3]);

impl StdioUdata {
    fn new() -> Self {
        StdioUdata([Mutex::new(None), Mutex::new(None), Mutex::new(None)])
    }
}

struct ServerState {
    settings: Settings,
    table: ConnectionTable<Stream>,
    reactor: Arc<MioReactor>,
    pool: OnceLock<ThreadPool>,
    listener_fd: RawFd,
    root_pid: libc::pid_t,
    is_root: bool,
    child_pids: Mutex<Vec<libc::pid_t>>,
    timers: Mutex<HashMap<RawFd, ArmedTimer>>,
    stopping: AtomicBool,
    stdio_udata: StdioUdata,
}

/// A cheap, `Clone`-able handle onto one running server instance.
///
/// Holds an `Arc` to the shared state (connection table, reactor, thread
/// pool); clones are handed to worker threads and to protocol callbacks
/// (`fn(&Server, fd)`) so they can re-enter the facade. See §9 for why
/// this fd-indexed, non-owning design avoids any cyclic ownership between
/// `Server`, `Connection`, and `Protocol`.
#[derive(Clone)]
pub struct Server(Arc<ServerState>);

impl Server {
    pub(crate) fn new(
        settings: Settings,
        table: ConnectionTable<Stream>,
        reactor: Arc<MioReactor>,
        listener_fd: RawFd,
        root_pid: libc::pid_t,
        is_root: bool,
    ) -> Self {
        Server(Arc::new(ServerState {
            settings,
            table,
            reactor,
            pool: OnceLock::new(),
            listener_fd,
            root_pid,
            is_root,
            child_pids: Mutex::new(Vec::new()),
            timers: Mutex::new(HashMap::new()),
            stopping: AtomicBool::new(false),
            stdio_udata: StdioUdata::new(),
        }))
    }

    pub(crate) fn init_pool(&self) {
        let pool = ThreadPool::new(
            self.0.settings.threads,
            self.clone(),
            self.0.settings.on_init_thread,
            self.0.settings.on_finish_thread,
        );
        // Only ever called once, from orchestrator startup, before the
        // server is shared with any other thread.
        let _ = self.0.pool.set(pool);
    }

    pub(crate) fn table(&self) -> &ConnectionTable<Stream> {
        &self.0.table
    }

    /// The reactor driving this server's readiness events.
    pub fn reactor(&self) -> &dyn Reactor {
        self.0.reactor.as_ref()
    }

    pub(crate) fn reactor_arc(&self) -> Arc<MioReactor> {
        self.0.reactor.clone()
    }

    pub(crate) fn pool(&self) -> &ThreadPool {
        self.0
            .pool
            .get()
            .expect("thread pool initialized before any callback runs")
    }

    /// The settings this server was started with.
    pub fn settings(&self) -> &Settings {
        &self.0.settings
    }

    /// The pid of the root process (the one that bound the listening
    /// socket and forked any workers).
    pub fn root_pid(&self) -> libc::pid_t {
        self.0.root_pid
    }

    /// The process's adjusted open-fd capacity this server's connection
    /// table was sized to.
    pub fn capacity(&self) -> usize {
        self.0.table.capacity()
    }

    pub(crate) fn listener_fd(&self) -> RawFd {
        self.0.listener_fd
    }

    pub(crate) fn is_root(&self) -> bool {
        self.0.is_root
    }

    pub(crate) fn record_child(&self, pid: libc::pid_t) {
        self.0
            .child_pids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pid);
    }

    pub(crate) fn child_pids(&self) -> Vec<libc::pid_t> {
        self.0
            .child_pids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Requests that this server stop serving. Checked at the top of
    /// every reactor `wait()` (§5 Cancellation); the orchestrator then
    /// runs the shutdown sequence in §4.8.
    pub fn stop(&self) {
        debug!("stop requested");
        self.0.stopping.store(true, Ordering::Release);
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.0.stopping.load(Ordering::Acquire)
    }

    fn with_connection<R>(&self, fd: RawFd, f: impl FnOnce(&mut Connection<Stream>) -> R) -> Option<R> {
        if let Some(ptr) = active_connection_for(fd) {
            // SAFETY: `ptr` was stashed by `with_active_connection` for
            // this exact fd on this exact thread, and the protected
            // callback that stashed it is still on this thread's stack
            // (we are necessarily being called synchronously from within
            // it, since the pointer is cleared when that call returns).
            let conn = unsafe { &mut *ptr };
            return Some(f(conn));
        }

        self.0.table.lookup(fd).map(|slot| slot.with_unprotected(f))
    }

    /// `is_busy`: true while a protected callback is currently executing
    /// on `fd`. False for a vacant fd.
    pub fn is_busy(&self, fd: RawFd) -> bool {
        self.0
            .table
            .lookup(fd)
            .map(|slot| slot.is_busy())
            .unwrap_or(false)
    }

    /// `get_protocol`: the fd's currently active protocol, if occupied.
    pub fn get_protocol(&self, fd: RawFd) -> Option<&'static Protocol> {
        self.with_connection(fd, |conn| conn.protocol())
    }

    /// `set_protocol`: runs `old.on_close` (if any), swaps the active
    /// protocol, then runs `new.on_open` (if any), all under the fd lock
    /// (§4.7). Returns [`Error::VacantFd`] if `fd` is not occupied.
    ///
    /// Locates the slot itself (rather than going through
    /// `with_connection`) because both callbacks must run while the same
    /// lock acquisition is held, and re-stashes the active-connection
    /// pointer around each one so a callback that re-enters the facade
    /// (e.g. `on_open` calling `server.write`) still hits the reentrant
    /// fast path instead of deadlocking on the slot's mutex.
    pub fn set_protocol(&self, fd: RawFd, new: &'static Protocol) -> Result<()> {
        if let Some(ptr) = active_connection_for(fd) {
            // SAFETY: see `with_connection` — this thread already holds
            // the lock for `fd` and is calling back in from within it.
            let conn = unsafe { &mut *ptr };
            let old = conn.protocol();
            conn.set_protocol(new);
            if let Some(on_close) = old.on_close {
                on_close(self, fd);
            }
            if let Some(on_open) = new.on_open {
                on_open(self, fd);
            }
            return Ok(());
        }

        let slot = self.0.table.lookup(fd).ok_or(Error::VacantFd)?;
        slot.with_protected(|conn| {
            let old = conn.protocol();
            conn.set_protocol(new);
            with_active_connection(fd, conn, || {
                if let Some(on_close) = old.on_close {
                    on_close(self, fd);
                }
                if let Some(on_open) = new.on_open {
                    on_open(self, fd);
                }
            });
        });
        Ok(())
    }

    /// `get_udata`/equivalent: runs `f` with a shared borrow of `fd`'s
    /// opaque user data. Rust can't hand back a bare borrowed pointer the
    /// way the C facade's `get_udata` does without holding the slot lock
    /// open past the call, so this crate renders it as a scoped accessor
    /// instead (see DESIGN.md, open question (c) / udata resolution).
    /// fds 0..2 are served from the fixed stdio side-table (design note
    /// (c)), never from the connection table.
    pub fn with_udata<R>(&self, fd: RawFd, f: impl FnOnce(Option<&(dyn Any + Send)>) -> R) -> Option<R> {
        if let Some(idx) = stdio_index(fd) {
            let guard = self.0.stdio_udata.0[idx]
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            return Some(f(guard.as_deref()));
        }
        self.with_connection(fd, |conn| f(conn.udata()))
    }

    /// `set_udata`: replaces `fd`'s opaque user data, returning the
    /// previous value. fds 0..2 use the stdio side-table.
    pub fn set_udata(&self, fd: RawFd, udata: Option<Box<dyn Any + Send>>) -> Option<Box<dyn Any + Send>> {
        if let Some(idx) = stdio_index(fd) {
            let mut guard = self.0.stdio_udata.0[idx]
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            return std::mem::replace(&mut *guard, udata);
        }
        self.with_connection(fd, |conn| conn.set_udata(udata)).flatten()
    }

    /// `set_timeout`: sets `fd`'s timeout in seconds (`0` disables it)
    /// and resets its tick counter to match.
    pub fn set_timeout(&self, fd: RawFd, seconds: u8) {
        self.with_connection(fd, |conn| conn.set_timeout(seconds));
    }

    /// `touch`: resets `fd`'s timeout tick counter, as if it had just
    /// been active.
    pub fn touch(&self, fd: RawFd) {
        self.with_connection(fd, |conn| conn.touch());
    }

    /// `count`: number of occupied fds whose active protocol's `service`
    /// equals `filter` (`None` matches any occupied fd).
    pub fn count(&self, filter: Option<&str>) -> usize {
        self.0.table.count(filter)
    }

    /// `attach`: takes over an already-connected foreign fd under
    /// `protocol`, registers it with the reactor, and schedules
    /// `on_open`. The server takes over close responsibility (§4.7).
    pub fn attach(&self, fd: RawFd, protocol: &'static Protocol) -> Result<()> {
        use std::os::fd::FromRawFd;

        // SAFETY: the caller is handing over a fd it owns and that is
        // already a connected socket, per `attach`'s contract; we take
        // exclusive ownership of it from here on.
        let std_stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
        std_stream.set_nonblocking(true)?;
        let stream = Stream::from_std(std_stream);

        self.0
            .table
            .reserve(fd, stream, protocol, self.0.settings.timeout)?;
        self.0.reactor.register(fd, Mode::Both)?;

        if let Some(on_open) = protocol.on_open {
            if self.pool().run_async(self, move |s| on_open(s, fd)).is_err() {
                warn!("queue full scheduling on_open for attached fd {fd}");
            }
        }
        Ok(())
    }

    /// `close`: marks `fd` for close. Queued writes continue draining;
    /// once the queue empties (or a hook faults) the orchestrator tears
    /// the fd down and schedules `on_close` (§4.3).
    pub fn close(&self, fd: RawFd) {
        let empty = self
            .with_connection(fd, |conn| {
                conn.begin_close();
                conn.write_queue_is_empty()
            })
            .unwrap_or(true);

        if empty {
            orchestrator::finish_close(self, fd);
        }
    }

    /// `hijack`: blocks until `fd`'s write queue empties, then removes it
    /// from the reactor and the table without invoking `on_close`,
    /// handing the fd back to the caller (§4.3, invariant: after hijack
    /// the server no longer references the fd).
    ///
    /// Extracts the stream's raw fd via [`connection::Connection::take_raw_fd`]
    /// rather than just dropping the table's `Arc<Slot<_>>`: `hijack` is
    /// routinely called from inside a protected callback (as in
    /// `tests/hijack.rs`), in which case `pool::dispatch_fd_task` still
    /// holds its own clone of that `Arc` on the call stack and the
    /// `Connection`/socket inside it survives past this call. Without
    /// extracting the fd first, that `Arc`'s eventual drop would `close(2)`
    /// the same fd number this call hands back to the caller.
    pub fn hijack(&self, fd: RawFd) -> Option<RawFd> {
        loop {
            let drained = self.with_connection(fd, |conn| conn.write_queue_is_empty())?;
            if drained {
                break;
            }
            std::thread::yield_now();
        }

        let _ = self.0.reactor.unregister(fd);
        let slot = self.0.table.take(fd)?;
        let raw = slot.with_unprotected(|conn| conn.take_raw_fd())?;
        trace!("hijacked fd {fd}");
        Some(raw)
    }

    /// `rw_hooks`: installs per-fd transport hook replacements for
    /// `read(2)`/`write(2)` (§4.4).
    pub fn rw_hooks(&self, fd: RawFd, read: Option<ReadHook>, write: Option<WriteHook>) {
        self.with_connection(fd, |conn| conn.set_hooks(read, write));
    }

    /// `read`: reads up to `buf.len()` bytes via the active hook (or the
    /// default socket read). Meant to be called from `on_data`, which is
    /// exactly the re-entrant case this facade is built to support (see
    /// [`ACTIVE_CONNECTION`]).
    pub fn read(&self, fd: RawFd, buf: &mut [u8]) -> Result<usize> {
        match self.with_connection(fd, |conn| conn.read(buf)) {
            Some(Ok(n)) => Ok(n),
            Some(Err(())) => {
                self.close(fd);
                Err(Error::Io(io::Error::from(io::ErrorKind::Other)))
            }
            None => Err(Error::VacantFd),
        }
    }

    /// `write`: copies `data` and enqueues it at the tail of `fd`'s write
    /// queue.
    pub fn write(&self, fd: RawFd, data: &[u8]) -> Result<()> {
        self.with_connection(fd, |conn| conn.write(data))
            .ok_or(Error::VacantFd)
    }

    /// `write_move`: takes ownership of `data` and enqueues it at the
    /// tail.
    pub fn write_move(&self, fd: RawFd, data: Vec<u8>) -> Result<()> {
        self.with_connection(fd, |conn| conn.write_move(data))
            .ok_or(Error::VacantFd)
    }

    /// `write_urgent`: copies `data` and inserts it immediately after the
    /// current head packet (§4.3).
    pub fn write_urgent(&self, fd: RawFd, data: &[u8]) -> Result<()> {
        self.with_connection(fd, |conn| conn.write_urgent(data))
            .ok_or(Error::VacantFd)
    }

    /// `write_move_urgent`: takes ownership of `data` and inserts it
    /// immediately after the current head packet.
    pub fn write_move_urgent(&self, fd: RawFd, data: Vec<u8>) -> Result<()> {
        self.with_connection(fd, |conn| conn.write_move_urgent(data))
            .ok_or(Error::VacantFd)
    }

    /// `sendfile`: takes ownership of `file` and enqueues it at the tail,
    /// streamed out in chunks.
    pub fn sendfile(&self, fd: RawFd, file: std::fs::File) -> Result<()> {
        self.with_connection(fd, |conn| conn.sendfile(file))
            .ok_or(Error::VacantFd)
    }

    /// `each`: schedules `task` as an `fd_task` for every currently
    /// occupied fd whose protocol's `service` matches `filter` (`None`
    /// matches any), a snapshot taken at call time (§4.5). `on_finish` is
    /// scheduled for each fd after its task (or fallback) completes.
    pub fn each<F, O>(&self, filter: Option<&str>, task: F, on_finish: Option<O>)
    where
        F: Fn(&Server, RawFd) + Send + Sync + 'static,
        O: Fn(&Server, RawFd) + Send + Sync + 'static,
    {
        let task = Arc::new(task);
        let on_finish = on_finish.map(Arc::new);

        for fd in self.0.table.snapshot(filter) {
            let task = task.clone();
            let finish = on_finish.clone();
            let run = move |server: &Server, fd: RawFd| {
                task(server, fd);
                if let Some(finish) = &finish {
                    finish(server, fd);
                }
            };
            let finish_fallback = on_finish.clone();
            let fallback = move |server: &Server, fd: RawFd| {
                if let Some(finish) = &finish_fallback {
                    finish(server, fd);
                }
            };
            if self.pool().fd_task(self, fd, run, Some(fallback)).is_err() {
                warn!("queue full scheduling each() task for fd {fd}");
            }
        }
    }

    /// `each_block`: synchronous variant of [`Server::each`]. Iterates
    /// the snapshot in fd order, acquiring each lock in turn and running
    /// `task` inline; returns only once every targeted fd has been
    /// visited. Must not be called from inside a protected callback on
    /// this server (undefined behavior risk of deadlock, per §4.5).
    pub fn each_block(&self, filter: Option<&str>, task: impl Fn(&Server, RawFd)) {
        for fd in self.0.table.snapshot(filter) {
            if let Some(slot) = self.0.table.lookup(fd) {
                slot.with_protected(|conn| {
                    with_active_connection(fd, conn, || task(self, fd));
                });
            }
        }
    }

    /// `fd_task`: schedules `task` to run under `fd`'s lock with `busy`
    /// set. If `fd` is no longer occupied by the time a worker pops the
    /// task, `fallback` runs instead (exactly one of the two ever runs;
    /// see design note (b)).
    pub fn fd_task<F, Fb>(&self, fd: RawFd, task: F, fallback: Option<Fb>) -> Result<()>
    where
        F: FnOnce(&Server, RawFd) + Send + 'static,
        Fb: FnOnce(&Server, RawFd) + Send + 'static,
    {
        self.pool().fd_task(self, fd, task, fallback)
    }

    /// `run_async`: runs `f(self)` on a worker thread, or inline if
    /// `threads <= 1` (invariant 6).
    pub fn run_async(&self, f: impl FnOnce(&Server) + Send + 'static) -> Result<()> {
        self.pool().run_async(self, f)
    }

    /// `run_after`: fires `task` once, `ms` milliseconds from now.
    pub fn run_after(&self, ms: u64, task: impl Fn(&Server) + Send + Sync + 'static) -> Result<()> {
        let timer = timer::run_after(self.reactor(), ms, task)?;
        let fd = timer.fd();
        self.0
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fd, timer);
        Ok(())
    }

    /// `run_every`: fires `task` every `ms` milliseconds. `reps == 0`
    /// means infinite; otherwise the timer releases its fd after the
    /// `reps`th fire.
    pub fn run_every(
        &self,
        ms: u64,
        reps: u32,
        task: impl Fn(&Server) + Send + Sync + 'static,
    ) -> Result<()> {
        let timer = timer::run_every(self.reactor(), ms, reps, task)?;
        let fd = timer.fd();
        self.0
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fd, timer);
        Ok(())
    }

    pub(crate) fn is_timer(&self, fd: RawFd) -> bool {
        self.0
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&fd)
    }

    /// Fires the timer at `fd`, removing it from the timer table (and
    /// releasing its fd) if it has exhausted its repetitions.
    pub(crate) fn fire_timer(&self, fd: RawFd) {
        let mut timers = self.0.timers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(timer) = timers.get_mut(&fd) else {
            return;
        };
        let exhausted = timer.fire(self);
        if exhausted {
            timer.release(self.reactor());
            timers.remove(&fd);
        }
    }

    pub(crate) fn release_all_timers(&self) {
        let mut timers = self.0.timers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, timer) in timers.drain() {
            timer.release(self.reactor());
        }
    }
}

/// fds 0, 1, 2 never denote connections (invariant 5); `get_udata`/
/// `set_udata` instead address the fixed stdio side-table for them.
fn stdio_index(fd: RawFd) -> Option<usize> {
    (0..3).contains(&fd).then_some(fd as usize)
}

/// Runs `f` with `fd`'s connection locked via `with_unprotected` (no
/// `busy` flag set, so it does not exclude a concurrently dispatched
/// protected `fd_task`) and the active-connection thread-local primed,
/// so `f` can call back into the facade for this fd. Used by the
/// orchestrator for `on_open`, `on_ready`, and `ping`, which §4.2
/// classifies as unprotected callbacks. No-op if `fd` is vacant.
pub(crate) fn schedule_unprotected(server: &Server, fd: RawFd, f: impl FnOnce(&Server, RawFd)) {
    if let Some(slot) = server.0.table.lookup(fd) {
        slot.with_unprotected(|conn| {
            with_active_connection(fd, conn, || f(server, fd));
        });
    }
}

pub(crate) fn push_connection(
    server: &Server,
    fd: RawFd,
    stream: Stream,
    protocol: &'static Protocol,
) -> Result<()> {
    server
        .0
        .table
        .reserve(fd, stream, protocol, server.0.settings.timeout)?;
    server.0.reactor.register(fd, Mode::Both)?;
    Ok(())
}
