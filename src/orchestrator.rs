//! The server orchestrator: binds the listening socket, forks worker
//! processes, installs signal traps, drives the reactor loop, and owns
//! the lifecycle of every other component (§4.8). Grounded on the
//! teacher's `listener::Listener::run` (poll loop dispatching
//! LISTEN_TOKEN / WAKE_TOKEN / connection tokens to the right handler)
//! and `worker::Worker::run` (event -> callback dispatch), generalized
//! from one fixed HTTP pipeline into the generic
//! accept/dispatch/tick/shutdown sequence this crate's protocols need.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};
use signal_hook::consts::{SIGINT, SIGTERM};

use crate::error::{Error, Result};
use crate::net::tcp_listener::TcpListener;
use crate::reactor::{MioReactor, Mode, ReadinessEvent, Reactor};
use crate::settings::Settings;
use crate::table::{self, ConnectionTable};
use crate::write_queue::DrainOutcome;
use crate::{push_connection, register_server, schedule_unprotected, unregister_server, Server, Stream};

type Listener = mio::net::TcpListener;

/// Reactor `wait()` timeout, and the interval `tick_timeouts` is gated to:
/// under load `wait()` returns far more often than once a second (every
/// readiness batch), so the per-connection timeout tick is only actually
/// applied once at least this long has elapsed since the last one, per
/// §4.8's "decrement ... once per second" rule — the loop iterating more
/// often than that must not decrement counters faster than real time.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Binds `settings.address:settings.port` and serves `settings.protocol`
/// until the server stops, per §4.8. Blocks the calling thread.
///
/// With `settings.processes > 1`, forks `processes - 1` children before
/// entering the reactor loop; every process (root and children) runs the
/// identical accept/dispatch/shutdown sequence over the same inherited
/// listening socket. Returns once this process's own loop has shut down
/// cleanly; the root process additionally waits for every child it
/// forked to exit first.
pub fn listen(settings: Settings) -> Result<()> {
    let address = settings.address.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    let addr = SocketAddr::new(address, settings.port);

    let listener = Listener::bind(addr).map_err(Error::BindFailed)?;
    let listener_fd = listener.as_raw_fd();
    let capacity = table::capacity().map_err(Error::Rlimit)?;

    info!("listening on {addr}, connection table capacity {capacity}");

    let processes = settings.processes.max(1);
    let root_pid = std::process::id() as libc::pid_t;
    let mut child_pids = Vec::new();

    for _ in 1..processes {
        // SAFETY: `fork()` itself is always safe to call; no threads
        // have been spawned yet at this point in startup, so the child
        // arm's only further action — handing off to `run_process` — is
        // free of the usual fork-in-a-multithreaded-process hazards.
        match unsafe { libc::fork() } {
            -1 => return Err(Error::Io(io::Error::last_os_error())),
            0 => {
                return run_process(settings, listener, listener_fd, capacity, root_pid, false, Vec::new());
            }
            pid => child_pids.push(pid),
        }
    }

    run_process(settings, listener, listener_fd, capacity, root_pid, true, child_pids)
}

fn run_process(
    settings: Settings,
    listener: Listener,
    listener_fd: RawFd,
    capacity: usize,
    root_pid: libc::pid_t,
    is_root: bool,
    child_pids: Vec<libc::pid_t>,
) -> Result<()> {
    let reactor = Arc::new(MioReactor::new(capacity).map_err(Error::Io)?);
    reactor
        .register(listener_fd, Mode::Readable)
        .map_err(Error::Io)?;

    let table = ConnectionTable::new(capacity);
    let server = Server::new(settings, table, reactor, listener_fd, root_pid, is_root);
    for pid in child_pids {
        server.record_child(pid);
    }
    server.init_pool();
    register_server(server.clone());

    let stop_flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(e) = signal_hook::flag::register(signal, stop_flag.clone()) {
            warn!("failed to install handler for signal {signal}: {e}");
        }
    }

    if let Some(on_init) = server.settings().on_init {
        on_init(&server);
    }

    let run_result = run_loop(&server, &listener, &stop_flag);
    if let Err(e) = &run_result {
        error!("reactor loop exited with error: {e}");
    }

    shutdown(&server);
    unregister_server(&server);

    if let Some(on_finish) = server.settings().on_finish {
        on_finish(&server);
    }

    info!("process {} shut down cleanly", std::process::id());
    run_result
}

fn run_loop<L: TcpListener<Stream>>(
    server: &Server,
    listener: &L,
    stop_flag: &Arc<AtomicBool>,
) -> Result<()> {
    let mut last_tick = Instant::now();

    loop {
        if stop_flag.load(Ordering::Acquire) {
            debug!("signal received, invoking stop_all");
            crate::stop_all();
        }
        if server.is_stopping() {
            break;
        }

        let events = server
            .reactor()
            .wait(Some(TICK_INTERVAL))
            .map_err(Error::Io)?;

        for event in &events {
            dispatch_event(server, listener, event);
        }

        let now = Instant::now();
        if now.duration_since(last_tick) >= TICK_INTERVAL {
            tick_timeouts(server);
            last_tick = now;
        }

        if let Some(on_tick) = server.settings().on_tick {
            on_tick(server);
        }

        if events.is_empty() {
            if let Some(on_idle) = server.settings().on_idle {
                on_idle(server);
            }
        }
    }
    Ok(())
}

fn dispatch_event<L: TcpListener<Stream>>(server: &Server, listener: &L, event: &ReadinessEvent) {
    if event.fd == server.listener_fd() {
        accept_all(server, listener);
        return;
    }

    if server.is_timer(event.fd) {
        server.fire_timer(event.fd);
        return;
    }

    // hup takes precedence over readable/writable (§4.1).
    if event.hup {
        trace!("hup on fd {}", event.fd);
        finish_close(server, event.fd);
        return;
    }

    if event.readable {
        dispatch_on_data(server, event.fd);
    }
    if event.writable {
        dispatch_writable(server, event.fd);
    }
}

fn accept_all<L: TcpListener<Stream>>(server: &Server, listener: &L) {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                let fd = stream.as_raw_fd();
                if fd as usize >= server.capacity() {
                    warn!("accepted fd {fd} exceeds connection table capacity, refusing");
                    reject_connection(server, stream);
                    continue;
                }

                let protocol = server.settings().protocol;
                match push_connection(server, fd, stream, protocol) {
                    Ok(()) => {
                        trace!("accepted {addr} as fd {fd}");
                        if let Some(on_open) = protocol.on_open {
                            schedule_unprotected(server, fd, move |s, fd| on_open(s, fd));
                        }
                    }
                    Err(e) => warn!("failed to register accepted fd {fd}: {e}"),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) => {
                warn!("accept() failed: {e}");
                return;
            }
        }
    }
}

/// Writes `busy_msg`, if configured, to a connection refused for
/// capacity reasons, then drops it — closing the fd without the
/// connection ever having entered the table (§4.8, §7).
fn reject_connection(server: &Server, mut stream: Stream) {
    if let Some(msg) = server.settings().busy_msg {
        let _ = std::io::Write::write_all(&mut stream, msg);
    }
}

fn dispatch_on_data(server: &Server, fd: RawFd) {
    let Some(protocol) = server.get_protocol(fd) else {
        return;
    };
    let Some(on_data) = protocol.on_data else {
        return;
    };
    if server
        .fd_task(fd, move |s, fd| on_data(s, fd), None::<fn(&Server, RawFd)>)
        .is_err()
    {
        warn!("task queue full dispatching on_data for fd {fd}");
    }
}

/// What a writable-edge dispatch found after draining, decided while
/// still holding the fd's lock so the protocol/closing state reported
/// can't change out from under the caller before it's acted on.
enum Writable {
    Fatal,
    ReadyToClose,
    Pending,
    Ready(&'static crate::protocol::Protocol),
}

fn dispatch_writable(server: &Server, fd: RawFd) {
    let Some(slot) = server.table().lookup(fd) else {
        return;
    };

    let outcome = slot.with_unprotected(|conn| {
        if matches!(conn.drain(), DrainOutcome::Fatal) {
            return Writable::Fatal;
        }
        if !conn.write_queue_is_empty() {
            return Writable::Pending;
        }
        if conn.is_closing() {
            Writable::ReadyToClose
        } else {
            Writable::Ready(conn.protocol())
        }
    });

    match outcome {
        Writable::Fatal => {
            warn!("fatal write error on fd {fd}, closing");
            finish_close(server, fd);
        }
        Writable::ReadyToClose => finish_close(server, fd),
        Writable::Pending => {}
        Writable::Ready(protocol) => {
            if let Some(on_ready) = protocol.on_ready {
                schedule_unprotected(server, fd, move |s, fd| on_ready(s, fd));
            }
        }
    }
}

/// Decrements every occupied fd's timeout tick once (called once per
/// reactor-loop tick, approximating "once per second" via the 1-second
/// `wait()` timeout). A fd whose counter reaches zero gets `ping` if its
/// protocol defines one — the protocol gets a chance to `touch` and keep
/// the connection alive — else is closed (§4.8, §7).
fn tick_timeouts(server: &Server) {
    for fd in server.table().snapshot(None) {
        let Some(slot) = server.table().lookup(fd) else {
            continue;
        };

        let (fired, protocol) = slot.with_unprotected(|conn| (conn.tick(), conn.protocol()));
        if !fired {
            continue;
        }

        match protocol.ping {
            Some(ping) => schedule_unprotected(server, fd, move |s, fd| ping(s, fd)),
            None => {
                debug!("timeout fired on fd {fd} with no ping callback, closing");
                server.close(fd);
            }
        }
    }
}

/// Tears a no-longer-needed fd down: unregisters it from the reactor,
/// releases its table slot, and schedules its protocol's `on_close`
/// (§4.2, invariant 4). Called once a closing connection's write queue
/// has drained (or a write hook faulted), or directly for a fd that hit
/// `hup`.
pub(crate) fn finish_close(server: &Server, fd: RawFd) {
    let _ = server.reactor().unregister(fd);
    let Some(slot) = server.table().release(fd) else {
        return;
    };
    let protocol = slot.with_unprotected(|conn| conn.protocol());
    drop(slot);

    if let Some(on_close) = protocol.on_close {
        if server.run_async(move |s| on_close(s, fd)).is_err() {
            warn!("task queue full scheduling on_close for fd {fd}, running inline");
            on_close(server, fd);
        }
    }
}

/// Synchronously drains whatever remains queued on `fd`, for use during
/// process shutdown after the reactor loop has already stopped driving
/// writable events. Closes the fd once the queue empties or a hook
/// faults.
fn drain_to_completion(server: &Server, fd: RawFd) {
    loop {
        let Some(slot) = server.table().lookup(fd) else {
            return;
        };

        let fatal = slot.with_unprotected(|conn| matches!(conn.drain(), DrainOutcome::Fatal));
        if fatal {
            finish_close(server, fd);
            return;
        }

        let empty = slot.with_unprotected(|conn| conn.write_queue_is_empty());
        if empty {
            finish_close(server, fd);
            return;
        }

        std::thread::yield_now();
    }
}

/// Runs the graceful-shutdown sequence (§4.8): forwards `SIGTERM` to any
/// forked children (root process only, ahead of its own teardown, per
/// §4.8.1), runs `on_shutdown` for every active connection, closes them
/// all (draining synchronously, since the reactor loop has already
/// exited), releases outstanding timers, joins the thread pool, then
/// reaps children.
fn shutdown(server: &Server) {
    if server.is_root() {
        for pid in server.child_pids() {
            // SAFETY: `pid` was recorded from a `fork()` this same
            // process performed; sending it SIGTERM is a normal, always-
            // valid use of `kill(2)`.
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
    }

    debug!("running on_shutdown for active connections");
    for fd in server.table().snapshot(None) {
        let Some(slot) = server.table().lookup(fd) else {
            continue;
        };
        let protocol = slot.with_unprotected(|conn| conn.protocol());
        if let Some(on_shutdown) = protocol.on_shutdown {
            schedule_unprotected(server, fd, move |s, fd| on_shutdown(s, fd));
        }
    }

    for fd in server.table().snapshot(None) {
        server.close(fd);
        drain_to_completion(server, fd);
    }

    server.release_all_timers();
    server.pool().shutdown();

    if server.is_root() {
        for pid in server.child_pids() {
            let mut status = 0;
            // SAFETY: `pid` is a child this process forked and has not
            // yet been reaped; `status` is a valid out-parameter.
            unsafe {
                libc::waitpid(pid, &mut status, 0);
            }
        }
    }

    let _ = server.reactor().unregister(server.listener_fd());
    info!("shutdown sequence complete");
}
