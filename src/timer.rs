//! One-shot and periodic timers (§4.6), implemented atop Linux
//! `timerfd_create`/`timerfd_settime` and registered with the reactor via
//! `mio::unix::SourceFd`, the same pattern the `net` traits use elsewhere
//! in this crate to bridge OS primitives into `mio` — grounded more
//! broadly in the habit of reaching for `libc` directly beneath a safe
//! wrapper seen elsewhere in the ecosystem (e.g. `enzoblain-Reactor`'s
//! dependency on bare `libc`).

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

use log::{trace, warn};

use crate::error::{Error, Result};
use crate::reactor::{Mode, Reactor};
use crate::Server;

/// Remaining repetitions for a periodic timer. `Infinite` corresponds to
/// `run_every(ms, 0, ..)`.
#[derive(Debug, Clone, Copy)]
enum Reps {
    Finite(u32),
    Infinite,
}

/// A single armed timer fd, tracked so the orchestrator can fire its task
/// and, for periodic timers, rearm or release it.
pub(crate) struct ArmedTimer {
    fd: RawFd,
    reps: Reps,
    task: Arc<dyn Fn(&Server) + Send + Sync>,
}

fn create_timerfd() -> io::Result<RawFd> {
    // SAFETY: no pointers involved; CLOCK_MONOTONIC + non-blocking/cloexec
    // flags are valid per `timerfd_create(2)`.
    let fd = unsafe {
        libc::timerfd_create(
            libc::CLOCK_MONOTONIC,
            libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn arm_timerfd(fd: RawFd, initial: Duration, interval: Duration) -> io::Result<()> {
    let spec = libc::itimerspec {
        it_interval: duration_to_timespec(interval),
        it_value: duration_to_timespec(initial),
    };
    // SAFETY: `fd` was just created by `create_timerfd`, `spec` is a
    // valid, fully-initialized `itimerspec`.
    if unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn duration_to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

/// Consumes the expiration counter so the fd doesn't keep reporting
/// readable. Per `timerfd_create(2)`, this is a mandatory 8-byte read.
fn drain_expirations(fd: RawFd) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    // SAFETY: `buf` is exactly the 8 bytes `timerfd` expects to produce.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, 8) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(u64::from_ne_bytes(buf))
}

fn close_fd(fd: RawFd) {
    // SAFETY: `fd` is a valid, still-open fd owned solely by the timer
    // that is being torn down.
    unsafe {
        libc::close(fd);
    }
}

/// `run_after`: creates a one-shot timer, registers it with `reactor`,
/// and returns its armed state for the orchestrator's timer table.
pub(crate) fn run_after(
    reactor: &dyn Reactor,
    ms: u64,
    task: impl Fn(&Server) + Send + Sync + 'static,
) -> Result<ArmedTimer> {
    let fd = create_timerfd().map_err(Error::Io)?;
    arm_timerfd(fd, Duration::from_millis(ms), Duration::ZERO).map_err(Error::Io)?;
    reactor.register(fd, Mode::Readable).map_err(Error::Io)?;

    Ok(ArmedTimer {
        fd,
        reps: Reps::Finite(1),
        task: Arc::new(task),
    })
}

/// `run_every`: creates a periodic timer. `reps == 0` means infinite,
/// matching §4.6; otherwise the timer releases its fd after the `reps`th
/// fire.
pub(crate) fn run_every(
    reactor: &dyn Reactor,
    ms: u64,
    reps: u32,
    task: impl Fn(&Server) + Send + Sync + 'static,
) -> Result<ArmedTimer> {
    let fd = create_timerfd().map_err(Error::Io)?;
    let interval = Duration::from_millis(ms);
    arm_timerfd(fd, interval, interval).map_err(Error::Io)?;
    reactor.register(fd, Mode::Readable).map_err(Error::Io)?;

    Ok(ArmedTimer {
        fd,
        reps: if reps == 0 {
            Reps::Infinite
        } else {
            Reps::Finite(reps)
        },
        task: Arc::new(task),
    })
}

impl ArmedTimer {
    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    /// Handles one readiness edge on this timer's fd: drains the
    /// expiration counter, enqueues the task, and reports whether the
    /// timer has exhausted its repetitions and should be released.
    pub(crate) fn fire(&mut self, server: &Server) -> bool {
        match drain_expirations(self.fd) {
            Ok(_) => {}
            Err(e) => {
                warn!("timer fd {} failed to drain expirations: {e}", self.fd);
                return true;
            }
        }

        let task = self.task.clone();
        if let Err(e) = server.pool().run_async(server, move |s| task(s)) {
            warn!("failed to enqueue timer task: {e}");
        }

        match &mut self.reps {
            Reps::Infinite => false,
            Reps::Finite(remaining) => {
                *remaining -= 1;
                *remaining == 0
            }
        }
    }

    pub(crate) fn release(&self, reactor: &dyn Reactor) {
        trace!("releasing timer fd {}", self.fd);
        let _ = reactor.unregister(self.fd);
        close_fd(self.fd);
    }
}
