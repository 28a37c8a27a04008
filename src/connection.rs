//! Per-fd connection state: the active protocol, opaque user data, the
//! write queue, transport hooks, and timeout bookkeeping. A single
//! hook-driven type per §3/§4.4 rather than a `Plain`/`Tls` enum, since
//! TLS is explicitly out of core (a transport hook instead).

use std::any::Any;
use std::os::fd::{IntoRawFd, RawFd};

use crate::hooks::{self, HookResult, ReadHook, WriteHook};
use crate::net::tcp_stream::TcpStream;
use crate::protocol::Protocol;
use crate::write_queue::{DrainOutcome, WriteQueue};

/// State for one managed fd. A `Connection` is alive iff the server
/// currently owns the fd — i.e. iff it is reachable through
/// [`crate::table::ConnectionTable::lookup`].
pub struct Connection<S: TcpStream> {
    fd: RawFd,
    /// `None` only after [`Connection::take_raw_fd`] has extracted it for
    /// [`crate::Server::hijack`]; every other path leaves this populated
    /// for the Connection's whole life.
    stream: Option<S>,
    protocol: &'static Protocol,
    udata: Option<Box<dyn Any + Send>>,
    /// Configured timeout, seconds, `0..=255`. `0` disables the timeout.
    timeout: u8,
    /// Ticks remaining before `ping`/close fires; reset by `touch`.
    ticks: u8,
    queue: WriteQueue,
    read_hook: Option<ReadHook>,
    write_hook: Option<WriteHook>,
    /// Set by `close()`; writes continue draining, but once the queue
    /// empties (or a hook faults) the fd is torn down instead of waiting
    /// for `on_ready`.
    closing: bool,
}

impl<S: TcpStream> Connection<S> {
    /// Builds a freshly-accepted or attached connection. `timeout` seeds
    /// the tick counter identically, per [`crate::table::ConnectionTable::reserve`]'s
    /// contract of resetting both together.
    pub fn new(fd: RawFd, stream: S, protocol: &'static Protocol, timeout: u8) -> Self {
        Connection {
            fd,
            stream: Some(stream),
            protocol,
            udata: None,
            timeout,
            ticks: timeout,
            queue: WriteQueue::new(),
            read_hook: None,
            write_hook: None,
            closing: false,
        }
    }

    /// The managed fd.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// The currently active protocol.
    pub fn protocol(&self) -> &'static Protocol {
        self.protocol
    }

    /// Swaps in a new protocol. Callers (see [`crate::Server::set_protocol`])
    /// are responsible for invoking `on_close`/`on_open` around this call
    /// while holding the slot lock, per §4.7.
    pub fn set_protocol(&mut self, protocol: &'static Protocol) {
        self.protocol = protocol;
    }

    /// Borrows the opaque user data.
    pub fn udata(&self) -> Option<&(dyn Any + Send)> {
        self.udata.as_deref()
    }

    /// Replaces the opaque user data, returning the previous value.
    pub fn set_udata(&mut self, udata: Option<Box<dyn Any + Send>>) -> Option<Box<dyn Any + Send>> {
        std::mem::replace(&mut self.udata, udata)
    }

    /// Resets the remaining-ticks counter to the configured timeout
    /// (`touch`).
    pub fn touch(&mut self) {
        self.ticks = self.timeout;
    }

    /// Sets the configured timeout in seconds, `0..=255`, and immediately
    /// resets the tick counter to match.
    pub fn set_timeout(&mut self, timeout: u8) {
        self.timeout = timeout;
        self.ticks = timeout;
    }

    /// Called once per second by the orchestrator's tick loop. Returns
    /// `true` exactly when the counter has just reached zero (timeout has
    /// fired) — timeout disabled (`0`) never fires.
    pub fn tick(&mut self) -> bool {
        if self.timeout == 0 {
            return false;
        }
        self.ticks = self.ticks.saturating_sub(1);
        self.ticks == 0
    }

    /// Installs per-fd transport hooks, replacing the default `read(2)`/
    /// `write(2)` behavior (§4.4). Passing `None` restores the default for
    /// that direction.
    pub fn set_hooks(&mut self, read: Option<ReadHook>, write: Option<WriteHook>) {
        self.read_hook = read;
        self.write_hook = write;
    }

    /// Clears both hooks, restoring default socket I/O. Called
    /// automatically on close, per §4.4.
    pub fn clear_hooks(&mut self) {
        self.read_hook = None;
        self.write_hook = None;
    }

    /// Reads up to `buf.len()` bytes via the active hook (or the default
    /// socket read). Returns `Ok(n)` for bytes read (`0` means transient,
    /// matching §4.4's `n == 0` contract — NOT end-of-stream, which a
    /// reactor `hup` event signals instead), `Err(())` for fatal.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, ()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(());
        };
        let outcome = match &mut self.read_hook {
            Some(hook) => hook(buf),
            None => hooks::classify_io_result(std::io::Read::read(stream, buf)),
        };
        match outcome {
            HookResult::Done(n) => Ok(n),
            HookResult::WouldBlock => Ok(0),
            HookResult::Fatal => Err(()),
        }
    }

    /// `write`: copies `data` and enqueues at the tail.
    pub fn write(&mut self, data: &[u8]) {
        self.queue.push_back(data.to_vec());
    }

    /// `write_move`: takes ownership of `data` and enqueues at the tail.
    pub fn write_move(&mut self, data: Vec<u8>) {
        self.queue.push_back(data);
    }

    /// `write_urgent`: copies `data` and inserts after the current head
    /// packet (§4.3).
    pub fn write_urgent(&mut self, data: &[u8]) {
        self.queue.push_urgent(data.to_vec());
    }

    /// `write_move_urgent`: takes ownership of `data` and inserts after
    /// the current head packet (§4.3).
    pub fn write_move_urgent(&mut self, data: Vec<u8>) {
        self.queue.push_urgent(data);
    }

    /// `sendfile`: takes ownership of `file` and enqueues it at the tail,
    /// to be streamed out in chunks.
    pub fn sendfile(&mut self, file: std::fs::File) {
        self.queue.push_back_file(file);
    }

    /// True if nothing is queued to send.
    pub fn write_queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Marks the connection as closing: writes already queued continue to
    /// drain, but once the queue empties the orchestrator tears the fd
    /// down instead of waiting for `on_ready`.
    pub fn begin_close(&mut self) {
        self.closing = true;
    }

    /// True once [`Connection::begin_close`] has been called.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Drains the write queue once against the active write hook (or the
    /// default socket write), per §4.3.
    pub fn drain(&mut self) -> DrainOutcome {
        let Some(stream) = self.stream.as_mut() else {
            return DrainOutcome::Fatal;
        };
        let write_hook = &mut self.write_hook;
        self.queue.drain(|chunk| match write_hook {
            Some(hook) => match hook(chunk) {
                HookResult::Done(n) => Ok(n),
                HookResult::WouldBlock => Ok(0),
                HookResult::Fatal => Err(()),
            },
            None => match hooks::classify_io_result(std::io::Write::write(stream, chunk)) {
                HookResult::Done(n) => Ok(n),
                HookResult::WouldBlock => Ok(0),
                HookResult::Fatal => Err(()),
            },
        })
    }

    /// Extracts the underlying stream's raw fd for [`crate::Server::hijack`]
    /// (§4.3), without closing it: `IntoRawFd::into_raw_fd` consumes the
    /// stream and hands back the bare fd rather than running the stream's
    /// `Drop`, so the caller — which is about to take over the same fd
    /// number directly — doesn't race a `close(2)` run by this connection's
    /// own eventual drop. Leaves `self` with no stream; `read`/`drain`
    /// report `Fatal`/`Err(())` if called afterward, which should never
    /// happen once the table has released this fd's slot.
    pub fn take_raw_fd(&mut self) -> Option<RawFd> {
        self.stream.take().map(S::into_raw_fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Read, Write};
    use std::net::SocketAddr;
    use std::os::fd::AsRawFd;

    /// An in-memory double implementing [`TcpStream`], so connection and
    /// write-queue behavior can be tested without real sockets.
    struct MockStream {
        read_buf: std::collections::VecDeque<u8>,
        written: Vec<u8>,
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.read_buf.len().min(buf.len());
            for (slot, byte) in buf.iter_mut().zip(self.read_buf.drain(..n)) {
                *slot = byte;
            }
            if n == 0 {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            } else {
                Ok(n)
            }
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl AsRawFd for MockStream {
        fn as_raw_fd(&self) -> RawFd {
            3
        }
    }

    impl IntoRawFd for MockStream {
        fn into_raw_fd(self) -> RawFd {
            3
        }
    }

    impl TcpStream for MockStream {
        fn connect(_addr: SocketAddr) -> io::Result<Self> {
            unimplemented!("mock stream is never dialed out")
        }
        fn peer_addr(&self) -> io::Result<SocketAddr> {
            Ok("127.0.0.1:0".parse().unwrap())
        }
        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok("127.0.0.1:0".parse().unwrap())
        }
        fn shutdown(&self, _how: std::net::Shutdown) -> io::Result<()> {
            Ok(())
        }
        fn set_nodelay(&self, _nodelay: bool) -> io::Result<()> {
            Ok(())
        }
        fn nodelay(&self) -> io::Result<bool> {
            Ok(true)
        }
        fn set_ttl(&self, _ttl: u32) -> io::Result<()> {
            Ok(())
        }
        fn ttl(&self) -> io::Result<u32> {
            Ok(64)
        }
        fn take_error(&self) -> io::Result<Option<io::Error>> {
            Ok(None)
        }
        fn peek(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    static ECHO: Protocol = Protocol::empty("echo");

    fn mock() -> MockStream {
        MockStream {
            read_buf: std::collections::VecDeque::new(),
            written: Vec::new(),
        }
    }

    #[test]
    fn touch_resets_ticks_before_timeout() {
        let mut conn = Connection::new(3, mock(), &ECHO, 2);
        assert!(!conn.tick()); // 2 -> 1
        conn.touch();
        assert!(!conn.tick()); // 2 -> 1 again
        assert!(conn.tick()); // 1 -> 0, fires
    }

    #[test]
    fn zero_timeout_never_fires() {
        let mut conn = Connection::new(3, mock(), &ECHO, 0);
        for _ in 0..10 {
            assert!(!conn.tick());
        }
    }

    #[test]
    fn write_then_drain_reaches_stream() {
        let mut conn = Connection::new(3, mock(), &ECHO, 5);
        conn.write(b"hello");
        let outcome = conn.drain();
        assert!(matches!(outcome, DrainOutcome::Progressed | DrainOutcome::Empty));
        assert!(conn.write_queue_is_empty());
    }

    #[test]
    fn read_would_block_yields_zero_not_error() {
        let mut conn = Connection::new(3, mock(), &ECHO, 5);
        let mut buf = [0u8; 16];
        assert_eq!(conn.read(&mut buf), Ok(0));
    }

    #[test]
    fn take_raw_fd_relinquishes_the_stream_without_closing_it() {
        let mut conn = Connection::new(3, mock(), &ECHO, 5);
        assert_eq!(conn.take_raw_fd(), Some(3));
        // The stream is gone; a second take (and any further I/O) reports
        // the connection as already relinquished rather than panicking.
        assert_eq!(conn.take_raw_fd(), None);
        assert_eq!(conn.read(&mut [0u8; 1]), Err(()));
        assert!(matches!(conn.drain(), DrainOutcome::Fatal));
    }
}
