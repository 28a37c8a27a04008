//! Protocols: the bundle of callbacks an application supplies to drive one
//! connection's behavior.

use std::os::fd::RawFd;

use crate::Server;

/// A per-connection callback. Re-enters the facade via `(server, fd)`
/// rather than holding a direct reference to the connection, matching the
/// non-owning, fd-indexed design described in the crate's design notes.
pub type Callback = fn(&Server, RawFd);

/// An immutable descriptor naming a service and up to six callbacks.
///
/// Any callback may be absent (`None`). Protocols are borrowed by
/// reference: applications construct them as `static` values, and a
/// connection's active protocol is a `&'static Protocol` for as long as
/// that connection exists, which is what the framework's borrow-checker
/// relies on to avoid any cyclic ownership between `Server`, `Connection`,
/// and `Protocol`.
#[derive(Debug)]
pub struct Protocol {
    /// Identity used by broadcast operations ([`crate::Server::each`],
    /// [`crate::Server::count`]). Connections on different protocols can
    /// share a service name to be targeted together.
    pub service: &'static str,
    /// Runs once, right after a connection is accepted or attached,
    /// before any other callback on that fd.
    pub on_open: Option<Callback>,
    /// Runs when the fd becomes readable and data is available. Runs
    /// "protected": serialized with any other task on the same fd, with
    /// `busy` set for the duration.
    pub on_data: Option<Callback>,
    /// Runs when the fd becomes writable and the write queue is empty —
    /// i.e. there was nothing to drain. Does not set `busy`.
    pub on_ready: Option<Callback>,
    /// Runs once per active fd during graceful shutdown, before the fd is
    /// closed.
    pub on_shutdown: Option<Callback>,
    /// Runs exactly once, as the last callback observed for a fd, unless
    /// the connection was [`hijack`](crate::Server::hijack)ed.
    pub on_close: Option<Callback>,
    /// Runs when a connection's timeout counter reaches zero, instead of
    /// closing the connection. Call [`crate::Server::touch`] to reset the
    /// counter and keep the connection alive.
    pub ping: Option<Callback>,
}

impl Protocol {
    /// A protocol with every callback absent and `service` as given.
    /// Useful as a base to override with struct-update syntax.
    pub const fn empty(service: &'static str) -> Self {
        Protocol {
            service,
            on_open: None,
            on_data: None,
            on_ready: None,
            on_shutdown: None,
            on_close: None,
            ping: None,
        }
    }
}
