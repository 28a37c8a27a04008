//! Server-wide settings.
//!
//! Settings are an in-process value, not a file format; parsing a config
//! file into one of these is an application concern, out of scope here.

use std::any::Any;

use crate::protocol::Protocol;

/// Callback invoked once per process after binding, before any connection
/// is accepted.
pub type InitHook = fn(&crate::Server);

/// Callback invoked once per process during shutdown, after every
/// connection has been closed and worker threads joined.
pub type FinishHook = fn(&crate::Server);

/// Callback invoked once per reactor tick (roughly once per `wait()`
/// return), regardless of whether any events fired.
pub type TickHook = fn(&crate::Server);

/// Callback invoked when a `wait()` call returned an empty event batch.
pub type IdleHook = fn(&crate::Server);

/// Callback invoked once on each worker thread, before it starts pulling
/// tasks off the queue.
pub type ThreadInitHook = fn(&crate::Server);

/// Callback invoked once on each worker thread during shutdown, after it
/// has drained whatever was left in the task queue and is about to exit.
pub type ThreadFinishHook = fn(&crate::Server);

/// Settings recognized by [`crate::listen`].
///
/// All fields besides `protocol` are optional and default as documented on
/// each field. Construct via [`Settings::new`] and override fields
/// directly, or via [`SettingsBuilder`] for a fluent style.
pub struct Settings {
    /// The default protocol assigned to newly-accepted connections.
    pub protocol: &'static Protocol,
    /// TCP port to bind. Default: `8080`.
    pub port: u16,
    /// Address to bind. `None` binds all interfaces (`0.0.0.0`).
    pub address: Option<std::net::IpAddr>,
    /// Runs once per process after bind, before accepting connections.
    pub on_init: Option<InitHook>,
    /// Runs once per process during shutdown.
    pub on_finish: Option<FinishHook>,
    /// Runs once per reactor tick.
    pub on_tick: Option<TickHook>,
    /// Runs when a `wait()` call returns no events.
    pub on_idle: Option<IdleHook>,
    /// Runs once on each worker thread at startup.
    pub on_init_thread: Option<ThreadInitHook>,
    /// Runs once on each worker thread during shutdown, after it has
    /// drained whatever remained queued.
    pub on_finish_thread: Option<ThreadFinishHook>,
    /// Message written to a connection, then closed, when accept() would
    /// exceed connection table capacity. `None` silently drops the
    /// connection instead.
    pub busy_msg: Option<&'static [u8]>,
    /// Opaque, process-wide user data, retrievable via the server handle.
    pub udata: Option<Box<dyn Any + Send + Sync>>,
    /// Worker threads per process. Default: `1` (see invariant 6: with
    /// `threads <= 1`, `run_async` executes inline on the caller's thread).
    pub threads: usize,
    /// Worker processes to fork. Default: `1` (no forking; parent serves).
    pub processes: usize,
    /// Default per-connection timeout, in seconds, `0..=255`. Default: `5`.
    pub timeout: u8,
}

impl Settings {
    /// Creates settings with every optional field at its documented
    /// default, for the given mandatory protocol.
    pub fn new(protocol: &'static Protocol) -> Self {
        Self {
            protocol,
            port: 8080,
            address: None,
            on_init: None,
            on_finish: None,
            on_tick: None,
            on_idle: None,
            on_init_thread: None,
            on_finish_thread: None,
            busy_msg: None,
            udata: None,
            threads: 1,
            processes: 1,
            timeout: 5,
        }
    }

    /// A fluent builder seeded with this crate's defaults.
    pub fn builder(protocol: &'static Protocol) -> SettingsBuilder {
        SettingsBuilder {
            settings: Settings::new(protocol),
        }
    }
}

/// Fluent builder over [`Settings`].
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Sets the bind port.
    pub fn port(mut self, port: u16) -> Self {
        self.settings.port = port;
        self
    }

    /// Sets the bind address.
    pub fn address(mut self, address: std::net::IpAddr) -> Self {
        self.settings.address = Some(address);
        self
    }

    /// Sets the process-init hook.
    pub fn on_init(mut self, hook: InitHook) -> Self {
        self.settings.on_init = Some(hook);
        self
    }

    /// Sets the process-shutdown hook.
    pub fn on_finish(mut self, hook: FinishHook) -> Self {
        self.settings.on_finish = Some(hook);
        self
    }

    /// Sets the per-tick hook.
    pub fn on_tick(mut self, hook: TickHook) -> Self {
        self.settings.on_tick = Some(hook);
        self
    }

    /// Sets the idle-tick hook.
    pub fn on_idle(mut self, hook: IdleHook) -> Self {
        self.settings.on_idle = Some(hook);
        self
    }

    /// Sets the per-thread-init hook.
    pub fn on_init_thread(mut self, hook: ThreadInitHook) -> Self {
        self.settings.on_init_thread = Some(hook);
        self
    }

    /// Sets the per-thread-shutdown hook.
    pub fn on_finish_thread(mut self, hook: ThreadFinishHook) -> Self {
        self.settings.on_finish_thread = Some(hook);
        self
    }

    /// Sets the busy message sent to connections refused at capacity.
    pub fn busy_msg(mut self, msg: &'static [u8]) -> Self {
        self.settings.busy_msg = Some(msg);
        self
    }

    /// Sets opaque process-wide user data.
    pub fn udata(mut self, udata: Box<dyn Any + Send + Sync>) -> Self {
        self.settings.udata = Some(udata);
        self
    }

    /// Sets the worker thread count.
    pub fn threads(mut self, threads: usize) -> Self {
        self.settings.threads = threads;
        self
    }

    /// Sets the worker process count.
    pub fn processes(mut self, processes: usize) -> Self {
        self.settings.processes = processes.max(1);
        self
    }

    /// Sets the default per-connection timeout in seconds.
    pub fn timeout(mut self, timeout: u8) -> Self {
        self.settings.timeout = timeout;
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> Settings {
        self.settings
    }
}
