//! Thin traits over listener/stream types, kept separate from `mio`'s own
//! types so the reactor and connection table can be driven by test doubles.

pub mod tcp_listener;
pub mod tcp_stream;
