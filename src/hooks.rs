//! Transport hooks: per-connection replacements for `read(2)`/`write(2)`,
//! used to splice in TLS, instrumentation, or test doubles without the
//! core knowing the difference. See §4.4.

use std::io::{self, ErrorKind};

/// The outcome of one hook invocation, matching the §4.4 contract:
/// positive byte counts, transient no-progress, or fatal.
pub enum HookResult {
    /// `n > 0` bytes were moved.
    Done(usize),
    /// `n == 0`: transient, no fatal error; don't re-invoke until the next
    /// readiness edge.
    WouldBlock,
    /// `n < 0`: fatal; the connection must close.
    Fatal,
}

/// A per-connection read replacement. Must attempt I/O on every
/// invocation — returning [`HookResult::Done`] without moving bytes stalls
/// the reader.
pub type ReadHook = Box<dyn FnMut(&mut [u8]) -> HookResult + Send>;

/// A per-connection write replacement. Must attempt I/O on every
/// invocation — returning [`HookResult::Done`] without moving bytes stalls
/// the drain (see §4.4).
pub type WriteHook = Box<dyn FnMut(&[u8]) -> HookResult + Send>;

/// Converts a raw `io::Result<usize>` from a blocking-unaware hook into
/// the §4.4 three-way contract: `WouldBlock` errors become
/// [`HookResult::WouldBlock`], other errors become [`HookResult::Fatal`].
pub fn classify_io_result(result: io::Result<usize>) -> HookResult {
    match result {
        Ok(n) => HookResult::Done(n),
        Err(e) if e.kind() == ErrorKind::WouldBlock => HookResult::WouldBlock,
        Err(e) if e.kind() == ErrorKind::Interrupted => HookResult::WouldBlock,
        Err(_) => HookResult::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_is_not_fatal() {
        let err = io::Error::from(ErrorKind::WouldBlock);
        assert!(matches!(
            classify_io_result(Err(err)),
            HookResult::WouldBlock
        ));
    }

    #[test]
    fn other_errors_are_fatal() {
        let err = io::Error::from(ErrorKind::ConnectionReset);
        assert!(matches!(classify_io_result(Err(err)), HookResult::Fatal));
    }

    #[test]
    fn positive_count_passes_through() {
        assert!(matches!(classify_io_result(Ok(42)), HookResult::Done(42)));
    }
}
