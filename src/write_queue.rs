//! The per-connection asynchronous write buffer: a FIFO of packets drained
//! under writable readiness, with urgent insertion and file-chunked
//! sending, per §4.3. An explicit queue of packets rather than one flat
//! buffer, so urgent inserts and file-backed packets can interleave with
//! plain writes without splitting them.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;

/// Bytes read from a file-backed packet per drain iteration, per §4.3.
const FILE_CHUNK: usize = 64 * 1024;

/// The payload of one queued write.
enum PacketData {
    /// In-memory bytes. Used for both `write` (copied at enqueue) and
    /// `write_move` (moved at enqueue) — by the time the bytes reach the
    /// queue there is no remaining distinction, since the `Vec` is already
    /// server-owned either way.
    Memory(Vec<u8>),
    /// A file whose remaining contents are streamed out in
    /// [`FILE_CHUNK`]-sized pieces. Closed (via `Drop`) on EOF or when the
    /// connection closes with the packet still queued.
    File(File),
}

/// One atomic entry in a connection's write queue.
struct Packet {
    data: PacketData,
    /// Byte offset already sent from the *current* in-memory chunk. For
    /// `Memory`, this indexes into the `Vec` directly; for `File`, it
    /// indexes into the last chunk read from disk (see `pending`).
    offset: usize,
    /// For `File` packets, the most recently read chunk not yet fully
    /// flushed to the hook.
    pending: Vec<u8>,
}

impl Packet {
    fn memory(data: Vec<u8>) -> Self {
        Packet {
            data: PacketData::Memory(data),
            offset: 0,
            pending: Vec::new(),
        }
    }

    fn file(file: File) -> Self {
        Packet {
            data: PacketData::File(file),
            offset: 0,
            pending: Vec::new(),
        }
    }
}

/// Result of attempting one hook invocation against the head packet.
pub enum DrainOutcome {
    /// The queue fully drained; no bytes remain to send.
    Empty,
    /// The head packet's hook returned 0 (transient): stop for now, wait
    /// for the next writable edge.
    WouldBlock,
    /// The head packet's hook returned a fatal (negative) result: the
    /// connection must close.
    Fatal,
    /// Bytes remain queued, but progress was made this call and the
    /// caller may choose to keep draining (used by tests; the
    /// orchestrator drains to `Empty`/`WouldBlock`/`Fatal`).
    Progressed,
}

/// A per-connection FIFO of write packets.
#[derive(Default)]
pub struct WriteQueue {
    packets: VecDeque<Packet>,
}

impl WriteQueue {
    /// A new, empty queue.
    pub fn new() -> Self {
        WriteQueue {
            packets: VecDeque::new(),
        }
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// `write`/`write_move`: enqueues `data` at the tail.
    pub fn push_back(&mut self, data: Vec<u8>) {
        self.packets.push_back(Packet::memory(data));
    }

    /// `sendfile`: enqueues a file at the tail, to be streamed in
    /// [`FILE_CHUNK`]-sized pieces starting from the file's current
    /// position.
    pub fn push_back_file(&mut self, file: File) {
        self.packets.push_back(Packet::file(file));
    }

    /// `write_urgent`/`write_move_urgent`: inserts `data` immediately
    /// after the current head packet (position 1), or at the front
    /// (position 0) if the queue is empty, per §4.3. Never splits an
    /// existing packet.
    pub fn push_urgent(&mut self, data: Vec<u8>) {
        let pos = if self.packets.is_empty() { 0 } else { 1 };
        self.packets.insert(pos, Packet::memory(data));
    }

    /// Drops every queued packet without sending, for use by
    /// [`crate::table::ConnectionTable::release`]. Files are closed via
    /// `Drop`.
    pub fn clear(&mut self) {
        self.packets.clear();
    }

    /// Drains the queue once against `hook`, a function with the
    /// transport-hook contract from §4.4: `Ok(n)` for `n > 0` bytes moved,
    /// `Ok(0)` for transient/no-progress, `Err(())` for fatal.
    ///
    /// Keeps invoking the hook against successive packets until the queue
    /// empties, a hook call returns `Ok(0)`, or a hook call returns
    /// `Err(())`.
    pub fn drain<F>(&mut self, mut hook: F) -> DrainOutcome
    where
        F: FnMut(&[u8]) -> Result<usize, ()>,
    {
        let mut progressed = false;

        loop {
            let Some(packet) = self.packets.front_mut() else {
                return if progressed {
                    DrainOutcome::Progressed
                } else {
                    DrainOutcome::Empty
                };
            };

            let chunk = match &mut packet.data {
                PacketData::Memory(buf) => &buf[packet.offset..],
                PacketData::File(file) => {
                    if packet.offset >= packet.pending.len() {
                        let mut buf = vec![0u8; FILE_CHUNK];
                        let read = match file.read(&mut buf) {
                            Ok(n) => n,
                            Err(_) => return DrainOutcome::Fatal,
                        };
                        if read == 0 {
                            // EOF: this packet is fully sent.
                            self.packets.pop_front();
                            progressed = true;
                            continue;
                        }
                        buf.truncate(read);
                        packet.pending = buf;
                        packet.offset = 0;
                    }
                    &packet.pending[packet.offset..]
                }
            };

            if chunk.is_empty() {
                // Fully sent in-memory packet; drop it and continue with the next.
                self.packets.pop_front();
                progressed = true;
                continue;
            }

            match hook(chunk) {
                Ok(0) => {
                    return if progressed {
                        DrainOutcome::Progressed
                    } else {
                        DrainOutcome::WouldBlock
                    }
                }
                Ok(n) => {
                    packet.offset += n;
                    progressed = true;

                    let exhausted = match &packet.data {
                        PacketData::Memory(buf) => packet.offset >= buf.len(),
                        PacketData::File(_) => packet.offset >= packet.pending.len(),
                    };

                    if exhausted {
                        match &packet.data {
                            PacketData::Memory(_) => {
                                self.packets.pop_front();
                            }
                            PacketData::File(_) => {
                                // Current chunk exhausted; the next loop
                                // iteration reads another chunk and
                                // detects EOF to finish the packet off.
                            }
                        }
                    }
                }
                Err(()) => return DrainOutcome::Fatal,
            }
        }
    }
}

/// Rewinds `file` to the start — used by tests to build deterministic
/// file-backed packets without relying on the caller having left the
/// cursor in a particular place.
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write as _};

    fn rewind(file: &mut File) {
        let _ = file.seek(SeekFrom::Start(0));
    }

    fn make_hook(cap: usize) -> impl FnMut(&[u8]) -> Result<usize, ()> {
        move |chunk| Ok(chunk.len().min(cap))
    }

    #[test]
    fn plain_writes_drain_in_order() {
        let mut q = WriteQueue::new();
        q.push_back(b"AAAA".to_vec());
        q.push_back(b"BBBB".to_vec());

        let mut seen = Vec::new();
        loop {
            match q.drain(|chunk| {
                seen.extend_from_slice(chunk);
                Ok(chunk.len())
            }) {
                DrainOutcome::Empty => break,
                DrainOutcome::Progressed => continue,
                _ => panic!("unexpected outcome"),
            }
        }

        assert_eq!(seen, b"AAAABBBB");
    }

    #[test]
    fn urgent_insert_lands_after_head() {
        let mut q = WriteQueue::new();
        q.push_back(b"HEAD".to_vec());
        q.push_back(b"TAIL".to_vec());
        q.push_urgent(b"URGENT".to_vec());

        let mut seen = Vec::new();
        loop {
            match q.drain(|chunk| {
                seen.extend_from_slice(chunk);
                Ok(chunk.len())
            }) {
                DrainOutcome::Empty => break,
                DrainOutcome::Progressed => continue,
                _ => panic!("unexpected outcome"),
            }
        }

        assert_eq!(seen, b"HEADURGENTTAIL");
    }

    #[test]
    fn urgent_insert_into_empty_queue_goes_first() {
        let mut q = WriteQueue::new();
        q.push_urgent(b"FIRST".to_vec());
        q.push_back(b"SECOND".to_vec());

        let mut seen = Vec::new();
        loop {
            match q.drain(|chunk| {
                seen.extend_from_slice(chunk);
                Ok(chunk.len())
            }) {
                DrainOutcome::Empty => break,
                DrainOutcome::Progressed => continue,
                _ => panic!("unexpected outcome"),
            }
        }

        assert_eq!(seen, b"FIRSTSECOND");
    }

    #[test]
    fn zero_return_stops_draining_mid_packet() {
        let mut q = WriteQueue::new();
        q.push_back(b"HELLO".to_vec());

        let mut calls = 0;
        let outcome = q.drain(|_| {
            calls += 1;
            Ok(0)
        });
        assert!(matches!(outcome, DrainOutcome::WouldBlock));
        assert_eq!(calls, 1);
        assert!(!q.is_empty());
    }

    #[test]
    fn negative_return_is_fatal() {
        let mut q = WriteQueue::new();
        q.push_back(b"HELLO".to_vec());

        let outcome = q.drain(|_| Err(()));
        assert!(matches!(outcome, DrainOutcome::Fatal));
    }

    #[test]
    fn file_packet_streams_then_closes() {
        let mut tmp = tempfile_for_test();
        tmp.write_all(b"file contents").unwrap();
        rewind(&mut tmp);

        let mut q = WriteQueue::new();
        q.push_back_file(tmp);

        let mut seen = Vec::new();
        let mut hook = make_hook(4096);
        loop {
            match q.drain(|chunk| {
                seen.extend_from_slice(chunk);
                hook(chunk)
            }) {
                DrainOutcome::Empty => break,
                DrainOutcome::Progressed => continue,
                _ => panic!("unexpected outcome in file drain"),
            }
        }

        assert_eq!(seen, b"file contents");
        assert!(q.is_empty());
    }

    fn tempfile_for_test() -> File {
        let mut path = std::env::temp_dir();
        path.push(format!("write_queue_test_{}", std::process::id()));
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .unwrap()
    }
}
