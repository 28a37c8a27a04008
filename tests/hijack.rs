//! Exercises `Server::hijack`: once a fd is hijacked, the server no
//! longer references it — `on_close` never fires for it — and the
//! caller is free to drive it directly as a raw fd (the hijack
//! scenario).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::FromRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use reactor_server::{listen, Protocol, Settings};

static ON_CLOSE_CALLED: AtomicBool = AtomicBool::new(false);

static HIJACKING: Protocol = Protocol {
    on_close: Some(|_server, _fd| {
        ON_CLOSE_CALLED.store(true, Ordering::SeqCst);
    }),
    on_data: Some(|server, fd| {
        let mut buf = [0u8; 64];
        let n = match server.read(fd, &mut buf) {
            Ok(n) if n > 0 => n,
            _ => return,
        };
        if &buf[..n] != b"hijack" {
            return;
        }
        if let Some(raw) = server.hijack(fd) {
            // SAFETY: `hijack` just handed back sole ownership of this fd;
            // the server will never touch it again.
            let mut taken = unsafe { TcpStream::from_raw_fd(raw) };
            let _ = taken.write_all(b"raw bytes after hijack");
        }
    }),
    ..Protocol::empty("hijack-test")
};

#[test]
fn hijacked_fd_is_driven_directly_and_never_closed_by_the_server() {
    thread::spawn(|| {
        let settings = Settings::builder(&HIJACKING).port(18087).build();
        let _ = listen(settings);
    });
    thread::sleep(Duration::from_millis(200));

    let mut stream = TcpStream::connect("127.0.0.1:18087").expect("connect");
    stream.write_all(b"hijack").unwrap();

    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).expect("read raw bytes");
    assert_eq!(&buf[..n], b"raw bytes after hijack");

    thread::sleep(Duration::from_millis(200));
    assert!(
        !ON_CLOSE_CALLED.load(Ordering::SeqCst),
        "on_close must not fire for a hijacked fd"
    );
}
