//! Exercises `set_protocol`: the old protocol's `on_close` must run,
//! then the new protocol must take over `on_data`, in that order, all
//! before the triggering `on_data` call returns (the protocol-switch
//! scenario).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use reactor_server::{Protocol, Settings};

static SEQUENCE: AtomicU32 = AtomicU32::new(0);

static PROTO_B: Protocol = Protocol {
    on_open: Some(|_server, _fd| {
        // Runs only after PROTO_A's on_close, per set_protocol's contract.
        SEQUENCE.compare_exchange(1, 2, Ordering::SeqCst, Ordering::SeqCst).ok();
    }),
    on_data: Some(|server, fd| {
        let mut buf = [0u8; 64];
        if let Ok(n) = server.read(fd, &mut buf) {
            if n > 0 {
                let mut reply = b"B:".to_vec();
                reply.extend_from_slice(&buf[..n]);
                let _ = server.write(fd, &reply);
            }
        }
    }),
    ..Protocol::empty("proto-b")
};

static PROTO_A: Protocol = Protocol {
    on_close: Some(|_server, _fd| {
        SEQUENCE.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst).ok();
    }),
    on_data: Some(|server, fd| {
        let mut buf = [0u8; 64];
        let n = match server.read(fd, &mut buf) {
            Ok(n) if n > 0 => n,
            _ => return,
        };
        if &buf[..n] == b"switch" {
            let _ = server.set_protocol(fd, &PROTO_B);
        } else {
            let _ = server.write(fd, b"A");
        }
    }),
    ..Protocol::empty("proto-a")
};

#[test]
fn set_protocol_runs_close_then_open_before_handing_off_data() {
    thread::spawn(|| {
        let settings = Settings::builder(&PROTO_A).port(18083).build();
        let _ = reactor_server::listen(settings);
    });
    thread::sleep(Duration::from_millis(200));

    let mut stream = TcpStream::connect("127.0.0.1:18083").expect("connect");

    stream.write_all(b"switch").unwrap();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(SEQUENCE.load(Ordering::SeqCst), 2);

    stream.write_all(b"ping").unwrap();
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).expect("read from proto B");
    assert_eq!(&buf[..n], b"B:ping");
}
