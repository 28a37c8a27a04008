//! Exercises urgent-insert ordering: `write_urgent` lands immediately
//! after the current head packet rather than at the tail, even when
//! queued entirely before any drain has run (the urgent-interleave
//! scenario).

use std::io::Read;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use reactor_server::{listen, Protocol, Settings};

static URGENT: Protocol = Protocol {
    on_open: Some(|server, fd| {
        let _ = server.write(fd, b"HEAD");
        let _ = server.write(fd, b"TAIL");
        let _ = server.write_urgent(fd, b"URGENT");
    }),
    ..Protocol::empty("urgent-test")
};

#[test]
fn urgent_write_lands_after_head_packet() {
    thread::spawn(|| {
        let settings = Settings::builder(&URGENT).port(18082).build();
        let _ = listen(settings);
    });
    thread::sleep(Duration::from_millis(200));

    let mut stream = TcpStream::connect("127.0.0.1:18082").expect("connect");

    let mut buf = Vec::new();
    let mut chunk = [0u8; 64];
    while buf.len() < b"HEADURGENTTAIL".len() {
        let n = stream.read(&mut chunk).expect("read");
        assert!(n > 0, "server closed before sending everything");
        buf.extend_from_slice(&chunk[..n]);
    }

    assert_eq!(buf, b"HEADURGENTTAIL");
}
