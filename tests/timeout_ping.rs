//! Exercises the per-connection timeout: an idle connection's `ping`
//! callback fires once its ticks reach zero, and the bytes it queues are
//! allowed to drain before the fd is finally closed (the timeout/ping
//! scenario).

use std::io::Read;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use reactor_server::{listen, Protocol, Settings};

static PINGER: Protocol = Protocol {
    ping: Some(|server, fd| {
        let _ = server.write(fd, b"PING");
        server.close(fd);
    }),
    ..Protocol::empty("ping-test")
};

#[test]
fn idle_connection_receives_ping_then_closes() {
    thread::spawn(|| {
        let settings = Settings::builder(&PINGER).port(18085).timeout(1).build();
        let _ = listen(settings);
    });
    thread::sleep(Duration::from_millis(200));

    let mut stream = TcpStream::connect("127.0.0.1:18085").expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).expect("read ping bytes");
    assert_eq!(&buf[..n], b"PING");

    let n = stream.read(&mut buf).expect("read eof after ping");
    assert_eq!(n, 0, "server should close after the queued ping drains");
}
