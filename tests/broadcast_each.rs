//! Exercises `Server::each`: a line received from one connection is
//! broadcast to every other connection sharing the protocol's service
//! name, and not echoed back to its sender (the broadcast scenario).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::fd::RawFd;
use std::thread;
use std::time::Duration;

use reactor_server::{listen, Protocol, Server, Settings};

static ROOM: Protocol = Protocol {
    on_data: Some(|server, fd| {
        let mut buf = [0u8; 64];
        let n = match server.read(fd, &mut buf) {
            Ok(n) if n > 0 => n,
            _ => return,
        };
        let line = buf[..n].to_vec();
        server.each(
            Some("broadcast-test"),
            move |s: &Server, other: RawFd| {
                if other != fd {
                    let _ = s.write(other, &line);
                }
            },
            None::<fn(&Server, RawFd)>,
        );
    }),
    ..Protocol::empty("broadcast-test")
};

#[test]
fn broadcasts_to_every_other_connection() {
    thread::spawn(|| {
        let settings = Settings::builder(&ROOM).port(18086).build();
        let _ = listen(settings);
    });
    thread::sleep(Duration::from_millis(200));

    let mut a = TcpStream::connect("127.0.0.1:18086").expect("connect a");
    let mut b = TcpStream::connect("127.0.0.1:18086").expect("connect b");
    thread::sleep(Duration::from_millis(100));

    a.write_all(b"hello from a").unwrap();

    b.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = [0u8; 32];
    let n = b.read(&mut buf).expect("b should receive the broadcast");
    assert_eq!(&buf[..n], b"hello from a");

    a.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    let result = a.read(&mut buf);
    assert!(
        matches!(result, Err(e) if e.kind() == std::io::ErrorKind::WouldBlock),
        "sender should not receive its own broadcast"
    );
}
