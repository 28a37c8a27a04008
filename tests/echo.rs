//! Exercises the basic read -> write round trip over a real loopback
//! socket (the echo scenario).

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use reactor_server::{listen, Protocol, Settings};

static ECHO: Protocol = Protocol {
    on_data: Some(|server, fd| {
        let mut buf = [0u8; 1024];
        if let Ok(n) = server.read(fd, &mut buf) {
            if n > 0 {
                let _ = server.write(fd, &buf[..n]);
            }
        }
    }),
    ..Protocol::empty("echo-test")
};

#[test]
fn echoes_back_what_it_receives() {
    thread::spawn(|| {
        let settings = Settings::builder(&ECHO).port(18081).build();
        let _ = listen(settings);
    });
    thread::sleep(Duration::from_millis(200));

    let mut stream = TcpStream::connect("127.0.0.1:18081").expect("connect to echo server");
    stream.write_all(b"hello reactor").unwrap();

    let mut buf = [0u8; 32];
    let n = stream.read(&mut buf).expect("read echoed bytes");
    assert_eq!(&buf[..n], b"hello reactor");
}
