//! A line-oriented chat room: every line a client sends is broadcast to
//! every other connection sharing the "chat" service, via
//! [`reactor_server::Server::each`].

use reactor_server::{listen, Protocol, Settings};

static CHAT: Protocol = Protocol {
    on_open: Some(|server, fd| {
        server.touch(fd);
        let announcement = format!("fd {fd} joined\n").into_bytes();
        server.each(
            Some("chat"),
            move |s, other| {
                if other != fd {
                    let _ = s.write(other, &announcement);
                }
            },
            None::<fn(&reactor_server::Server, std::os::fd::RawFd)>,
        );
    }),
    on_data: Some(|server, fd| {
        let mut buf = [0u8; 4096];
        let n = match server.read(fd, &mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        server.touch(fd);

        let mut line = format!("fd {fd}: ").into_bytes();
        line.extend_from_slice(&buf[..n]);
        server.each(
            Some("chat"),
            move |s, other| {
                if other != fd {
                    let _ = s.write(other, &line);
                }
            },
            None::<fn(&reactor_server::Server, std::os::fd::RawFd)>,
        );
    }),
    on_close: Some(|server, fd| {
        let announcement = format!("fd {fd} left\n").into_bytes();
        server.each(
            Some("chat"),
            move |s, other| {
                let _ = s.write(other, &announcement);
            },
            None::<fn(&reactor_server::Server, std::os::fd::RawFd)>,
        );
    }),
    ping: Some(|server, fd| {
        server.close(fd);
    }),
    ..Protocol::empty("chat")
};

fn main() {
    env_logger::init();

    let settings = Settings::builder(&CHAT).port(9000).timeout(120).build();

    if let Err(e) = listen(settings) {
        eprintln!("chat_broadcast: {e}");
        std::process::exit(1);
    }
}
