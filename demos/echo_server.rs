//! Minimal echo service: everything read from a connection is written
//! straight back to it, with a 30-second idle timeout.

use reactor_server::{listen, Protocol, Settings};

static ECHO: Protocol = Protocol {
    on_open: Some(|server, fd| {
        server.touch(fd);
    }),
    on_data: Some(|server, fd| {
        let mut buf = [0u8; 4096];
        match server.read(fd, &mut buf) {
            Ok(0) => {}
            Ok(n) => {
                server.touch(fd);
                let _ = server.write(fd, &buf[..n]);
            }
            Err(_) => {}
        }
    }),
    ping: Some(|server, fd| {
        server.close(fd);
    }),
    ..Protocol::empty("echo")
};

fn main() {
    env_logger::init();

    let settings = Settings::builder(&ECHO)
        .port(8080)
        .threads(std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
        .timeout(30)
        .build();

    if let Err(e) = listen(settings) {
        eprintln!("echo_server: {e}");
        std::process::exit(1);
    }
}
