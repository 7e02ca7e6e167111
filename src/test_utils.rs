//! Shared helpers for unit tests that need real loopback sockets.

use std::net::{SocketAddr, TcpStream};
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use crate::connection::{Connections, Role};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging. Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// A registry listening on an ephemeral loopback port.
pub fn listening() -> (Connections, SocketAddr) {
    let mut conns = Connections::new().expect("poller");
    let addr = conns.start_listening(0, "127.0.0.1").expect("listen");
    (conns, addr)
}

/// Accept the next pending peer, retrying while the non-blocking listener
/// has nothing queued.
pub fn accept_stream(conns: &Connections) -> TcpStream {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match conns.accept() {
            Ok((stream, _)) => return stream,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock && Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => panic!("accept failed: {e}"),
        }
    }
}

/// Connect a client, accept it and register it as an upgraded peer.
///
/// Returns the peer's hash and the client side of the connection.
pub fn accept_peer(conns: &mut Connections) -> (String, TcpStream) {
    let addr = conns.local_addr().expect("listening");
    let client = TcpStream::connect(addr).expect("connect");
    let stream = accept_stream(conns);
    let id = conns
        .register_client(stream, Role::Peer, None)
        .expect("register");
    let hash = conns.get(id).expect("registered").hash().to_string();
    (hash, client)
}
