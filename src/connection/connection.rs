//! A single registered socket and its per-connection state.
//!
//! Peer streams stay non-blocking for the drain-read; [`Connection::send`]
//! switches to blocking mode for the duration of one frame so a frame is
//! either written whole or the connection is marked broken.

use std::cell::Cell;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::connection::{ConnectionId, Role};
use crate::protocol::handshake::header_end;

/// The OS socket behind a connection.
#[derive(Debug)]
pub(crate) enum Socket {
    Listener(TcpListener),
    Stream(TcpStream),
}

/// One live transport endpoint owned by the registry.
///
/// ## Example
///
/// ```rust,ignore
/// let conn = connections.client_by_hash(&hash).unwrap();
/// conn.send(&wsdaemon::protocol::frame::mask("hi"))?;
/// ```
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    hash: String,
    role: Role,
    socket: Socket,
    pending: BytesMut,
    accepted_at: Instant,
    broken: Cell<bool>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, hash: String, role: Role, socket: Socket) -> Self {
        Self {
            id,
            hash,
            role,
            socket,
            pending: BytesMut::new(),
            accepted_at: Instant::now(),
            broken: Cell::new(false),
        }
    }

    /// Registry-assigned identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The connection hash this entry is registered under.
    #[inline]
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Current role.
    #[inline]
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub(crate) fn socket(&self) -> &Socket {
        &self.socket
    }

    /// The peer stream, or `None` for the listening socket.
    #[must_use]
    pub fn stream(&self) -> Option<&TcpStream> {
        match &self.socket {
            Socket::Stream(stream) => Some(stream),
            Socket::Listener(_) => None,
        }
    }

    pub(crate) fn listener(&self) -> Option<&TcpListener> {
        match &self.socket {
            Socket::Listener(listener) => Some(listener),
            Socket::Stream(_) => None,
        }
    }

    /// Local address of the socket.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the address cannot be read.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.socket {
            Socket::Listener(listener) => listener.local_addr(),
            Socket::Stream(stream) => stream.local_addr(),
        }
    }

    /// Remote address of a peer.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` for the listening socket, or the OS error once
    /// the peer has been torn down.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match &self.socket {
            Socket::Stream(stream) => stream.peer_addr(),
            Socket::Listener(_) => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    /// Time since the socket was registered.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    /// Check if a frame was cut short on this stream.
    ///
    /// A broken connection is no longer written to and is evicted by the
    /// event loop at the end of the tick.
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.broken.get()
    }

    /// Write an already framed message in full.
    ///
    /// The stream blocks for the write, bounded by the registry's send
    /// timeout. If the write fails after part of the frame went out, the
    /// connection is marked broken.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the write fails, `BrokenPipe` if the
    /// connection is already broken, or `Unsupported` for the listening
    /// socket.
    pub fn send(&self, frame: &[u8]) -> io::Result<()> {
        let stream = match &self.socket {
            Socket::Stream(stream) => stream,
            Socket::Listener(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "cannot write to a listening socket",
                ));
            }
        };
        if self.is_broken() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "an earlier frame was cut short",
            ));
        }

        stream.set_nonblocking(false)?;
        let result = write_frame(stream, frame);
        let restored = stream.set_nonblocking(true);

        match result {
            Ok(()) => {
                // A blocking stream would stall the drain-read.
                if restored.is_err() {
                    self.broken.set(true);
                }
                restored
            }
            Err((written, e)) => {
                if written > 0 || restored.is_err() {
                    tracing::warn!(
                        hash = %self.hash,
                        written,
                        expected = frame.len(),
                        error = %e,
                        "frame cut short, connection marked broken"
                    );
                    self.broken.set(true);
                }
                Err(e)
            }
        }
    }

    /// Shut down both directions of a peer stream. No-op for the listener.
    ///
    /// # Errors
    ///
    /// Returns the OS error; `NotConnected` means the peer was already gone.
    pub fn shutdown(&self) -> io::Result<()> {
        match &self.socket {
            Socket::Stream(stream) => stream.shutdown(Shutdown::Both),
            Socket::Listener(_) => Ok(()),
        }
    }

    /// Handshake bytes buffered so far.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub(crate) fn pending_mut(&mut self) -> &mut BytesMut {
        &mut self.pending
    }

    /// Split the complete header block off the pending buffer, leaving any
    /// bytes that followed it.
    pub(crate) fn take_header(&mut self) -> Option<Bytes> {
        let end = header_end(&self.pending)?;
        Some(self.pending.split_to(end).freeze())
    }

    pub(crate) fn take_pending(&mut self) -> Bytes {
        self.pending.split().freeze()
    }
}

/// Write all of `frame`, reporting how much went out on failure.
fn write_frame(mut stream: &TcpStream, frame: &[u8]) -> Result<(), (usize, io::Error)> {
    let mut written = 0;
    while written < frame.len() {
        match stream.write(&frame[written..]) {
            Ok(0) => return Err((written, io::ErrorKind::WriteZero.into())),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err((written, e)),
        }
    }
    Ok(())
}
