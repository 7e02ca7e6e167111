//! Blocking WebSocket test client.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use wsdaemon::protocol::frame::mask_with_key;

/// The RFC 6455 sample nonce.
pub const UPGRADE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

const CLIENT_MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

/// A plain TCP client speaking just enough WebSocket for the tests.
pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    /// Open a TCP connection with a five second read timeout.
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Connect and complete the upgrade with [`UPGRADE_KEY`].
    pub fn connect_upgraded(addr: SocketAddr) -> io::Result<Self> {
        let mut client = Self::connect(addr)?;
        let response = client.handshake(&upgrade_request(addr, Some(UPGRADE_KEY)))?;
        if !response.starts_with("HTTP/1.1 101") {
            return Err(io::Error::other(format!("upgrade refused: {response}")));
        }
        Ok(client)
    }

    /// Send `request` and read the response header block.
    pub fn handshake(&mut self, request: &str) -> io::Result<String> {
        self.stream.write_all(request.as_bytes())?;
        self.read_header_block()
    }

    /// Read until a blank line or end of stream.
    pub fn read_header_block(&mut self) -> io::Result<String> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        while !buf.ends_with(b"\r\n\r\n") {
            match self.stream.read(&mut byte)? {
                0 => break,
                _ => buf.push(byte[0]),
            }
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Write raw bytes.
    pub fn send_raw(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)
    }

    /// Send `text` as one masked frame.
    pub fn send_text(&mut self, text: &str) -> io::Result<()> {
        self.send_raw(&mask_with_key(text, CLIENT_MASK))
    }

    /// Read one unmasked server frame and return its payload.
    pub fn recv_frame(&mut self) -> io::Result<Vec<u8>> {
        let mut head = [0u8; 2];
        self.stream.read_exact(&mut head)?;
        if head[0] != 0x81 {
            return Err(io::Error::other(format!("unexpected first byte {:#x}", head[0])));
        }
        let len = match head[1] & 0x7F {
            126 => {
                let mut ext = [0u8; 2];
                self.stream.read_exact(&mut ext)?;
                u16::from_be_bytes(ext) as usize
            }
            127 => {
                let mut ext = [0u8; 8];
                self.stream.read_exact(&mut ext)?;
                u64::from_be_bytes(ext) as usize
            }
            n => n as usize,
        };
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;
        Ok(payload)
    }

    /// Read one frame as text.
    pub fn recv_text(&mut self) -> io::Result<String> {
        Ok(String::from_utf8_lossy(&self.recv_frame()?).into_owned())
    }

    /// Read until the server closes the connection.
    pub fn read_until_closed(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.stream.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Close with `SO_LINGER` 0 so the server sees a reset instead of EOF.
    pub fn abort(self) -> io::Result<()> {
        socket2::SockRef::from(&self.stream).set_linger(Some(Duration::ZERO))?;
        drop(self);
        Ok(())
    }

    /// Local address; the server sees this as the remote end.
    pub fn local_addr(&self) -> SocketAddr {
        self.stream.local_addr().expect("connected")
    }

    /// The hash the daemon assigns this client.
    pub fn hash_on(&self, server: SocketAddr) -> String {
        format!("{server}-{}", self.local_addr())
    }
}

/// Build an upgrade request, optionally without a key.
pub fn upgrade_request(addr: SocketAddr, key: Option<&str>) -> String {
    let mut request = format!(
        "GET /ws HTTP/1.1\r\nHost: {addr}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n"
    );
    if let Some(key) = key {
        request.push_str(&format!("Sec-WebSocket-Key: {key}\r\n"));
    }
    request.push_str("Sec-WebSocket-Version: 13\r\n\r\n");
    request
}
