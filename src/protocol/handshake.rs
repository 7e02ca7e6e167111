//! WebSocket opening handshake (RFC 6455 Section 4).
//!
//! The server reads the raw HTTP upgrade request, pulls out
//! `Sec-WebSocket-Key` and answers with a fixed `101` response whose header
//! names and order browsers depend on.

use std::collections::HashMap;
use std::io::Write;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Blank line that terminates an HTTP header block.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Response sent to clients whose handshake is rejected.
pub const BAD_REQUEST_RESPONSE: &[u8] = b"HTTP/1.1 400 Bad Request\r\nConnection: close\r\n\r\n";

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsdaemon::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    BASE64.encode(hash)
}

/// Offset just past the first blank line, if the header block is complete.
///
/// Anything after it was sent ahead of the `101` and belongs to the
/// WebSocket stream.
#[must_use]
pub fn header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|pos| pos + HEADER_TERMINATOR.len())
}

/// Check whether `raw` already holds a complete header block.
#[must_use]
pub fn is_complete(raw: &[u8]) -> bool {
    header_end(raw).is_some()
}

/// Parse `<token>: <value>` lines. Names are stored lowercased; the last
/// occurrence of a duplicated header wins.
fn parse_headers(text: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();

    for line in text.split("\r\n") {
        let line = line.trim_end();
        let Some((name, value)) = line.split_once(": ") else {
            continue;
        };
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            continue;
        }
        headers.insert(name.to_ascii_lowercase(), value.to_string());
    }

    headers
}

/// Parsed HTTP upgrade request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HandshakeRequest {
    headers: HashMap<String, String>,
}

impl HandshakeRequest {
    /// Parse the raw request text. Never fails: lines that are not headers
    /// (the request line, the blank terminator) are skipped.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        Self {
            headers: parse_headers(&text),
        }
    }

    /// Look up a header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Number of parsed headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Check if no headers were parsed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// The client's `Sec-WebSocket-Key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the header is missing, or is not
    /// valid Base64 of exactly 16 bytes.
    pub fn key(&self) -> Result<&str> {
        let key = self
            .header("Sec-WebSocket-Key")
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::InvalidHandshake("Missing Sec-WebSocket-Key header".into()))?;

        match BASE64.decode(key) {
            Ok(decoded) if decoded.len() == 16 => Ok(key),
            Ok(decoded) => Err(Error::InvalidHandshake(format!(
                "Sec-WebSocket-Key must be 16 bytes, got {}",
                decoded.len()
            ))),
            Err(_) => Err(Error::InvalidHandshake(
                "Invalid Sec-WebSocket-Key: not valid Base64".into(),
            )),
        }
    }
}

/// The `101` response sent back to an upgrading client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
    /// Echoed as `Sec-WebSocket-Origin`.
    pub origin: String,
    /// Echoed as `Sec-WebSocket-Location`.
    pub location: String,
}

impl HandshakeResponse {
    /// Build the response for a parsed request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandshake`] if the request carries no usable key.
    pub fn from_request(req: &HandshakeRequest, origin: &str, location: &str) -> Result<Self> {
        Ok(Self {
            accept: compute_accept_key(req.key()?),
            origin: origin.to_string(),
            location: location.to_string(),
        })
    }

    /// Serialize the response. Header names, order and spacing are fixed.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"HTTP/1.1 101 Web Socket Protocol Handshake\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Origin: {}\r\n", self.origin).as_bytes());
        buf.extend_from_slice(format!("Sec-WebSocket-Location: {}\r\n", self.location).as_bytes());
        buf.extend_from_slice(format!("Sec-WebSocket-Accept:{}\r\n", self.accept).as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    /// Serialize into a fresh buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(192);
        self.write(&mut buf);
        buf
    }
}

/// Answer the upgrade request in `raw` on `stream`.
///
/// The response is written with a single `write` call; a short write is
/// reported in the returned count but not retried.
///
/// # Errors
///
/// Returns [`Error::InvalidHandshake`] if the request has no usable key, or
/// [`Error::Io`] if the write fails.
pub fn perform_handshake<W: Write>(
    raw: &[u8],
    stream: &mut W,
    origin: &str,
    location: &str,
) -> Result<(HandshakeResponse, usize)> {
    let request = HandshakeRequest::parse(raw);
    let response = HandshakeResponse::from_request(&request, origin, location)?;
    let bytes = response.to_bytes();
    let written = stream.write(&bytes)?;
    if written < bytes.len() {
        tracing::warn!(written, expected = bytes.len(), "short write of handshake response");
    }
    Ok((response, written))
}
