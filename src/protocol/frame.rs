//! WebSocket frame encoding and decoding (RFC 6455 subset).
//!
//! Only single, unfragmented text frames are handled. Server frames go out
//! unmasked; client frames arrive masked and are unmasked here. No opcode or
//! FIN validation is performed.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode |M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)   |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                         Masking key (client only)             |
//! +---------------------------------------------------------------+
//! |                     Payload data                              |
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::protocol::mask::{apply_mask, apply_mask_fast};

/// First header byte of every frame this server emits: FIN=1, opcode=text.
pub const TEXT_FRAME_HEADER: u8 = 0x81;

/// Largest payload that fits in the 7-bit length field.
pub const MAX_SHORT_PAYLOAD: usize = 125;

/// Largest payload that fits in the 16-bit extended length field.
pub const MAX_MEDIUM_PAYLOAD: usize = 65535;

const MASK_BIT: u8 = 0x80;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Size of the header (without masking key) for a payload of `len` bytes.
#[inline]
#[must_use]
pub const fn header_len(len: usize) -> usize {
    if len <= MAX_SHORT_PAYLOAD {
        2
    } else if len <= MAX_MEDIUM_PAYLOAD {
        4
    } else {
        10
    }
}

fn put_header(buf: &mut BytesMut, len: usize, mask_bit: u8) {
    buf.put_u8(TEXT_FRAME_HEADER);
    if len <= MAX_SHORT_PAYLOAD {
        buf.put_u8(mask_bit | len as u8);
    } else if len <= MAX_MEDIUM_PAYLOAD {
        buf.put_u8(mask_bit | LEN_16);
        buf.put_u16(len as u16);
    } else {
        buf.put_u8(mask_bit | LEN_64);
        buf.put_u64(len as u64);
    }
}

/// Frame `payload` as a single unmasked server text frame.
///
/// # Example
///
/// ```
/// use wsdaemon::protocol::frame::mask;
///
/// let frame = mask("Hi");
/// assert_eq!(&frame[..], &[0x81, 0x02, b'H', b'i']);
/// ```
#[must_use]
pub fn mask(payload: impl AsRef<[u8]>) -> Bytes {
    let payload = payload.as_ref();
    let mut buf = BytesMut::with_capacity(header_len(payload.len()) + payload.len());
    put_header(&mut buf, payload.len(), 0);
    buf.put_slice(payload);
    buf.freeze()
}

/// Frame `payload` as a masked, client-style text frame using `key`.
///
/// This is what a browser sends; the daemon never emits it, but it is what
/// [`unmask`] expects as input.
#[must_use]
pub fn mask_with_key(payload: impl AsRef<[u8]>, key: [u8; 4]) -> Bytes {
    let payload = payload.as_ref();
    let mut buf = BytesMut::with_capacity(header_len(payload.len()) + 4 + payload.len());
    put_header(&mut buf, payload.len(), MASK_BIT);
    buf.put_slice(&key);

    let start = buf.len();
    buf.put_slice(payload);
    apply_mask(&mut buf[start..], key);
    buf.freeze()
}

/// Frame `payload` as a masked client text frame with a random key.
///
/// # Errors
///
/// Returns [`Error::Io`] if the OS random source is unavailable.
pub fn mask_client(payload: impl AsRef<[u8]>) -> Result<Bytes> {
    let mut key = [0u8; 4];
    getrandom::getrandom(&mut key).map_err(|e| Error::Io(e.to_string()))?;
    Ok(mask_with_key(payload, key))
}

/// Decoded position of the pieces of a masked client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClientHeader {
    payload_len: usize,
    mask: [u8; 4],
    payload_offset: usize,
}

fn parse_client_header(buf: &[u8]) -> Result<ClientHeader> {
    if buf.len() < 2 {
        return Err(Error::IncompleteFrame {
            needed: 2 - buf.len(),
        });
    }

    let (payload_len, mask_offset) = match buf[1] & 0x7F {
        LEN_16 => {
            if buf.len() < 4 {
                return Err(Error::IncompleteFrame {
                    needed: 4 - buf.len(),
                });
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
        }
        LEN_64 => {
            if buf.len() < 10 {
                return Err(Error::IncompleteFrame {
                    needed: 10 - buf.len(),
                });
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            // Lengths beyond the address space are clamped to whatever is buffered.
            let len = usize::try_from(u64::from_be_bytes(raw)).unwrap_or(usize::MAX);
            (len, 10)
        }
        len => (len as usize, 2),
    };

    let payload_offset = mask_offset + 4;
    if buf.len() < payload_offset {
        return Err(Error::IncompleteFrame {
            needed: payload_offset - buf.len(),
        });
    }

    let mut mask = [0u8; 4];
    mask.copy_from_slice(&buf[mask_offset..payload_offset]);

    Ok(ClientHeader {
        payload_len,
        mask,
        payload_offset,
    })
}

/// Recover the payload of a masked client frame.
///
/// The payload is bounded by the declared length; a buffer shorter than the
/// declared length yields whatever payload bytes are present. An empty buffer
/// yields an empty payload.
///
/// # Errors
///
/// Returns [`Error::IncompleteFrame`] if the buffer ends inside the header or
/// the masking key.
///
/// # Example
///
/// ```
/// use wsdaemon::protocol::frame::{mask_with_key, unmask};
///
/// let frame = mask_with_key("Hello", [0x37, 0xfa, 0x21, 0x3d]);
/// assert_eq!(unmask(&frame).unwrap(), b"Hello");
/// ```
pub fn unmask(buf: &[u8]) -> Result<Vec<u8>> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }

    let header = parse_client_header(buf)?;
    let available = buf.len() - header.payload_offset;
    let end = header.payload_offset + header.payload_len.min(available);

    let mut payload = buf[header.payload_offset..end].to_vec();
    apply_mask_fast(&mut payload, header.mask);
    Ok(payload)
}

/// Like [`unmask`], converting the payload to a string.
///
/// Invalid UTF-8 sequences are replaced rather than rejected.
///
/// # Errors
///
/// Same as [`unmask`].
pub fn unmask_text(buf: &[u8]) -> Result<String> {
    let payload = unmask(buf)?;
    Ok(match String::from_utf8(payload) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}
