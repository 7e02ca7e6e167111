//! Drain-read: pull every byte currently available from a non-blocking socket.

use std::io::{self, Read};

use bytes::{Bytes, BytesMut};

/// Why a drain stopped.
#[derive(Debug)]
pub enum DrainEnd {
    /// The socket reported `WouldBlock`: nothing more is available right now.
    Exhausted,
    /// The peer performed an orderly shutdown.
    Eof,
    /// A receive failed with a hard error.
    Failed(io::Error),
    /// More than the allowed number of bytes were available.
    Overflow,
}

/// Bytes accumulated by one drain and how it ended.
#[derive(Debug)]
pub struct Drain {
    /// Everything read, in order.
    pub data: BytesMut,
    /// The condition that stopped the loop.
    pub end: DrainEnd,
}

/// Result of draining an upgraded peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Raw (still masked) bytes to hand to the worker.
    Delivered(Bytes),
    /// The peer is gone and must be removed.
    Disconnected,
}

/// Repeatedly receive `chunk_size` bytes until the source runs dry, closes,
/// fails, or yields more than `limit` bytes in total.
pub fn drain<R: Read>(mut reader: R, chunk_size: usize, limit: usize) -> Drain {
    let mut data = BytesMut::new();
    let mut piece = vec![0u8; chunk_size.max(1)];

    let end = loop {
        match reader.read(&mut piece) {
            Ok(0) => break DrainEnd::Eof,
            Ok(n) => {
                data.extend_from_slice(&piece[..n]);
                tracing::trace!(piece_length = n, total_length = data.len(), "read piece");
                if data.len() > limit {
                    break DrainEnd::Overflow;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break DrainEnd::Exhausted,
            Err(e) => break DrainEnd::Failed(e),
        }
    };

    Drain { data, end }
}

impl Drain {
    /// Check if the drain produced no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Apply the peer read policy.
    ///
    /// A readable socket that yields nothing before failing or closing is a
    /// lost peer, as is one that overflows the limit. Anything else read so
    /// far is one message, even if the drain ended on an error.
    #[must_use]
    pub fn into_outcome(self) -> ReadOutcome {
        match self.end {
            DrainEnd::Overflow => ReadOutcome::Disconnected,
            _ if self.data.is_empty() => ReadOutcome::Disconnected,
            _ => ReadOutcome::Delivered(self.data.freeze()),
        }
    }
}
