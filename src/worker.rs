//! The worker contract: application logic plugged into the daemon.
//!
//! The daemon calls a [`Worker`] synchronously from its loop thread, so
//! callbacks never overlap and a worker needs no internal locking for state
//! touched only from them. Each callback receives a [`Clients`] view for
//! sending frames back out.
//!
//! ## Example
//!
//! ```
//! use wsdaemon::protocol::frame::unmask_text;
//! use wsdaemon::{Clients, Worker};
//!
//! struct Echo;
//!
//! impl Worker for Echo {
//!     fn process_new_socket(&mut self, _: &Clients<'_>, _: &str, _: &[u8]) {}
//!
//!     fn process_read_message(&mut self, clients: &Clients<'_>, hash: &str, buffer: &[u8]) {
//!         if let Ok(text) = unmask_text(buffer) {
//!             clients.mask_and_send_to_clients(&[hash], text);
//!         }
//!     }
//!
//!     fn process_close_socket(&mut self, _: &Clients<'_>, _: &str) {}
//! }
//! ```

use crate::connection::{Connection, Connections};
use crate::error::{Error, Result};
use crate::protocol::frame::mask;

/// Application callbacks driven by the event loop.
///
/// The three `process_*_socket`/`process_read_message` methods are required.
/// The remaining hooks default to "never stop" and "nothing to send".
pub trait Worker {
    /// A peer completed the handshake. `header` is the raw upgrade request.
    fn process_new_socket(&mut self, clients: &Clients<'_>, hash: &str, header: &[u8]);

    /// Bytes arrived from a peer. `buffer` is the raw, still masked frame
    /// data; decode it with [`unmask`](crate::protocol::frame::unmask).
    fn process_read_message(&mut self, clients: &Clients<'_>, hash: &str, buffer: &[u8]);

    /// A peer was lost and has already been removed from the registry.
    fn process_close_socket(&mut self, clients: &Clients<'_>, hash: &str);

    /// Checked once at the end of every tick; `true` ends the loop.
    fn process_query_loop_should_stop(&mut self) -> bool {
        false
    }

    /// Checked once per tick, after readiness handling.
    fn process_should_call_send_message_tasks_now(&mut self) -> bool {
        false
    }

    /// Send unsolicited traffic. Called only when
    /// [`process_should_call_send_message_tasks_now`](Worker::process_should_call_send_message_tasks_now)
    /// returned `true` in the same tick.
    fn process_send_message_tasks(&mut self, _clients: &Clients<'_>) {}
}

/// Outbound view of the registry handed to worker callbacks.
///
/// Only upgraded peers are visible; the listener and connections still
/// handshaking are not.
#[derive(Debug, Clone, Copy)]
pub struct Clients<'a> {
    connections: &'a Connections,
}

impl<'a> Clients<'a> {
    /// Wrap a registry.
    #[must_use]
    pub fn new(connections: &'a Connections) -> Self {
        Self { connections }
    }

    /// Number of upgraded peers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.peer_count()
    }

    /// Hashes of every upgraded peer.
    #[must_use]
    pub fn hashes(&self) -> Vec<&'a str> {
        self.connections.peers().map(Connection::hash).collect()
    }

    /// Check if `hash` names a live, upgraded peer.
    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.peer(hash).is_some()
    }

    fn peer(&self, hash: &str) -> Option<&'a Connection> {
        self.connections
            .client_by_hash(hash)
            .filter(|conn| conn.role().is_peer() && !conn.is_broken())
    }

    /// Frame `text` and write it to every upgraded peer.
    ///
    /// A failed write is logged and skipped. Returns the number of peers
    /// written to.
    pub fn mask_and_broadcast_to_clients(&self, text: impl AsRef<[u8]>) -> usize {
        let frame = mask(text);
        let mut delivered = 0;

        for conn in self.connections.peers() {
            match conn.send(&frame) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(hash = conn.hash(), error = %e, "broadcast skipped client");
                }
            }
        }

        tracing::debug!(delivered, bytes = frame.len(), "broadcast finished");
        delivered
    }

    /// Frame `text` and write it to the named peers only.
    ///
    /// Hashes that no longer resolve to a live peer are skipped with a
    /// warning, as are failed writes. Returns the number of peers written to.
    pub fn mask_and_send_to_clients<S: AsRef<str>>(
        &self,
        hashes: &[S],
        text: impl AsRef<[u8]>,
    ) -> usize {
        let frame = mask(text);
        let mut delivered = 0;

        for hash in hashes {
            let hash = hash.as_ref();
            let Some(conn) = self.peer(hash) else {
                tracing::warn!(hash, "target client is not registered, skipped");
                continue;
            };
            match conn.send(&frame) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(hash, error = %e, "send to client failed"),
            }
        }

        delivered
    }

    /// Frame `text` and write it to a single peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownClient`] if `hash` is not a live peer, or
    /// [`Error::Io`] if the write fails.
    pub fn mask_and_send_to_client(&self, hash: &str, text: impl AsRef<[u8]>) -> Result<()> {
        let conn = self
            .peer(hash)
            .ok_or_else(|| Error::UnknownClient(hash.to_string()))?;
        conn.send(&mask(text))?;
        Ok(())
    }
}
