//! # wsdaemon - A single-threaded WebSocket server core
//!
//! `wsdaemon` accepts TCP connections, performs the WebSocket upgrade
//! handshake, and hands each peer's traffic to a user-supplied [`Worker`].
//! Everything runs on one thread driven by readiness polling.
//!
//! ## Features
//!
//! - **Single-frame text codec** with 7-, 16- and 64-bit length encodings
//! - **Upgrade handshake** with `Sec-WebSocket-Accept` derivation
//! - **Connection registry** keyed by stable `local-remote` address hashes
//! - **Worker hooks** for inbound messages, lifecycle events and periodic sends
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsdaemon::{Clients, Config, Daemon, Worker};
//!
//! struct Broadcast;
//!
//! impl Worker for Broadcast {
//!     fn process_new_socket(&mut self, clients: &Clients<'_>, hash: &str, _: &[u8]) {
//!         clients.mask_and_broadcast_to_clients(format!("{hash} joined"));
//!     }
//!     fn process_read_message(&mut self, clients: &Clients<'_>, _: &str, buffer: &[u8]) {
//!         if let Ok(text) = wsdaemon::protocol::unmask_text(buffer) {
//!             clients.mask_and_broadcast_to_clients(text);
//!         }
//!     }
//!     fn process_close_socket(&mut self, _: &Clients<'_>, _: &str) {}
//! }
//!
//! let mut daemon = Daemon::new(Config::new().with_port(4444), Broadcast)?;
//! daemon.run()?;
//! # Ok::<(), wsdaemon::Error>(())
//! ```

pub mod config;
pub mod connection;
pub mod daemon;
pub mod error;
pub mod protocol;
pub mod worker;

#[cfg(test)]
mod test_utils;

pub use config::{Config, Limits};
pub use connection::{Connection, ConnectionId, Connections, Role};
pub use daemon::{Daemon, DaemonState};
pub use error::{Error, Result, StartupStage};
pub use protocol::{HandshakeRequest, HandshakeResponse, WS_GUID, compute_accept_key};
pub use worker::{Clients, Worker};
