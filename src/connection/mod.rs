//! Connection identity, registry and non-blocking reads.
//!
//! ## Connection Lifecycle
//!
//! 1. **Handshaking** - accepted, upgrade request still arriving
//! 2. **Peer** - `101` response written, visible to the worker
//! 3. Removed - evicted from the registry; dropping the entry closes the socket
//!
//! The listening socket is registered alongside peers with role
//! [`Role::Listening`].

mod id;
mod role;

#[allow(clippy::module_inception)]
mod connection;
pub mod drain;
pub mod registry;

pub use connection::Connection;
pub use drain::{Drain, DrainEnd, ReadOutcome, drain};
pub use id::ConnectionId;
pub use registry::Connections;
pub use role::Role;
