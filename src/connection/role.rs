//! Role of a registered connection.

/// What a registered socket is used for.
///
/// Decides how the event loop reacts when the socket becomes readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The listening socket. Readable means a peer is waiting to be accepted.
    Listening,
    /// An accepted peer whose upgrade request has not fully arrived yet.
    Handshaking,
    /// An upgraded WebSocket peer.
    Peer,
}

impl Role {
    /// Check if this connection can receive frames from the worker.
    #[inline]
    #[must_use]
    pub const fn is_peer(&self) -> bool {
        matches!(self, Role::Peer)
    }

    /// Check if this is the listening socket.
    #[inline]
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        matches!(self, Role::Listening)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Listening => write!(f, "Listening"),
            Role::Handshaking => write!(f, "Handshaking"),
            Role::Peer => write!(f, "Peer"),
        }
    }
}
