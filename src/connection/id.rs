//! Monotonic connection identifiers.

use std::fmt;

/// Identifier assigned to a connection when it is registered.
///
/// Never reused within one registry. Doubles as the readiness-poll key, so
/// the platform socket handle never leaves the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) usize);

impl ConnectionId {
    /// The raw value.
    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
