//! Error types for the WebSocket daemon.
//!
//! Only [`Error::Startup`] is allowed to escape the event loop. Every other
//! variant describes a failure that is isolated to a single connection.

use std::fmt;

use thiserror::Error;

/// Result type alias for daemon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The step of listener setup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartupStage {
    /// Creating the TCP socket.
    Create,
    /// Enabling `SO_REUSEADDR`.
    SetReuseAddress,
    /// Binding to the configured host and port.
    Bind,
    /// Switching the socket to listening mode.
    Listen,
    /// Switching the socket to non-blocking mode.
    SetNonBlocking,
    /// Creating the poller or adding the listener to it.
    RegisterPoller,
}

impl fmt::Display for StartupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupStage::Create => write!(f, "create socket"),
            StartupStage::SetReuseAddress => write!(f, "set socket reusable"),
            StartupStage::Bind => write!(f, "bind socket to port"),
            StartupStage::Listen => write!(f, "listen to port"),
            StartupStage::SetNonBlocking => write!(f, "set socket non-blocking"),
            StartupStage::RegisterPoller => write!(f, "register socket for polling"),
        }
    }
}

/// Errors that can occur while running the daemon.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The listening endpoint could not be set up. Fatal.
    #[error("Startup failed: cannot {stage}: {reason}")]
    Startup {
        /// The failed setup step.
        stage: StartupStage,
        /// The OS error text.
        reason: String,
    },

    /// Invalid WebSocket handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    /// Handshake request exceeds the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Received size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Buffered message exceeds the configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Received size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Incomplete frame data.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame {
        /// Number of additional bytes needed.
        needed: usize,
    },

    /// The peer went away while it was being read.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// No live connection is registered under the given hash.
    #[error("Unknown client: {0}")]
    UnknownClient(String),

    /// Operation not allowed in the daemon's current state.
    #[error("Invalid daemon state: {0}")]
    InvalidState(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    pub(crate) fn startup(stage: StartupStage, err: &std::io::Error) -> Self {
        Error::Startup {
            stage,
            reason: err.to_string(),
        }
    }

    /// Check if this error is fatal to the daemon.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Error::Startup { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
