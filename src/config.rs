//! Configuration and limits for the WebSocket daemon.

use std::time::Duration;

/// Resource limits applied while reading from peers.
///
/// These limits bound the memory a single misbehaving peer can claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a handshake request in bytes.
    ///
    /// Default: 8 KB (8192)
    pub max_handshake_size: usize,

    /// Maximum number of bytes drained from one peer in a single tick.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_handshake_size: 8192,
            max_message_size: 64 * 1024 * 1024, // 64 MB
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(max_handshake_size: usize, max_message_size: usize) -> Self {
        Self {
            max_handshake_size,
            max_message_size,
        }
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`](crate::Error::MessageTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_message_size {
            Err(crate::Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that handshake size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeTooLarge`](crate::Error::HandshakeTooLarge) if `size` exceeds the configured maximum.
    pub const fn check_handshake_size(&self, size: usize) -> Result<(), crate::Error> {
        if size > self.max_handshake_size {
            Err(crate::Error::HandshakeTooLarge {
                size,
                max: self.max_handshake_size,
            })
        } else {
            Ok(())
        }
    }
}

/// Daemon configuration.
///
/// Supplied once at construction by the bootstrap layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bind address, also echoed as `Sec-WebSocket-Origin`.
    ///
    /// Default: `127.0.0.1`
    pub host: String,

    /// Listening port. `0` picks an ephemeral port.
    ///
    /// Default: 4444
    pub port: u16,

    /// Upgrade path echoed as `Sec-WebSocket-Location`.
    ///
    /// Default: `/ws`
    pub service_path: String,

    /// Upper bound on each readiness poll. Also the tick granularity of the
    /// worker's periodic send hook.
    ///
    /// Default: 10 ms
    pub poll_timeout: Duration,

    /// Size of each non-blocking receive during a drain-read.
    ///
    /// Default: 1024
    pub read_chunk_size: usize,

    /// Longest a blocked write to one peer may stall the loop. A peer that
    /// times out part-way through a frame is dropped.
    ///
    /// Default: 5 s
    pub send_timeout: Duration,

    /// How long an accepted socket may take to deliver its upgrade request.
    /// Zero disables the limit.
    ///
    /// Default: 10 s
    pub handshake_timeout: Duration,

    /// Resource limits.
    pub limits: Limits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4444,
            service_path: "/ws".to_string(),
            poll_timeout: Duration::from_millis(10),
            read_chunk_size: 1024,
            send_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            limits: Limits::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the listening port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the upgrade path.
    #[must_use]
    pub fn with_service_path(mut self, path: impl Into<String>) -> Self {
        self.service_path = path.into();
        self
    }

    /// Set the readiness poll timeout.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the receive chunk size. Values below 1 are clamped to 1.
    #[must_use]
    pub const fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = if size == 0 { 1 } else { size };
        self
    }

    /// Set the per-peer write timeout.
    #[must_use]
    pub const fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the deadline for completing the upgrade request.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}
