//! Daemon lifecycle state machine.

/// Lifecycle state of a [`Daemon`](crate::Daemon).
///
/// `Init → Listening → Running → Stopping → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum DaemonState {
    /// Constructed, no socket bound yet.
    #[default]
    Init,
    /// Listening socket bound and registered.
    Listening,
    /// Ticking the event loop.
    Running,
    /// The worker asked to stop; the listener is being closed.
    Stopping,
    /// Listener closed. The daemon will not run again.
    Closed,
}

impl DaemonState {
    /// Check if the event loop may tick in this state.
    #[must_use]
    #[inline]
    pub const fn is_running(&self) -> bool {
        matches!(self, DaemonState::Running)
    }

    /// Check if `next` is a legal successor of this state.
    #[must_use]
    pub const fn can_transition_to(&self, next: DaemonState) -> bool {
        matches!(
            (self, next),
            (DaemonState::Init, DaemonState::Listening)
                | (DaemonState::Listening, DaemonState::Running)
                | (DaemonState::Running, DaemonState::Running)
                | (DaemonState::Running, DaemonState::Stopping)
                | (DaemonState::Stopping, DaemonState::Closed)
        )
    }
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonState::Init => write!(f, "Init"),
            DaemonState::Listening => write!(f, "Listening"),
            DaemonState::Running => write!(f, "Running"),
            DaemonState::Stopping => write!(f, "Stopping"),
            DaemonState::Closed => write!(f, "Closed"),
        }
    }
}
