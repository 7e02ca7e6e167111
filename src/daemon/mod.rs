//! The readiness-polling event loop.
//!
//! A [`Daemon`] owns the connection registry and drives everything from one
//! thread: each tick polls every registered socket with a short timeout,
//! accepts and upgrades new peers, drains readable peers into the worker,
//! services the worker's periodic send hook and finally asks the worker
//! whether to stop.
//!
//! Per-connection failures are logged and isolated to that connection. The
//! only error that leaves [`Daemon::run`] is a startup failure.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsdaemon::{Config, Daemon};
//!
//! let config = Config::new().with_host("127.0.0.1").with_port(4444);
//! let mut daemon = Daemon::new(config, MyWorker::default())?;
//! daemon.run()?;
//! ```

mod state;

pub use state::DaemonState;

use std::net::SocketAddr;
use std::thread;

use crate::config::Config;
use crate::connection::{ConnectionId, Connections, DrainEnd, ReadOutcome, Role, drain};
use crate::error::{Error, Result};
use crate::protocol::handshake::{BAD_REQUEST_RESPONSE, is_complete, perform_handshake};
use crate::worker::{Clients, Worker};

/// A single-threaded WebSocket server driving a [`Worker`].
pub struct Daemon<W> {
    config: Config,
    worker: W,
    connections: Connections,
    state: DaemonState,
}

impl<W: Worker> Daemon<W> {
    /// Create a daemon. Nothing is bound until [`start`](Daemon::start) or
    /// [`run`](Daemon::run).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Startup`] if the OS poller cannot be created.
    pub fn new(config: Config, worker: W) -> Result<Self> {
        let mut connections = Connections::new()?;
        connections.set_send_timeout(Some(config.send_timeout));
        Ok(Self {
            connections,
            config,
            worker,
            state: DaemonState::Init,
        })
    }

    /// Bind the listening socket and enter `Running`.
    ///
    /// Returns the bound address; useful when the configured port is 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Startup`] if the listener cannot be set up, or
    /// [`Error::InvalidState`] if the daemon was already started.
    pub fn start(&mut self) -> Result<SocketAddr> {
        if self.state != DaemonState::Init {
            return Err(Error::InvalidState(format!(
                "cannot start a daemon in state {}",
                self.state
            )));
        }

        let addr = match self
            .connections
            .start_listening(self.config.port, &self.config.host)
        {
            Ok(addr) => addr,
            Err(e) => {
                tracing::error!(error = %e, "daemon cannot start");
                return Err(e);
            }
        };
        self.transition(DaemonState::Listening);
        tracing::info!(
            %addr,
            path = %self.config.service_path,
            total = self.connections.count_of_clients(),
            "socket listening started, client set updated"
        );
        self.transition(DaemonState::Running);
        Ok(addr)
    }

    /// Start if needed, then tick until the worker asks to stop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Startup`] if the listener cannot be set up, or
    /// [`Error::InvalidState`] if the daemon has already been stopped.
    pub fn run(&mut self) -> Result<()> {
        if self.state == DaemonState::Init {
            self.start()?;
        }
        if !self.state.is_running() {
            return Err(Error::InvalidState(format!(
                "cannot run a daemon in state {}",
                self.state
            )));
        }

        tracing::info!("daemon loop running");
        while self.tick() {}
        self.shutdown();
        Ok(())
    }

    /// Run one poll cycle.
    ///
    /// Returns `false` once the worker has asked to stop, or if the daemon is
    /// not running.
    pub fn tick(&mut self) -> bool {
        if !self.state.is_running() {
            return false;
        }

        for id in self.poll_ready() {
            self.handle_ready(id);
        }

        if self.worker.process_should_call_send_message_tasks_now() {
            self.worker
                .process_send_message_tasks(&Clients::new(&self.connections));
        }

        self.reap_broken();
        self.expire_handshakes();

        if self.worker.process_query_loop_should_stop() {
            tracing::info!("worker asked the daemon loop to stop");
            self.transition(DaemonState::Stopping);
            return false;
        }

        self.transition(DaemonState::Running);
        true
    }

    /// Close the listening socket and enter `Closed`.
    ///
    /// Registered peers stay open until the daemon is dropped.
    pub fn shutdown(&mut self) {
        if self.state == DaemonState::Running {
            self.transition(DaemonState::Stopping);
        }
        if self.state == DaemonState::Stopping {
            tracing::info!(peers = self.connections.peer_count(), "daemon loop ending");
            self.connections.stop_listening();
            self.transition(DaemonState::Closed);
        }
    }

    fn transition(&mut self, next: DaemonState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "daemon state changed");
        }
        self.state = next;
    }

    fn poll_ready(&mut self) -> Vec<ConnectionId> {
        match self.connections.select(self.config.poll_timeout) {
            Ok(ready) => {
                if !ready.is_empty() {
                    tracing::debug!(
                        selected = ready.len(),
                        total = self.connections.count_of_clients(),
                        "readable sockets selected out"
                    );
                }
                ready
            }
            Err(e) => {
                tracing::warn!(error = %e, "socket select failed");
                // Keep the tick cadence even when the poll returns at once.
                thread::sleep(self.config.poll_timeout);
                Vec::new()
            }
        }
    }

    fn handle_ready(&mut self, id: ConnectionId) {
        // Removed earlier in this tick.
        let Some(conn) = self.connections.get(id) else {
            return;
        };

        // Evicted at the end of the tick.
        if conn.is_broken() {
            return;
        }

        if self.connections.client_hash(conn).is_none() {
            tracing::warn!(hash = conn.hash(), %id, "socket is not valid anymore, discarded");
            self.connections.discard(id);
            return;
        }

        match conn.role() {
            Role::Listening => self.handle_new_connection(),
            Role::Handshaking => self.continue_handshake(id),
            Role::Peer => self.read_socket(id),
        }
    }

    fn handle_new_connection(&mut self) {
        let (stream, remote) = match self.connections.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                return;
            }
        };
        tracing::info!(%remote, "a new client came up");

        match self
            .connections
            .register_client(stream, Role::Handshaking, None)
        {
            Ok(id) => self.continue_handshake(id),
            Err(e) => tracing::warn!(%remote, error = %e, "new client could not be registered"),
        }
    }

    /// Read whatever part of the upgrade request has arrived and answer it
    /// once the header block is complete.
    fn continue_handshake(&mut self, id: ConnectionId) {
        let max = self.config.limits.max_handshake_size;
        let chunk = self.config.read_chunk_size;

        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        let Some(stream) = conn.stream() else {
            return;
        };
        let room = max.saturating_sub(conn.pending().len());
        let drained = drain(stream, chunk, room);
        let hash = conn.hash().to_string();

        if drained.is_empty() {
            match &drained.end {
                DrainEnd::Exhausted | DrainEnd::Overflow => {
                    tracing::debug!(%hash, "waiting for handshake request");
                }
                DrainEnd::Eof => {
                    tracing::info!(%hash, "client left before handshake");
                    self.connections.discard(id);
                }
                DrainEnd::Failed(e) => {
                    tracing::error!(%hash, error = %e, "new client cannot read header piece");
                    self.connections.discard(id);
                }
            }
            return;
        }

        if matches!(drained.end, DrainEnd::Overflow) {
            let size = conn.pending().len() + drained.data.len();
            if let Err(e) = self.config.limits.check_handshake_size(size) {
                tracing::warn!(%hash, error = %e, "handshake rejected");
            }
            self.reject_handshake(id);
            return;
        }

        conn.pending_mut().extend_from_slice(&drained.data);
        if !is_complete(conn.pending()) {
            tracing::debug!(%hash, buffered = conn.pending().len(), "handshake request incomplete");
            return;
        }

        self.finish_handshake(id);
    }

    fn finish_handshake(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        let Some(header) = conn.take_header() else {
            return;
        };
        let early = conn.take_pending();
        let hash = conn.hash().to_string();
        let Some(mut stream) = conn.stream() else {
            return;
        };

        let result = perform_handshake(
            &header,
            &mut stream,
            &self.config.host,
            &self.config.service_path,
        );

        match result {
            Ok((_, written)) => {
                self.connections.upgrade(id);
                tracing::info!(%hash, %id, written, "new client identified");
                self.worker
                    .process_new_socket(&Clients::new(&self.connections), &hash, &header);
                tracing::info!(%hash, "new client socket processed");
                if !early.is_empty() {
                    tracing::debug!(%hash, bytes = early.len(), "message arrived with the handshake");
                    self.worker
                        .process_read_message(&Clients::new(&self.connections), &hash, &early);
                }
            }
            Err(Error::InvalidHandshake(reason)) => {
                tracing::warn!(%hash, %reason, "handshake rejected");
                self.reject_handshake(id);
            }
            Err(e) => {
                tracing::error!(%hash, error = %e, "handshake response could not be written");
                self.connections.discard(id);
            }
        }
    }

    /// Evict peers left broken by a cut-short write and report them lost.
    /// Repeats while close callbacks break further peers.
    fn reap_broken(&mut self) {
        loop {
            let broken = self.connections.remove_broken();
            if broken.is_empty() {
                return;
            }
            for conn in broken {
                tracing::error!(hash = conn.hash(), id = %conn.id(), "peer dropped after a cut-short frame");
                if let Err(e) = conn.shutdown() {
                    tracing::debug!(hash = conn.hash(), error = %e, "shutdown of broken peer failed");
                }
                self.worker
                    .process_close_socket(&Clients::new(&self.connections), conn.hash());
            }
        }
    }

    fn expire_handshakes(&mut self) {
        let timeout = self.config.handshake_timeout;
        if timeout.is_zero() {
            return;
        }
        for id in self.connections.expired_handshakes(timeout) {
            if let Some(conn) = self.connections.get(id) {
                tracing::info!(hash = conn.hash(), %id, ?timeout, "handshake timed out, discarded");
            }
            self.connections.discard(id);
        }
    }

    fn reject_handshake(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.remove_client(id) else {
            return;
        };
        if let Err(e) = conn.send(BAD_REQUEST_RESPONSE) {
            tracing::debug!(hash = conn.hash(), error = %e, "rejection response not delivered");
        }
        if let Err(e) = conn.shutdown() {
            tracing::debug!(hash = conn.hash(), error = %e, "shutdown of rejected client failed");
        }
    }

    fn read_socket(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get(id) else {
            return;
        };
        let Some(stream) = conn.stream() else {
            return;
        };
        let hash = conn.hash().to_string();
        tracing::debug!(%hash, %id, "begin reading socket");

        let limits = &self.config.limits;
        let drained = drain(stream, self.config.read_chunk_size, limits.max_message_size);
        if matches!(drained.end, DrainEnd::Overflow) {
            if let Err(e) = limits.check_message_size(drained.data.len()) {
                tracing::warn!(%hash, error = %e, "client exceeded message limit");
            }
        }

        match drained.into_outcome() {
            ReadOutcome::Delivered(buffer) => {
                tracing::debug!(%hash, bytes = buffer.len(), "message read");
                self.worker
                    .process_read_message(&Clients::new(&self.connections), &hash, &buffer);
            }
            ReadOutcome::Disconnected => {
                tracing::error!(%hash, %id, "socket read got nothing, seems died");
                self.connections.remove_client(id);
                self.worker
                    .process_close_socket(&Clients::new(&self.connections), &hash);
            }
        }
    }
}

impl<W> Daemon<W> {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// Bound listening address, once started.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connections.local_addr()
    }

    /// The configuration this daemon was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The connection registry.
    #[must_use]
    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    /// The worker.
    #[must_use]
    pub fn worker(&self) -> &W {
        &self.worker
    }

    /// Mutable access to the worker between ticks.
    pub fn worker_mut(&mut self) -> &mut W {
        &mut self.worker
    }

    /// Drop the daemon, closing every connection, and return the worker.
    pub fn into_worker(self) -> W {
        let Daemon { worker, .. } = self;
        worker
    }
}

impl<W> std::fmt::Debug for Daemon<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}
