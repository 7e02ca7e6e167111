//! The connection registry.
//!
//! Owns the listening socket and every accepted peer, keyed by connection
//! hash. Every registered socket is also registered with the poller, so the
//! readiness-poll set always equals the registry.
//!
//! The registry is touched only from the event loop thread and carries no
//! locking of its own.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use polling::{Event, Events, PollMode, Poller};
use socket2::{Domain, Protocol, Socket as RawSocket, Type};

use crate::connection::connection::Socket;
use crate::connection::{Connection, ConnectionId, Role};
use crate::error::{Error, Result, StartupStage};

/// Backlog passed to `listen(2)`.
const LISTEN_BACKLOG: i32 = 128;

/// Write timeout applied to peers unless overridden.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Suffix of the listening socket's hash.
pub const LISTENER_HASH_SUFFIX: &str = "CLIENTS";

/// Live connections keyed by connection hash.
pub struct Connections {
    // Declared first so it is dropped before any socket it watches.
    poller: Poller,
    events: Events,
    clients: HashMap<String, Connection>,
    ids: HashMap<ConnectionId, String>,
    listener: Option<ConnectionId>,
    local_addr: Option<SocketAddr>,
    send_timeout: Option<Duration>,
    next_id: usize,
}

impl Connections {
    /// Create an empty registry with its own poller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Startup`] if the OS poller cannot be created.
    pub fn new() -> Result<Self> {
        let poller = Poller::new().map_err(|e| Error::startup(StartupStage::RegisterPoller, &e))?;
        Ok(Self {
            poller,
            events: Events::new(),
            clients: HashMap::new(),
            ids: HashMap::new(),
            listener: None,
            local_addr: None,
            send_timeout: Some(DEFAULT_SEND_TIMEOUT),
            next_id: 0,
        })
    }

    /// Bound how long a send may block on one peer. `None` or a zero
    /// duration waits indefinitely. Applies to peers registered afterwards.
    pub fn set_send_timeout(&mut self, timeout: Option<Duration>) {
        self.send_timeout = timeout.filter(|t| !t.is_zero());
    }

    /// Create, configure, bind and register the IPv4 listening socket.
    ///
    /// An empty `address` binds to every interface. Returns the bound address,
    /// which carries the real port when `port` is 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Startup`] naming the step that failed.
    pub fn start_listening(&mut self, port: u16, address: &str) -> Result<SocketAddr> {
        if self.listener.is_some() {
            return Err(Error::Startup {
                stage: StartupStage::Listen,
                reason: "already listening".into(),
            });
        }

        let address = if address.is_empty() { "0.0.0.0" } else { address };
        let addr = resolve_ipv4(address, port)?;

        tracing::debug!(%addr, "creating socket");
        let socket = RawSocket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| Error::startup(StartupStage::Create, &e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| Error::startup(StartupStage::SetReuseAddress, &e))?;
        socket
            .bind(&addr.into())
            .map_err(|e| Error::startup(StartupStage::Bind, &e))?;
        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| Error::startup(StartupStage::Listen, &e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| Error::startup(StartupStage::SetNonBlocking, &e))?;

        let listener: TcpListener = socket.into();
        let local = listener
            .local_addr()
            .map_err(|e| Error::startup(StartupStage::Bind, &e))?;
        let hash = format!("{local}-{LISTENER_HASH_SUFFIX}");

        let id = self
            .insert(Socket::Listener(listener), Role::Listening, hash.clone())
            .map_err(|e| Error::startup(StartupStage::RegisterPoller, &e))?;
        self.listener = Some(id);
        self.local_addr = Some(local);

        tracing::info!(%local, %hash, total = self.clients.len(), "socket listening started");
        Ok(local)
    }

    /// Close the listening socket if present. Registered peers stay open.
    pub fn stop_listening(&mut self) {
        if let Some(id) = self.listener {
            if let Some(conn) = self.remove_client(id) {
                tracing::info!(hash = conn.hash(), "listening socket closed");
            }
        }
    }

    /// Bound address of the listening socket.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// The listening connection, while listening.
    #[must_use]
    pub fn listener(&self) -> Option<&Connection> {
        self.listener.and_then(|id| self.get(id))
    }

    /// Accept one pending peer from the listening socket.
    ///
    /// # Errors
    ///
    /// `WouldBlock` if no peer is waiting, `NotConnected` if not listening,
    /// or the OS error.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.listener()
            .and_then(Connection::listener)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?
            .accept()
    }

    /// Register an accepted peer, computing its hash unless one is given.
    ///
    /// The stream is switched to non-blocking mode. An existing entry with the
    /// same hash is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionLost`] if the hash cannot be computed, or
    /// [`Error::Io`] if the stream cannot be configured or polled.
    pub fn register_client(
        &mut self,
        stream: TcpStream,
        role: Role,
        hash: Option<String>,
    ) -> Result<ConnectionId> {
        let hash = match hash {
            Some(hash) => hash,
            None => self
                .peer_hash(&stream)
                .ok_or_else(|| Error::ConnectionLost("peer address unreadable".into()))?,
        };
        stream.set_write_timeout(self.send_timeout)?;
        stream.set_nonblocking(true)?;
        let id = self.insert(Socket::Stream(stream), role, hash)?;
        Ok(id)
    }

    fn insert(&mut self, socket: Socket, role: Role, hash: String) -> io::Result<ConnectionId> {
        if let Some(existing) = self.clients.get(&hash).map(Connection::id) {
            self.remove_client(existing);
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        self.watch(id, &socket)?;
        self.ids.insert(id, hash.clone());
        self.clients
            .insert(hash.clone(), Connection::new(id, hash, role, socket));
        Ok(id)
    }

    fn watch(&self, id: ConnectionId, socket: &Socket) -> io::Result<()> {
        let interest = Event::readable(id.as_usize());
        // SAFETY: the socket is owned by the registry entry for `id`, and every
        // path that drops an entry goes through `unwatch` first.
        unsafe {
            match socket {
                Socket::Listener(listener) => {
                    self.poller.add_with_mode(listener, interest, PollMode::Level)
                }
                Socket::Stream(stream) => {
                    self.poller.add_with_mode(stream, interest, PollMode::Level)
                }
            }
        }
    }

    fn unwatch(&self, conn: &Connection) {
        let result = match conn.socket() {
            Socket::Listener(listener) => self.poller.delete(listener),
            Socket::Stream(stream) => self.poller.delete(stream),
        };
        if let Err(e) = result {
            tracing::warn!(hash = conn.hash(), error = %e, "failed to remove socket from poller");
        }
    }

    /// Evict a connection. Dropping the returned value closes the socket.
    ///
    /// Returns `None` if the id is not registered.
    pub fn remove_client(&mut self, id: ConnectionId) -> Option<Connection> {
        let hash = self.ids.remove(&id)?;
        let conn = self.clients.remove(&hash)?;
        self.unwatch(&conn);
        if self.listener == Some(id) {
            self.listener = None;
        }
        tracing::debug!(%hash, %id, total = self.clients.len(), "client removed");
        Some(conn)
    }

    /// Evict a connection by hash. No-op if absent.
    pub fn remove_client_by_hash(&mut self, hash: &str) -> Option<Connection> {
        let id = self.clients.get(hash).map(Connection::id)?;
        self.remove_client(id)
    }

    /// Shut down, close and evict a connection.
    pub fn discard(&mut self, id: ConnectionId) {
        if let Some(conn) = self.remove_client(id) {
            if let Err(e) = conn.shutdown() {
                tracing::debug!(hash = conn.hash(), error = %e, "shutdown of discarded socket failed");
            }
        }
    }

    /// Close every registered connection, listener included.
    pub fn close_all(&mut self) {
        let ids: Vec<ConnectionId> = self.ids.keys().copied().collect();
        for id in ids {
            self.discard(id);
        }
    }

    /// Promote a handshaking connection to an upgraded peer.
    pub(crate) fn upgrade(&mut self, id: ConnectionId) {
        if let Some(conn) = self.get_mut(id) {
            conn.set_role(Role::Peer);
        }
    }

    /// Look up a connection by id.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.ids.get(&id).and_then(|hash| self.clients.get(hash))
    }

    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        let hash = self.ids.get(&id)?;
        self.clients.get_mut(hash)
    }

    /// Look up a connection by hash.
    #[must_use]
    pub fn client_by_hash(&self, hash: &str) -> Option<&Connection> {
        self.clients.get(hash)
    }

    /// All registered connections, listener included.
    pub fn clients(&self) -> impl Iterator<Item = (&str, &Connection)> {
        self.clients.iter().map(|(hash, conn)| (hash.as_str(), conn))
    }

    /// Upgraded peers that can still be written to.
    pub fn peers(&self) -> impl Iterator<Item = &Connection> {
        self.clients
            .values()
            .filter(|conn| conn.role().is_peer() && !conn.is_broken())
    }

    /// Evict every connection a cut-short write left broken.
    pub fn remove_broken(&mut self) -> Vec<Connection> {
        let broken: Vec<ConnectionId> = self
            .clients
            .values()
            .filter(|conn| conn.is_broken())
            .map(Connection::id)
            .collect();
        broken
            .into_iter()
            .filter_map(|id| self.remove_client(id))
            .collect()
    }

    /// Connections still handshaking after `timeout`.
    #[must_use]
    pub fn expired_handshakes(&self, timeout: Duration) -> Vec<ConnectionId> {
        self.clients
            .values()
            .filter(|conn| conn.role() == Role::Handshaking && conn.age() >= timeout)
            .map(Connection::id)
            .collect()
    }

    /// Snapshot of every registered hash.
    #[must_use]
    pub fn client_hashes(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Recompute the hash of `conn` from its socket.
    ///
    /// Returns `None` when the peer address can no longer be read, which is
    /// how a torn-down socket is detected.
    #[must_use]
    pub fn client_hash(&self, conn: &Connection) -> Option<String> {
        match conn.socket() {
            Socket::Listener(listener) => listener
                .local_addr()
                .ok()
                .map(|local| format!("{local}-{LISTENER_HASH_SUFFIX}")),
            Socket::Stream(stream) => self.peer_hash(stream),
        }
    }

    fn peer_hash(&self, stream: &TcpStream) -> Option<String> {
        let remote = stream.peer_addr().ok()?;
        let local = match self.local_addr {
            Some(local) => local,
            None => stream.local_addr().ok()?,
        };
        Some(format!("{local}-{remote}"))
    }

    /// Number of registered connections, listener included.
    #[must_use]
    pub fn count_of_clients(&self) -> usize {
        self.clients.len()
    }

    /// Number of upgraded peers.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers().count()
    }

    /// Check if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Wait up to `timeout` for registered sockets to become readable.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the poll itself fails.
    pub fn select(&mut self, timeout: Duration) -> io::Result<Vec<ConnectionId>> {
        self.events.clear();
        self.poller.wait(&mut self.events, Some(timeout))?;
        Ok(self
            .events
            .iter()
            .map(|event| ConnectionId(event.key))
            .collect())
    }
}

impl Drop for Connections {
    fn drop(&mut self) {
        if !self.clients.is_empty() {
            tracing::debug!(total = self.clients.len(), "closing remaining connections");
            self.close_all();
        }
    }
}

impl std::fmt::Debug for Connections {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connections")
            .field("local_addr", &self.local_addr)
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

fn resolve_ipv4(address: &str, port: u16) -> Result<SocketAddr> {
    let bind_error = |reason: String| Error::Startup {
        stage: StartupStage::Bind,
        reason,
    };
    (address, port)
        .to_socket_addrs()
        .map_err(|e| bind_error(format!("cannot resolve {address}: {e}")))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| bind_error(format!("no IPv4 address for {address}")))
}
