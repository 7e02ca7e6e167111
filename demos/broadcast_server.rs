//! Broadcast chat server.
//!
//! Every join, message and departure is relayed to all connected peers, and
//! a heartbeat goes out every thirty seconds.
//!
//! Run with: cargo run --example broadcast_server
//!
//! Override the endpoint with `WSDAEMON_HOST`, `WSDAEMON_PORT` and
//! `WSDAEMON_PATH`; set `RUST_LOG=wsdaemon=debug` for per-tick logging.

use std::error::Error;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;
use wsdaemon::protocol::frame::unmask_text;
use wsdaemon::{Clients, Config, Daemon, Worker};

const HEARTBEAT: Duration = Duration::from_secs(30);

struct Broadcaster {
    last_heartbeat: Instant,
}

impl Worker for Broadcaster {
    fn process_new_socket(&mut self, clients: &Clients<'_>, hash: &str, header: &[u8]) {
        let header = String::from_utf8_lossy(header);
        tracing::info!(hash, %header, "peer joined");
        clients.mask_and_broadcast_to_clients(format!("new socket {hash} , {header}"));
    }

    fn process_read_message(&mut self, clients: &Clients<'_>, hash: &str, buffer: &[u8]) {
        match unmask_text(buffer) {
            Ok(message) => {
                tracing::info!(hash, %message, "message received");
                clients.mask_and_broadcast_to_clients(format!("read message {hash} , {message}"));
            }
            Err(e) => tracing::warn!(hash, error = %e, "undecodable frame"),
        }
    }

    fn process_close_socket(&mut self, clients: &Clients<'_>, hash: &str) {
        tracing::info!(hash, "peer left");
        clients.mask_and_broadcast_to_clients(format!("close socket {hash}"));
    }

    fn process_should_call_send_message_tasks_now(&mut self) -> bool {
        self.last_heartbeat.elapsed() >= HEARTBEAT
    }

    fn process_send_message_tasks(&mut self, clients: &Clients<'_>) {
        self.last_heartbeat = Instant::now();
        let sent = clients.mask_and_broadcast_to_clients("heartbeat");
        tracing::debug!(sent, "heartbeat sent");
    }
}

fn config_from_env() -> Result<Config, Box<dyn Error>> {
    let mut config = Config::new();
    if let Ok(host) = std::env::var("WSDAEMON_HOST") {
        config = config.with_host(host);
    }
    if let Ok(port) = std::env::var("WSDAEMON_PORT") {
        config = config.with_port(port.parse()?);
    }
    if let Ok(path) = std::env::var("WSDAEMON_PATH") {
        config = config.with_service_path(path);
    }
    Ok(config)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config_from_env()?;
    tracing::info!(host = %config.host, port = config.port, path = %config.service_path, "starting");

    let worker = Broadcaster {
        last_heartbeat: Instant::now(),
    };
    let mut daemon = Daemon::new(config, worker)?;
    daemon.run()?;
    Ok(())
}
