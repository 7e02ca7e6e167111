//! Test harness for end-to-end daemon tests.
//!
//! Runs a [`Daemon`](wsdaemon::Daemon) on an ephemeral loopback port in a
//! background thread and talks to it with blocking clients.

#![allow(dead_code)]

mod client;
mod server;
mod worker;

pub use client::{TestClient, UPGRADE_KEY, upgrade_request};
pub use server::TestServer;
pub use worker::{Event, Recorder, RecordingWorker};

use std::sync::Once;
use std::time::{Duration, Instant};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging once per test binary.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "wsdaemon=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Poll `check` until it returns true or five seconds pass.
pub fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}
