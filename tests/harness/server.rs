//! Runs a daemon on a background thread.

use std::net::SocketAddr;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use wsdaemon::{Config, Daemon, Result};

use super::worker::{Recorder, RecordingWorker};

pub struct TestServer {
    recorder: Recorder,
    handle: Option<JoinHandle<Result<()>>>,
}

impl TestServer {
    /// Spawn a daemon on `127.0.0.1:0`.
    pub fn spawn(worker: RecordingWorker) -> Result<(Self, SocketAddr)> {
        let config = Config::new()
            .with_host("127.0.0.1")
            .with_port(0)
            .with_poll_timeout(Duration::from_millis(2));
        Self::spawn_with(config, worker)
    }

    /// Spawn a daemon with an explicit configuration.
    pub fn spawn_with(config: Config, worker: RecordingWorker) -> Result<(Self, SocketAddr)> {
        let recorder = worker.recorder();
        let (tx, rx) = mpsc::channel();

        let handle = thread::spawn(move || {
            let mut daemon = Daemon::new(config, worker)?;
            match daemon.start() {
                Ok(addr) => {
                    let _ = tx.send(Ok(addr));
                }
                Err(e) => {
                    let _ = tx.send(Err(e.clone()));
                    return Err(e);
                }
            }
            daemon.run()
        });

        let addr = rx
            .recv()
            .map_err(|_| wsdaemon::Error::Io("daemon thread exited".into()))??;
        Ok((
            Self {
                recorder,
                handle: Some(handle),
            },
            addr,
        ))
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    /// Ask the worker to stop and wait for the loop to exit.
    pub fn stop(mut self) -> Result<()> {
        self.recorder.request_stop();
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join().expect("daemon thread panicked"),
            None => Ok(()),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.recorder.request_stop();
        let _ = self.join();
    }
}
