//! A worker that records every callback for later assertions.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use wsdaemon::protocol::frame::unmask_text;
use wsdaemon::{Clients, Worker};

/// One observed callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected { hash: String, header: String },
    Message { hash: String, text: String },
    Closed { hash: String, peers: usize },
}

/// Shared view of what the worker saw, readable from the test thread.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    stop: Arc<AtomicBool>,
    send_task_runs: Arc<AtomicUsize>,
    calls_after_stop: Arc<AtomicUsize>,
    peers: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    pub fn closed(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Closed { .. }))
            .collect()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn send_task_runs(&self) -> usize {
        self.send_task_runs.load(Ordering::SeqCst)
    }

    /// Peer count seen by the most recent send hook.
    pub fn peers(&self) -> usize {
        self.peers.load(Ordering::SeqCst)
    }

    pub fn calls_after_stop(&self) -> usize {
        self.calls_after_stop.load(Ordering::SeqCst)
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// What the worker does with inbound text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Nothing,
    Echo,
    Broadcast,
}

pub struct RecordingWorker {
    recorder: Recorder,
    reply: Reply,
    send_every: Option<usize>,
    tick_text: Option<String>,
    checks: usize,
    stopped: bool,
}

impl RecordingWorker {
    pub fn new() -> Self {
        Self {
            recorder: Recorder::default(),
            reply: Reply::Nothing,
            send_every: None,
            tick_text: None,
            checks: 0,
            stopped: false,
        }
    }

    pub fn echo() -> Self {
        Self {
            reply: Reply::Echo,
            ..Self::new()
        }
    }

    pub fn broadcast() -> Self {
        Self {
            reply: Reply::Broadcast,
            ..Self::new()
        }
    }

    /// Ask for the send hook on every `n`th tick.
    pub fn with_send_every(mut self, n: usize) -> Self {
        self.send_every = Some(n);
        self
    }

    /// Run the send hook every tick only to sample the peer count.
    pub fn with_peer_sampling(mut self) -> Self {
        self.send_every = Some(1);
        self.tick_text = Some(String::new());
        self
    }

    /// Broadcast `text` from the send hook instead of `tick N`.
    /// An empty text broadcasts nothing.
    pub fn with_tick_text(mut self, text: String) -> Self {
        self.tick_text = Some(text);
        self
    }

    pub fn recorder(&self) -> Recorder {
        self.recorder.clone()
    }

    fn note_call(&self) {
        if self.stopped {
            self.recorder.calls_after_stop.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Worker for RecordingWorker {
    fn process_new_socket(&mut self, _: &Clients<'_>, hash: &str, header: &[u8]) {
        self.note_call();
        self.recorder.push(Event::Connected {
            hash: hash.to_string(),
            header: String::from_utf8_lossy(header).into_owned(),
        });
    }

    fn process_read_message(&mut self, clients: &Clients<'_>, hash: &str, buffer: &[u8]) {
        self.note_call();
        let text = unmask_text(buffer).unwrap_or_default();
        // Recorded before replying so a client that saw the reply also sees the event.
        self.recorder.push(Event::Message {
            hash: hash.to_string(),
            text: text.clone(),
        });
        match self.reply {
            Reply::Nothing => {}
            Reply::Echo => {
                let _ = clients.mask_and_send_to_client(hash, &text);
            }
            Reply::Broadcast => {
                clients.mask_and_broadcast_to_clients(&text);
            }
        }
    }

    fn process_close_socket(&mut self, clients: &Clients<'_>, hash: &str) {
        self.note_call();
        self.recorder.push(Event::Closed {
            hash: hash.to_string(),
            peers: clients.count(),
        });
    }

    fn process_query_loop_should_stop(&mut self) -> bool {
        self.note_call();
        if self.recorder.stop.load(Ordering::SeqCst) {
            self.stopped = true;
        }
        self.stopped
    }

    fn process_should_call_send_message_tasks_now(&mut self) -> bool {
        self.note_call();
        let Some(every) = self.send_every else {
            return false;
        };
        self.checks += 1;
        self.checks % every == 0
    }

    fn process_send_message_tasks(&mut self, clients: &Clients<'_>) {
        self.note_call();
        let run = self.recorder.send_task_runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.peers.store(clients.count(), Ordering::SeqCst);
        match &self.tick_text {
            None => {
                clients.mask_and_broadcast_to_clients(format!("tick {run}"));
            }
            Some(text) if text.is_empty() => {}
            Some(text) => {
                clients.mask_and_broadcast_to_clients(text);
            }
        }
    }
}
