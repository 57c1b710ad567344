//! The command dispatch channel.
//!
//! Playback sessions run on tokio tasks, but the host accepts commands only
//! on its own execution context (for a game client, the frame/tick thread).
//! [`channel`] creates the two halves that bridge the gap:
//!
//! - [`Dispatcher`], a cloneable producer handle that never blocks, and
//! - [`DispatchDrain`], the single consumer, which the host's per-tick hook
//!   calls to execute everything queued so far in FIFO order.

use crate::host::Host;
use crate::session::SessionId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{trace, warn};

/// How the host should treat a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Queue behind other host input while the host allows it.
    Queue,
    /// Execute now or drop; never queued by the host.
    NoQueue,
}

/// One queued unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEnvelope {
    pub command: String,
    pub mode: DispatchMode,
    /// Session that produced the command, if any.
    pub origin: Option<SessionId>,
}

/// Create a connected producer/consumer pair.
pub fn channel() -> (Dispatcher, DispatchDrain) {
    let (tx, rx) = unbounded_channel();
    let gate = DispatchGate::default();
    (
        Dispatcher { tx },
        DispatchDrain {
            rx,
            gate,
            disconnected: false,
        },
    )
}

/// Producer half of the dispatch channel.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: UnboundedSender<DispatchEnvelope>,
}

impl Dispatcher {
    /// Queue a command that does not belong to any session.
    pub fn dispatch(&self, command: impl Into<String>, mode: DispatchMode) {
        self.send(DispatchEnvelope {
            command: command.into(),
            mode,
            origin: None,
        });
    }

    /// Queue a command on behalf of a session.
    pub fn dispatch_from(&self, origin: SessionId, command: impl Into<String>, mode: DispatchMode) {
        self.send(DispatchEnvelope {
            command: command.into(),
            mode,
            origin: Some(origin),
        });
    }

    fn send(&self, envelope: DispatchEnvelope) {
        trace!(target: "dispatch", "Queued {:?}", envelope.command);
        if self.tx.send(envelope).is_err() {
            warn!(target: "dispatch", "Dispatch drain is gone; command dropped");
        }
    }
}

/// Flag that is raised for exactly the duration of each host execution.
///
/// Hosts that must distinguish scheduler-issued commands from user input can
/// consult it from inside [`Host::execute`].
#[derive(Debug, Clone, Default)]
pub struct DispatchGate(Arc<AtomicBool>);

impl DispatchGate {
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, open: bool) {
        self.0.store(open, Ordering::SeqCst);
    }
}

/// Consumer half of the dispatch channel.
#[derive(Debug)]
pub struct DispatchDrain {
    rx: UnboundedReceiver<DispatchEnvelope>,
    gate: DispatchGate,
    disconnected: bool,
}

impl DispatchDrain {
    pub fn gate(&self) -> DispatchGate {
        self.gate.clone()
    }

    /// Execute every pending envelope on `host`, oldest first, and return how
    /// many ran. Call once per host tick from the host's execution context.
    ///
    /// Host failures are logged and skipped; they are never retried.
    pub fn drain(&mut self, host: &dyn Host) -> usize {
        let mut executed = 0;
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    self.gate.set(true);
                    let result = host.execute(&envelope.command, envelope.mode);
                    self.gate.set(false);
                    if let Err(e) = result {
                        warn!(target: "dispatch", "Host rejected {:?}: {:#}", envelope.command, e);
                    }
                    executed += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
        executed
    }

    /// Take every pending envelope without executing it.
    pub fn take_pending(&mut self) -> Vec<DispatchEnvelope> {
        let mut pending = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => pending.push(envelope),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.disconnected = true;
                    break;
                }
            }
        }
        pending
    }

    /// Whether every [`Dispatcher`] has been dropped and the queue is empty.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}
