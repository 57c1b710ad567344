//! The host boundary: what the scheduler needs from the program it drives.

use crate::dispatch::{DispatchDrain, DispatchMode};
use anyhow::Result;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// A single-threaded host that executes text commands.
pub trait Host: Send + Sync + 'static {
    /// Execute one command. Only ever called from [`DispatchDrain::drain`],
    /// on whichever thread the host runs its tick on.
    fn execute(&self, command: &str, mode: DispatchMode) -> Result<()>;

    /// Whether playback may start or continue (e.g. not in combat).
    fn is_playback_allowed(&self) -> bool {
        true
    }
}

/// Writes each command to stdout with the time since the host was created.
pub struct ConsoleHost {
    started: Instant,
    allowed: AtomicBool,
}

impl ConsoleHost {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            allowed: AtomicBool::new(true),
        }
    }

    pub fn set_playback_allowed(&self, allowed: bool) {
        self.allowed.store(allowed, Ordering::SeqCst);
    }
}

impl Default for ConsoleHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for ConsoleHost {
    fn execute(&self, command: &str, _mode: DispatchMode) -> Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(
            stdout,
            "[{:>9.3}s] {}",
            self.started.elapsed().as_secs_f64(),
            command
        )?;
        stdout.flush()?;
        Ok(())
    }

    fn is_playback_allowed(&self) -> bool {
        self.allowed.load(Ordering::SeqCst)
    }
}

/// Spawn a background thread that plays the host's tick: it drains the
/// channel every `tick` until every [`crate::Dispatcher`] is dropped.
pub fn spawn_tick_thread(
    mut drain: DispatchDrain,
    host: Arc<dyn Host>,
    tick: Duration,
) -> JoinHandle<()> {
    thread::spawn(move || {
        loop {
            drain.drain(host.as_ref());
            if drain.is_disconnected() {
                debug!(target: "dispatch", "All dispatchers dropped; host tick thread exiting");
                break;
            }
            thread::sleep(tick);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::channel;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Host for Recorder {
        fn execute(&self, command: &str, _mode: DispatchMode) -> Result<()> {
            self.0.lock().unwrap().push(command.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_tick_thread_drains_until_disconnected() {
        let (dispatcher, drain) = channel();
        let host = Arc::new(Recorder::default());
        let handle = spawn_tick_thread(drain, host.clone(), Duration::from_millis(1));
        dispatcher.dispatch("/a", DispatchMode::Queue);
        dispatcher.dispatch("/b", DispatchMode::Queue);
        drop(dispatcher);
        handle.join().unwrap();
        assert_eq!(*host.0.lock().unwrap(), ["/a", "/b"]);
    }

    #[test]
    fn test_console_host_allowed_toggle() {
        let host = ConsoleHost::new();
        assert!(host.is_playback_allowed());
        host.set_playback_allowed(false);
        assert!(!host.is_playback_allowed());
    }
}
