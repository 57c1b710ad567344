//! Playback sessions: one running instance of a compiled script.
//!
//! A [`Session`] is shared between the registry, its scheduler task, and
//! anyone inspecting progress. Only the scheduler advances it; the registry
//! may pause, resume, seek, or cancel it. State transitions:
//!
//! ```text
//! Stopped --begin--> Playing <--pause/resume--> Paused
//! Playing | Paused --cancel / host forbids--> Cancelled
//! Playing --end of commands--> Stopped
//! ```

use crate::command::{Command, CompiledScript, Region};
use crate::directives::CountdownMode;
use crate::policy::lock;
use crate::script::Script;
use crate::timeline::{Timeline, TimelineSnapshot};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Stopped,
    Playing,
    Paused,
    Cancelled,
}

/// Progress of a session for display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackProgress {
    pub status: PlaybackStatus,
    /// Source line of the current command.
    pub line: Option<usize>,
    pub script: TimelineSnapshot,
    pub region: TimelineSnapshot,
    pub command: TimelineSnapshot,
}

#[derive(Debug)]
struct SessionState {
    status: PlaybackStatus,
    index: usize,
    current: Option<usize>,
    current_region: Option<usize>,
    pending_seek: Option<usize>,
    epoch: u64,
    script_timeline: Timeline,
    region_timeline: Timeline,
    command_timeline: Timeline,
    countdown: Option<CountdownMode>,
    ping_offset: Duration,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    script: Arc<Script>,
    region_filter: Option<String>,
    compiled: CompiledScript,
    /// Mirrors `status == Cancelled` for lock-free checks on every tick.
    cancelled: AtomicBool,
    state: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        script: Arc<Script>,
        region_filter: Option<String>,
        compiled: CompiledScript,
    ) -> Self {
        let total = compiled.total_wait();
        Self {
            id,
            script,
            region_filter,
            compiled,
            cancelled: AtomicBool::new(false),
            state: Mutex::new(SessionState {
                status: PlaybackStatus::Stopped,
                index: 0,
                current: None,
                current_region: None,
                pending_seek: None,
                epoch: 0,
                script_timeline: Timeline::new(total),
                region_timeline: Timeline::default(),
                command_timeline: Timeline::default(),
                countdown: None,
                ping_offset: Duration::ZERO,
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn script(&self) -> &Arc<Script> {
        &self.script
    }

    pub fn region_filter(&self) -> Option<&str> {
        self.region_filter.as_deref()
    }

    pub fn compiled(&self) -> &CompiledScript {
        &self.compiled
    }

    pub fn commands(&self) -> &[Command] {
        &self.compiled.commands
    }

    pub fn regions(&self) -> &[Region] {
        &self.compiled.regions
    }

    pub fn status(&self) -> PlaybackStatus {
        lock(&self.state).status
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run `f` with the current status and epoch unless the session is
    /// cancelled. The state lock is held throughout, so `f` runs entirely
    /// before or entirely after a concurrent `cancel`.
    ///
    /// `f` must not call back into this session.
    pub(crate) fn if_live<R>(
        &self,
        f: impl FnOnce(PlaybackStatus, u64) -> Option<R>,
    ) -> Option<R> {
        let state = lock(&self.state);
        if state.status == PlaybackStatus::Cancelled {
            return None;
        }
        f(state.status, state.epoch)
    }

    /// Bumped on every seek; timers compare it to detect they were overtaken.
    pub fn epoch(&self) -> u64 {
        lock(&self.state).epoch
    }

    /// Index of the next command to run.
    pub fn index(&self) -> usize {
        lock(&self.state).index
    }

    pub fn current_command(&self) -> Option<&Command> {
        let current = lock(&self.state).current?;
        self.compiled.commands.get(current)
    }

    pub fn current_line(&self) -> Option<usize> {
        self.current_command().map(|c| c.line)
    }

    pub fn progress(&self) -> PlaybackProgress {
        let now = Instant::now();
        let state = lock(&self.state);
        PlaybackProgress {
            status: state.status,
            line: state
                .current
                .and_then(|i| self.compiled.commands.get(i))
                .map(|c| c.line),
            script: state.script_timeline.snapshot(now),
            region: state.region_timeline.snapshot(now),
            command: state.command_timeline.snapshot(now),
        }
    }

    /// `Stopped -> Playing`. Returns false if the session was already started
    /// or cancelled.
    pub(crate) fn begin(&self, now: Instant) -> bool {
        let mut state = lock(&self.state);
        if state.status != PlaybackStatus::Stopped || self.is_cancelled() {
            return false;
        }
        state.status = PlaybackStatus::Playing;
        state.script_timeline.start(now);
        true
    }

    pub(crate) fn pause(&self, now: Instant) -> bool {
        let mut state = lock(&self.state);
        if state.status != PlaybackStatus::Playing {
            return false;
        }
        state.status = PlaybackStatus::Paused;
        state.script_timeline.pause(now);
        state.region_timeline.pause(now);
        state.command_timeline.pause(now);
        true
    }

    pub(crate) fn resume(&self, now: Instant) -> bool {
        let mut state = lock(&self.state);
        if state.status != PlaybackStatus::Paused {
            return false;
        }
        state.status = PlaybackStatus::Playing;
        state.script_timeline.resume(now);
        state.region_timeline.resume(now);
        state.command_timeline.resume(now);
        true
    }

    /// Move to `Cancelled`. Returns false if already cancelled.
    pub(crate) fn cancel(&self) -> bool {
        let mut state = lock(&self.state);
        if state.status == PlaybackStatus::Cancelled {
            return false;
        }
        state.status = PlaybackStatus::Cancelled;
        self.cancelled.store(true, Ordering::SeqCst);
        true
    }

    /// Queue a jump to the first command compiled from `line`. Returns false
    /// if no command has that line number.
    pub(crate) fn request_seek(&self, line: usize) -> bool {
        let Some(target) = self.compiled.position_of_line(line) else {
            return false;
        };
        let mut state = lock(&self.state);
        if state.status == PlaybackStatus::Cancelled {
            return false;
        }
        state.pending_seek = Some(target);
        state.epoch += 1;
        true
    }

    pub(crate) fn has_pending_seek(&self) -> bool {
        lock(&self.state).pending_seek.is_some()
    }

    /// Apply a queued seek, if any, and return the new index.
    pub(crate) fn apply_seek(&self) -> Option<usize> {
        let mut state = lock(&self.state);
        let target = state.pending_seek.take()?;
        state.index = target;
        state.current_region = None;
        Some(target)
    }

    /// Make the command at `index` current. Returns true if this entered a
    /// different region than the previous command.
    pub(crate) fn enter(&self, index: usize, now: Instant) -> bool {
        let command = &self.compiled.commands[index];
        let mut state = lock(&self.state);
        state.index = index;
        state.current = Some(index);
        state.command_timeline.restart(command.wait, now);
        if state.current_region == Some(command.region) {
            return false;
        }
        state.current_region = Some(command.region);
        let region_wait = self.compiled.regions[command.region].wait;
        state.region_timeline.restart(region_wait, now);
        true
    }

    pub(crate) fn advance(&self) {
        lock(&self.state).index += 1;
    }

    /// Back to the first command, restarting the whole-script timeline.
    pub(crate) fn restart(&self, now: Instant) {
        let mut state = lock(&self.state);
        state.index = 0;
        state.current_region = None;
        let total = self.compiled.total_wait();
        state.script_timeline.restart(total, now);
    }

    /// Clear the current-command pointer and settle the final status.
    pub(crate) fn finish(&self) -> PlaybackStatus {
        let mut state = lock(&self.state);
        state.current = None;
        state.current_region = None;
        state.region_timeline.clear();
        state.command_timeline.clear();
        if state.status != PlaybackStatus::Cancelled {
            state.status = PlaybackStatus::Stopped;
        }
        state.status
    }

    pub(crate) fn countdown(&self) -> Option<CountdownMode> {
        lock(&self.state).countdown
    }

    pub(crate) fn set_countdown(&self, mode: Option<CountdownMode>) {
        lock(&self.state).countdown = mode;
    }

    pub(crate) fn set_ping_offset(&self, offset: Duration) {
        lock(&self.state).ping_offset = offset;
    }

    /// Return the ping offset and reset it; it applies to one wait only.
    pub(crate) fn take_ping_offset(&self) -> Duration {
        std::mem::take(&mut lock(&self.state).ping_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::compile_str;

    fn session(text: &str) -> Session {
        let script = Arc::new(Script::inline("test", text));
        Session::new(SessionId(1), script, None, compile_str(text, None))
    }

    #[test]
    fn test_state_machine() {
        let s = session("/a\n/b\n");
        let now = Instant::now();
        assert_eq!(s.status(), PlaybackStatus::Stopped);
        assert!(!s.pause(now));
        assert!(s.begin(now));
        assert!(!s.begin(now));
        assert!(s.pause(now));
        assert_eq!(s.status(), PlaybackStatus::Paused);
        assert!(!s.pause(now));
        assert!(s.resume(now));
        assert!(s.cancel());
        assert!(!s.cancel());
        assert!(s.is_cancelled());
        assert!(!s.resume(now));
        assert_eq!(s.finish(), PlaybackStatus::Cancelled);
    }

    #[test]
    fn test_seek_targets_first_command_on_line() {
        let s = session("/a\n\n/b\n/c\n");
        let epoch = s.epoch();
        assert!(!s.request_seek(2));
        assert!(s.request_seek(3));
        assert!(s.epoch() > epoch);
        assert!(s.has_pending_seek());
        assert_eq!(s.apply_seek(), Some(1));
        assert_eq!(s.index(), 1);
        assert_eq!(s.apply_seek(), None);
    }

    #[test]
    fn test_enter_reports_region_change() {
        let s = session("/a\n#region R\n/b\n/c\n");
        let now = Instant::now();
        assert!(s.enter(0, now));
        assert!(s.enter(1, now));
        assert!(!s.enter(2, now));
        assert_eq!(s.current_line(), Some(4));
        s.finish();
        assert_eq!(s.current_command(), None);
        assert_eq!(s.status(), PlaybackStatus::Stopped);
    }

    #[test]
    fn test_if_live_refuses_after_cancel() {
        let s = session("/a\n");
        assert!(s.begin(Instant::now()));
        let live = s.if_live(|status, epoch| Some((status, epoch)));
        assert_eq!(live, Some((PlaybackStatus::Playing, 0)));
        assert!(s.cancel());
        let mut ran = false;
        let after = s.if_live(|_, _| {
            ran = true;
            Some(())
        });
        assert_eq!(after, None);
        assert!(!ran);
    }

    #[test]
    fn test_ping_offset_used_once() {
        let s = session("/a\n");
        s.set_ping_offset(Duration::from_millis(100));
        assert_eq!(s.take_ping_offset(), Duration::from_millis(100));
        assert_eq!(s.take_ping_offset(), Duration::ZERO);
    }
}
