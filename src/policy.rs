//! Process-wide playback policy shared by every running session.
//!
//! The auto-busy and auto-mare flags, the scheduler tick rate, and the two
//! user overrides live here rather than on individual sessions. With several
//! sessions running at once the flags follow a last-writer-wins rule: the
//! session that most recently armed a flag owns it, and only the owner's
//! termination schedules the matching release command. Re-arming from any
//! session bumps the flag's generation, which voids releases already in
//! flight.

use crate::config::PlaybackConfig;
use crate::session::SessionId;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Which auto flag an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoFlag {
    Busy,
    Mare,
}

/// Scheduler tick presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickRate {
    #[default]
    Normal,
    Fast,
}

#[derive(Debug, Default)]
struct FlagState {
    armed: bool,
    owner: Option<SessionId>,
    generation: u64,
}

/// A claim on a pending release, redeemed by [`PlaybackPolicy::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseTicket {
    flag: AutoFlag,
    generation: u64,
}

#[derive(Debug)]
pub struct PlaybackPolicy {
    ignore_looping: AtomicBool,
    ignore_autocountdown: AtomicBool,
    tick_rate: Mutex<TickRate>,
    normal_tick: Duration,
    fast_tick: Duration,
    busy: Mutex<FlagState>,
    mare: Mutex<FlagState>,
}

impl PlaybackPolicy {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            ignore_looping: AtomicBool::new(config.ignore_looping),
            ignore_autocountdown: AtomicBool::new(config.ignore_autocountdown),
            tick_rate: Mutex::new(TickRate::Normal),
            normal_tick: Duration::from_millis(config.tick_ms.max(1)),
            fast_tick: Duration::from_millis(config.fast_tick_ms.max(1)),
            busy: Mutex::new(FlagState::default()),
            mare: Mutex::new(FlagState::default()),
        }
    }

    pub fn ignore_looping(&self) -> bool {
        self.ignore_looping.load(Ordering::SeqCst)
    }

    pub fn set_ignore_looping(&self, value: bool) {
        self.ignore_looping.store(value, Ordering::SeqCst);
    }

    pub fn ignore_autocountdown(&self) -> bool {
        self.ignore_autocountdown.load(Ordering::SeqCst)
    }

    pub fn set_ignore_autocountdown(&self, value: bool) {
        self.ignore_autocountdown.store(value, Ordering::SeqCst);
    }

    pub fn tick_rate(&self) -> TickRate {
        *lock(&self.tick_rate)
    }

    pub fn set_tick_rate(&self, rate: TickRate) {
        *lock(&self.tick_rate) = rate;
    }

    /// Length of one scheduler tick under the current preset.
    pub fn tick(&self) -> Duration {
        match self.tick_rate() {
            TickRate::Normal => self.normal_tick,
            TickRate::Fast => self.fast_tick,
        }
    }

    fn flag(&self, flag: AutoFlag) -> &Mutex<FlagState> {
        match flag {
            AutoFlag::Busy => &self.busy,
            AutoFlag::Mare => &self.mare,
        }
    }

    pub fn is_armed(&self, flag: AutoFlag) -> bool {
        lock(self.flag(flag)).armed
    }

    /// Arm `flag` on behalf of `owner`, taking it over from any other session.
    pub fn arm(&self, flag: AutoFlag, owner: SessionId) {
        let mut state = lock(self.flag(flag));
        if let Some(previous) = state.owner.filter(|p| state.armed && *p != owner) {
            debug!(
                target: "playback",
                "{:?} flag taken over by session {} from session {}", flag, owner, previous
            );
        }
        state.armed = true;
        state.owner = Some(owner);
        state.generation += 1;
    }

    /// Clear both auto flags, whoever armed them.
    pub fn disarm_all(&self, by: SessionId) {
        for flag in [AutoFlag::Busy, AutoFlag::Mare] {
            let mut state = lock(self.flag(flag));
            if state.armed {
                if let Some(owner) = state.owner.filter(|o| *o != by) {
                    debug!(
                        target: "playback",
                        "{:?} flag owned by session {} cleared by session {}", flag, owner, by
                    );
                }
                state.armed = false;
                state.owner = None;
                state.generation += 1;
            }
        }
    }

    /// If `owner` currently owns an armed `flag`, return a ticket that can
    /// later release it, provided nobody re-arms it in between.
    pub fn release_ticket(&self, flag: AutoFlag, owner: SessionId) -> Option<ReleaseTicket> {
        let state = lock(self.flag(flag));
        (state.armed && state.owner == Some(owner)).then_some(ReleaseTicket {
            flag,
            generation: state.generation,
        })
    }

    /// Disarm the ticket's flag if it has not been re-armed since the ticket
    /// was issued. Returns whether the release command should be sent.
    pub fn release(&self, ticket: ReleaseTicket) -> bool {
        let mut state = lock(self.flag(ticket.flag));
        if !state.armed || state.generation != ticket.generation {
            return false;
        }
        state.armed = false;
        state.owner = None;
        state.generation += 1;
        true
    }
}

impl Default for PlaybackPolicy {
    fn default() -> Self {
        Self::new(&PlaybackConfig::default())
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
