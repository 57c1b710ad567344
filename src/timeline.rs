//! The timeline primitive shared by commands, regions, and whole scripts.
//!
//! A [`Timeline`] knows its total duration and, once started, how much of it
//! has been played. Time spent paused does not count as elapsed, so progress
//! freezes while a session is paused and picks up where it left off on resume.
//!
//! All timestamps are [`tokio::time::Instant`] so that tests running on a
//! paused tokio clock observe the same virtual time as the scheduler.

use std::time::Duration;
use tokio::time::Instant;

/// Elapsed/remaining bookkeeping for one timed unit.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    total: Duration,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    paused_for: Duration,
}

impl Timeline {
    /// Create an unstarted timeline of the given total length.
    pub fn new(total: Duration) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Start (or restart) the timeline at `now`, discarding previous progress.
    pub fn start(&mut self, now: Instant) {
        self.started_at = Some(now);
        self.paused_at = None;
        self.paused_for = Duration::ZERO;
    }

    /// Replace the total and restart.
    pub fn restart(&mut self, total: Duration, now: Instant) {
        self.total = total;
        self.start(now);
    }

    /// Return to the unstarted state.
    pub fn clear(&mut self) {
        self.started_at = None;
        self.paused_at = None;
        self.paused_for = Duration::ZERO;
    }

    pub fn pause(&mut self, now: Instant) {
        if self.started_at.is_some() && self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    pub fn resume(&mut self, now: Instant) {
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_for += now.saturating_duration_since(paused_at);
        }
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Played time at `now`, excluding paused intervals. Zero if unstarted.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let until = self.paused_at.unwrap_or(now);
        until
            .saturating_duration_since(started_at)
            .saturating_sub(self.paused_for)
    }

    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.total.saturating_sub(self.elapsed_at(now))
    }

    /// Fraction played in `[0, 1]`; `0` if unstarted, `1` for a started
    /// zero-length timeline.
    pub fn progress_at(&self, now: Instant) -> f64 {
        if !self.is_started() {
            return 0.0;
        }
        if self.total.is_zero() {
            return 1.0;
        }
        (self.elapsed_at(now).as_secs_f64() / self.total.as_secs_f64()).clamp(0.0, 1.0)
    }

    /// Capture the current state for display.
    pub fn snapshot(&self, now: Instant) -> TimelineSnapshot {
        TimelineSnapshot {
            total: self.total,
            elapsed: self.elapsed_at(now),
            remaining: self.remaining_at(now),
            progress: self.progress_at(now),
            paused: self.is_paused(),
        }
    }
}

/// A point-in-time view of a [`Timeline`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineSnapshot {
    pub total: Duration,
    pub elapsed: Duration,
    pub remaining: Duration,
    pub progress: f64,
    pub paused: bool,
}
