//! [`CountdownMode`] directive and the auto-countdown dispatcher.
//!
//! Script syntax: `/autocountdown [start|off]` or `/autocd [start|off]`
//!
//! The directive only sets the session's mode. The countdown itself is
//! scheduled by [`schedule_countdown`] each time playback enters a new region.
//! The timer task holds the session id, never the session, and re-resolves it
//! through the registry when it fires.

use super::Directive;
use crate::command::Context;
use crate::dispatch::DispatchMode;
use crate::session::PlaybackStatus;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace};

/// Regions this short or shorter never get a countdown.
pub const COUNTDOWN_MIN_REGION: Duration = Duration::from_secs(9);

/// Subtracted from the lead time to allow for the player's reaction.
pub const REACTION_OFFSET: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownMode {
    /// Five-second lead.
    Start,
    /// Six-second lead.
    Pulse,
    /// Clears the mode at the next region boundary.
    Off,
}

impl CountdownMode {
    pub const NAME: &'static str = "/autocountdown";
    pub const SHORT_NAME: &'static str = "/autocd";

    /// Parse the directive argument. Anything other than `start` or `off`,
    /// including nothing, selects [`CountdownMode::Pulse`].
    pub fn parse(args: &str) -> Self {
        match args.trim().to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "off" => Self::Off,
            _ => Self::Pulse,
        }
    }

    pub(crate) fn parse_directive(args: &str) -> Option<Directive> {
        Some(Directive::AutoCountdown(Self::parse(args)))
    }

    /// How long before the region's end the countdown should finish.
    pub fn lead(self) -> Option<Duration> {
        match self {
            Self::Start => Some(Duration::from_secs(5)),
            Self::Pulse => Some(Duration::from_secs(6)),
            Self::Off => None,
        }
    }
}

/// Offset from region entry at which the countdown fires, or `None` if the
/// region is not eligible.
///
/// A region is eligible when it is neither named nor default, its total wait
/// exceeds [`COUNTDOWN_MIN_REGION`], and at least one later eligible region
/// follows it.
pub fn countdown_offset(
    regions: &[crate::command::Region],
    region: usize,
    mode: CountdownMode,
) -> Option<Duration> {
    let lead = mode.lead()?;
    let current = regions.get(region)?;
    if !current.is_countdown_eligible() || current.wait <= COUNTDOWN_MIN_REGION {
        return None;
    }
    if !regions[region + 1..].iter().any(|r| r.is_countdown_eligible()) {
        return None;
    }
    Some(current.wait.saturating_sub(lead - REACTION_OFFSET))
}

/// Schedule the countdown for `region`, just entered by the context's session.
///
/// When the timer fires it does nothing unless the session is still
/// registered, still playing, has not been seeked since, and the global
/// ignore-countdown override is off.
pub fn schedule_countdown(
    ctx: &Context,
    region: usize,
    mode: CountdownMode,
) -> Option<JoinHandle<()>> {
    let session = ctx.session();
    let offset = countdown_offset(session.regions(), region, mode)?;
    let lead = mode.lead()?;
    let command = format!("{} {}", ctx.host_commands().countdown, lead.as_secs());
    let registry = ctx.registry().clone();
    let id = session.id();
    let epoch = session.epoch();

    debug!(
        target: "playback",
        "Session {} countdown for region '{}' in {:?}", id, session.regions()[region].name, offset
    );

    Some(tokio::spawn(async move {
        sleep(offset).await;
        let Some(session) = registry.find(id) else {
            trace!(target: "playback", "Countdown skipped: session {} is gone", id);
            return;
        };
        let ignored = registry.policy().ignore_autocountdown();
        let sent = session.if_live(|status, current| {
            if status != PlaybackStatus::Playing || current != epoch || ignored {
                return None;
            }
            registry
                .dispatcher()
                .dispatch_from(id, command, DispatchMode::Queue);
            Some(())
        });
        if sent.is_none() {
            trace!(target: "playback", "Countdown skipped for session {}", id);
        }
    }))
}
