//! [`AutoBusy`] and [`AutoMare`] directives: arm a process-wide flag and send
//! the matching host command. The release command is sent after a grace
//! period once the owning session ends (see [`crate::engine`]).
//!
//! Script syntax: `/autobusy`, `/autobussy`, `/automare`

use super::Directive;
use crate::command::Context;
use crate::dispatch::DispatchMode;
use crate::policy::AutoFlag;
use tracing::debug;

/// Turns on the host's busy status for the rest of the session.
///
/// The `/autobussy` spelling also sends twelve numbered decorations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoBusy {
    pub decorated: bool,
}

impl AutoBusy {
    pub const NAME: &'static str = "/autobusy";
    pub const DECORATED_NAME: &'static str = "/autobussy";

    pub(crate) fn parse_plain(_args: &str) -> Option<Directive> {
        Some(Directive::AutoBusy(Self { decorated: false }))
    }

    pub(crate) fn parse_decorated(_args: &str) -> Option<Directive> {
        Some(Directive::AutoBusy(Self { decorated: true }))
    }

    pub fn execute(&self, ctx: &Context) {
        debug!(target: "playback", "Session {} armed auto-busy", ctx.session_id());
        ctx.policy().arm(AutoFlag::Busy, ctx.session_id());
        ctx.dispatch(ctx.host_commands().busy_on.clone(), DispatchMode::Queue);
        if self.decorated {
            for decoration in ctx.host_commands().bussy_decorations() {
                ctx.dispatch(decoration, DispatchMode::NoQueue);
            }
        }
    }
}

/// Turns the host's mare sync off for the rest of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoMare;

impl AutoMare {
    pub const NAME: &'static str = "/automare";

    pub(crate) fn parse(_args: &str) -> Option<Directive> {
        Some(Directive::AutoMare)
    }

    pub fn execute(ctx: &Context) {
        debug!(target: "playback", "Session {} armed auto-mare", ctx.session_id());
        ctx.policy().arm(AutoFlag::Mare, ctx.session_id());
        ctx.dispatch(ctx.host_commands().mare_off.clone(), DispatchMode::Queue);
    }
}
