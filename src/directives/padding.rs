//! [`Padding`] directive: fire a command repeatedly in the background.
//!
//! Script syntax: `/pad [N] <cmd>` or `/padding [N] <cmd>`
//!
//! The repeats run on a detached task spaced [`Padding::SPACING`] apart,
//! independent of the main timeline. The task stops early once its session
//! is cancelled.

use super::Directive;
use crate::command::Context;
use crate::dispatch::DispatchMode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Padding {
    pub count: u32,
    pub payload: String,
}

impl Padding {
    pub const DEFAULT_COUNT: u32 = 40;
    pub const MAX_COUNT: u32 = 100;
    pub const SPACING: Duration = Duration::from_millis(10);

    /// Parse the text after `/pad `: an optional leading repeat count, then
    /// the payload. Returns `None` when there is no payload.
    pub fn parse(args: &str) -> Option<Self> {
        let args = args.trim();
        if args.is_empty() {
            return None;
        }
        if let Some((first, rest)) = args.split_once(char::is_whitespace) {
            let rest = rest.trim();
            if let Ok(count) = first.parse::<i64>() {
                return Some(Self {
                    count: count.clamp(1, i64::from(Self::MAX_COUNT)) as u32,
                    payload: rest.to_string(),
                });
            }
        }
        Some(Self {
            count: Self::DEFAULT_COUNT,
            payload: args.to_string(),
        })
    }

    pub(crate) fn parse_directive(args: &str) -> Option<Directive> {
        Self::parse(args).map(Directive::Pad)
    }

    /// Start the repeat loop. The returned handle may be dropped.
    pub fn spawn(&self, ctx: &Context) -> JoinHandle<()> {
        let dispatcher = ctx.registry().dispatcher().clone();
        let session = Arc::downgrade(ctx.session());
        let origin = ctx.session_id();
        let payload = self.payload.clone();
        let count = self.count;
        tokio::spawn(async move {
            for sent in 0..count {
                let queued = session.upgrade().and_then(|session| {
                    session.if_live(|_, _| {
                        dispatcher.dispatch_from(origin, payload.clone(), DispatchMode::NoQueue);
                        Some(())
                    })
                });
                if queued.is_none() {
                    trace!(
                        target: "playback",
                        "Padding for session {} stopped after {}", origin, sent
                    );
                    return;
                }
                sleep(Self::SPACING).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_count() {
        let pad = Padding::parse("/ac jump").unwrap();
        assert_eq!(pad.count, Padding::DEFAULT_COUNT);
        assert_eq!(pad.payload, "/ac jump");
    }

    #[test]
    fn test_parse_explicit_count() {
        let pad = Padding::parse("3 /ac jump").unwrap();
        assert_eq!(pad.count, 3);
        assert_eq!(pad.payload, "/ac jump");
    }

    #[test]
    fn test_parse_clamps_count() {
        assert_eq!(Padding::parse("500 /jump").unwrap().count, 100);
        assert_eq!(Padding::parse("0 /jump").unwrap().count, 1);
        assert_eq!(Padding::parse("-4 /jump").unwrap().count, 1);
    }

    #[test]
    fn test_lone_number_is_payload() {
        let pad = Padding::parse("7").unwrap();
        assert_eq!(pad.count, Padding::DEFAULT_COUNT);
        assert_eq!(pad.payload, "7");
    }

    #[test]
    fn test_parse_empty() {
        assert!(Padding::parse("   ").is_none());
    }
}
