//! The playback scheduler: runs one session's commands in timeline order.
//!
//! Waits are not plain sleeps. Each command's wait is added to a running
//! budget, the scheduler sleeps in ticks of at most [`PlaybackPolicy::tick`],
//! and every tick subtracts the time that actually passed. Oversleeping on one
//! command therefore shortens the next instead of accumulating across a long
//! script.

use crate::command::{Command, Context};
use crate::directives::{AutoMare, CountdownMode, Directive, schedule_countdown};
use crate::dispatch::DispatchMode;
use crate::policy::{AutoFlag, PlaybackPolicy};
use crate::registry::Registry;
use crate::session::{PlaybackStatus, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, trace, warn};

/// Why the main loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Finished,
    Cancelled,
    /// The host stopped allowing playback mid-run.
    Forbidden,
}

/// Outcome of holding for one command's wait.
enum Hold {
    Done,
    Seek,
    Stop(Stop),
}

/// Drives a single [`Session`] until it finishes or is cancelled.
pub struct Engine {
    ctx: Context,
    /// Nanoseconds still owed to the timeline; negative after oversleeping.
    budget: i128,
    last_check: Instant,
}

impl Engine {
    pub fn new(session: Arc<Session>, registry: Registry) -> Self {
        Engine {
            ctx: Context::new(session, registry),
            budget: 0,
            last_check: Instant::now(),
        }
    }

    fn session(&self) -> &Arc<Session> {
        self.ctx.session()
    }

    fn policy(&self) -> &Arc<PlaybackPolicy> {
        self.ctx.policy()
    }

    /// Play the session to completion, then release its resources.
    pub async fn run(mut self) {
        let stop = if self.session().begin(Instant::now()) {
            self.last_check = Instant::now();
            self.play().await
        } else {
            Stop::Cancelled
        };
        self.teardown(stop);
    }

    async fn play(&mut self) -> Stop {
        let session = self.session().clone();
        loop {
            if let Some(stop) = self.check_stop() {
                return stop;
            }
            if session.status() == PlaybackStatus::Paused {
                sleep(self.policy().tick()).await;
                self.last_check = Instant::now();
                continue;
            }
            if let Some(index) = session.apply_seek() {
                debug!(
                    target: "playback",
                    "Session {} seeked to command {}", session.id(), index
                );
                self.reset_budget();
            }

            let index = session.index();
            let Some(command) = session.commands().get(index) else {
                return Stop::Finished;
            };
            if session.enter(index, Instant::now()) {
                self.enter_region(command);
            }
            trace!(
                target: "playback",
                "Session {} line {}: {:?}", session.id(), command.line, command.text
            );

            if self.execute(command) {
                continue;
            }
            if command.directive.skips_wait() {
                session.advance();
                continue;
            }

            let wait = command.wait.saturating_sub(session.take_ping_offset());
            self.budget = self.budget.saturating_add(nanos(wait));
            match self.hold().await {
                Hold::Done => session.advance(),
                Hold::Seek => continue,
                Hold::Stop(stop) => return stop,
            }
        }
    }

    /// Run the command's side effects. Returns true if the index was reset
    /// and the loop should restart without advancing.
    fn execute(&self, command: &Command) -> bool {
        let ctx = &self.ctx;
        match &command.directive {
            Directive::Dispatch => {
                ctx.dispatch(command.text.clone(), DispatchMode::Queue);
            }
            Directive::Hold | Directive::MicroCancel => {}
            Directive::Loop => return self.restart(),
            Directive::AutoBusy(busy) => busy.execute(ctx),
            Directive::AutoMare => AutoMare::execute(ctx),
            Directive::AutoCountdown(mode) => {
                debug!(
                    target: "playback",
                    "Session {} countdown mode {:?}", ctx.session_id(), mode
                );
                ctx.session().set_countdown(Some(*mode));
            }
            Directive::AutoPing => {
                let offset = ctx.registry().config().playback.autoping();
                ctx.session().set_ping_offset(offset);
            }
            Directive::AnimationCancel => {
                for cancel in &ctx.host_commands().animation_cancel {
                    ctx.dispatch(cancel.clone(), DispatchMode::NoQueue);
                }
                ctx.dispatch(command.text.clone(), DispatchMode::Queue);
            }
            Directive::Pad(padding) => {
                padding.spawn(ctx);
            }
        }
        false
    }

    fn restart(&self) -> bool {
        let session = self.session();
        if session.commands().len() <= 1 {
            return false;
        }
        if self.policy().ignore_looping() {
            debug!(
                target: "playback",
                "Session {} reached /loop; looping is ignored", session.id()
            );
            return false;
        }
        debug!(target: "playback", "Session {} looping", session.id());
        self.policy().disarm_all(session.id());
        session.restart(Instant::now());
        true
    }

    fn enter_region(&self, command: &Command) {
        let session = self.session();
        let region = &session.regions()[command.region];
        match session.countdown() {
            None => {}
            Some(CountdownMode::Off) => session.set_countdown(None),
            // Entering mid-region after a seek would put the countdown off the beat.
            Some(mode) if command.line == region.start_line => {
                schedule_countdown(&self.ctx, command.region, mode);
            }
            Some(_) => {}
        }
    }

    /// Sleep until the wait budget is spent, one tick at a time.
    async fn hold(&mut self) -> Hold {
        let session = self.session().clone();
        if self.budget <= 0 {
            tokio::task::yield_now().await;
        }
        while self.budget > 0 {
            let step = nanos(self.policy().tick()).min(self.budget);
            sleep(Duration::from_nanos(u64::try_from(step).unwrap_or(u64::MAX))).await;
            let now = Instant::now();
            self.budget -= nanos(now.duration_since(self.last_check));
            self.last_check = now;

            if let Some(stop) = self.check_stop() {
                return Hold::Stop(stop);
            }
            if session.has_pending_seek() {
                return Hold::Seek;
            }
            while session.status() == PlaybackStatus::Paused {
                sleep(self.policy().tick()).await;
                self.last_check = Instant::now();
                if let Some(stop) = self.check_stop() {
                    return Hold::Stop(stop);
                }
                if session.has_pending_seek() {
                    return Hold::Seek;
                }
            }
        }
        Hold::Done
    }

    fn reset_budget(&mut self) {
        self.budget = 0;
        self.last_check = Instant::now();
    }

    /// Checked before every command and on every tick.
    fn check_stop(&self) -> Option<Stop> {
        let session = self.session();
        if session.is_cancelled() {
            return Some(Stop::Cancelled);
        }
        if !self.ctx.registry().host().is_playback_allowed() {
            session.cancel();
            return Some(Stop::Forbidden);
        }
        None
    }

    fn teardown(&self, stop: Stop) {
        let session = self.session();
        let registry = self.ctx.registry();
        let id = session.id();
        session.finish();
        registry.remove(id);

        match stop {
            Stop::Finished => info!(target: "playback", "Session {} finished", id),
            Stop::Cancelled => info!(target: "playback", "Session {} stopped", id),
            Stop::Forbidden => warn!(
                target: "playback",
                "Session {} stopped: playback is no longer allowed", id
            ),
        }

        let config = registry.config();
        let releases = [
            (AutoFlag::Busy, config.playback.busy_grace(), &config.host.busy_off),
            (AutoFlag::Mare, config.playback.mare_grace(), &config.host.mare_on),
        ];
        for (flag, grace, command) in releases {
            let Some(ticket) = self.policy().release_ticket(flag, id) else {
                continue;
            };
            debug!(target: "playback", "Session {} releases {:?} in {:?}", id, flag, grace);
            let policy = self.policy().clone();
            let dispatcher = registry.dispatcher().clone();
            let command = command.clone();
            tokio::spawn(async move {
                sleep(grace).await;
                if policy.release(ticket) {
                    dispatcher.dispatch(command, DispatchMode::Queue);
                } else {
                    debug!(
                        target: "playback",
                        "{:?} re-armed during grace period; release skipped", flag
                    );
                }
            });
        }
    }
}

fn nanos(duration: Duration) -> i128 {
    i128::try_from(duration.as_nanos()).unwrap_or(i128::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::{DispatchDrain, channel};
    use crate::host::Host;
    use crate::script::Script;
    use anyhow::Result;

    struct NullHost;

    impl Host for NullHost {
        fn execute(&self, _command: &str, _mode: DispatchMode) -> Result<()> {
            Ok(())
        }
    }

    fn setup() -> (Registry, DispatchDrain) {
        let (dispatcher, drain) = channel();
        (Registry::new(Arc::new(NullHost), dispatcher, Config::default()), drain)
    }

    fn commands(drain: &mut DispatchDrain) -> Vec<String> {
        drain.take_pending().into_iter().map(|e| e.command).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_drift_is_absorbed_by_later_waits() {
        let (registry, mut drain) = setup();
        let text = "/a <wait.0.05>\n".repeat(20) + "/end";
        let script = Arc::new(Script::inline("drift", text));
        let start = Instant::now();
        registry.launch(script, None).await.unwrap();
        registry.wait_idle().await;
        let elapsed = start.elapsed().as_secs_f64();
        assert!((1.0..1.1).contains(&elapsed), "took {elapsed}s");
        assert_eq!(commands(&mut drain).len(), 21);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_wait_spends_whole_budget() {
        let (registry, mut drain) = setup();
        let script = Arc::new(Script::inline("long", "/a <wait.12>\n/c\n"));
        let start = Instant::now();
        registry.launch(script, None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(60), registry.wait_idle())
            .await
            .expect("session should finish");
        let elapsed = start.elapsed().as_secs_f64();
        assert!((12.0..12.05).contains(&elapsed), "took {elapsed}s");
        assert_eq!(commands(&mut drain), ["/a", "/c"]);
    }

    #[test]
    fn test_nanos_saturates() {
        assert_eq!(nanos(Duration::from_millis(33)), 33_000_000);
        assert!(nanos(Duration::MAX) > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_microcancel_and_hold_are_not_dispatched() {
        let (registry, mut drain) = setup();
        let script = Arc::new(Script::inline("quiet", "/microcancel\n<wait.1>\n/wave\n"));
        let start = Instant::now();
        registry.launch(script, None).await.unwrap();
        registry.wait_idle().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(commands(&mut drain), ["/wave"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autoping_shortens_next_wait_once() {
        let (registry, mut drain) = setup();
        let script = Arc::new(Script::inline(
            "ping",
            "/autoping\n/a <wait.1>\n/b <wait.1>\n/c\n",
        ));
        let start = Instant::now();
        registry.launch(script, None).await.unwrap();
        registry.wait_idle().await;
        let elapsed = start.elapsed().as_secs_f64();
        assert!((1.9..1.95).contains(&elapsed), "took {elapsed}s");
        assert_eq!(commands(&mut drain), ["/a", "/b", "/c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acancel_sends_cancels_first() {
        let (registry, mut drain) = setup();
        let script = Arc::new(Script::inline("ac", "/acancel\n"));
        registry.launch(script, None).await.unwrap();
        registry.wait_idle().await;
        let pending = drain.take_pending();
        let sent: Vec<_> = pending.iter().map(|e| (e.command.as_str(), e.mode)).collect();
        assert_eq!(
            sent,
            [
                ("/gpose", DispatchMode::NoQueue),
                ("/gpose", DispatchMode::NoQueue),
                ("/acancel", DispatchMode::Queue)
            ]
        );
    }
}
