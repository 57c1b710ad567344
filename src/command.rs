//! Compiled command and region types, and the [`Context`] directives receive
//! when the scheduler executes them.

use crate::config::HostCommands;
use crate::directives::Directive;
use crate::dispatch::DispatchMode;
use crate::policy::PlaybackPolicy;
use crate::registry::Registry;
use crate::session::{Session, SessionId};
use std::sync::Arc;
use std::time::Duration;

/// Wait used when a line carries no wait token and no default is active.
pub const MIN_WAIT: Duration = Duration::from_millis(10);

/// One executable line of a compiled script.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Line text with wait tokens and trailing comments removed.
    pub text: String,
    /// 1-based source line number.
    pub line: usize,
    /// Index of the owning region in [`CompiledScript::regions`].
    pub region: usize,
    pub wait: Duration,
    /// Directive kind, classified once at compile time.
    pub directive: Directive,
}

impl Command {
    /// Re-serialize the command in inline-wait notation.
    ///
    /// Compiling the result yields a command with the same text and wait.
    ///
    /// ```
    /// use microplay::compile_str;
    ///
    /// let script = compile_str("/ac fire <wait.2.5>", None);
    /// assert_eq!(script.commands[0].to_source_line(), "/ac fire <wait.2.5>");
    /// ```
    pub fn to_source_line(&self) -> String {
        let wait = format_seconds(self.wait);
        if self.text.is_empty() {
            format!("<wait.{wait}>")
        } else {
            format!("{} <wait.{wait}>", self.text)
        }
    }
}

fn format_seconds(duration: Duration) -> String {
    let formatted = format!("{:.3}", duration.as_secs_f64());
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// A contiguous run of commands sharing a `#region` block.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// Region name without the `:` marker; empty for default regions.
    pub name: String,
    /// Declared as `#region :name`; only played when selected explicitly.
    pub is_named: bool,
    /// Synthetic bucket for commands outside any `#region` block.
    pub is_default: bool,
    pub start_line: usize,
    pub end_line: usize,
    /// Sum of member command waits.
    pub wait: Duration,
}

impl Region {
    pub(crate) fn open(name: impl Into<String>, is_named: bool, line: usize) -> Self {
        let name = name.into();
        Self {
            is_default: name.is_empty(),
            name,
            is_named,
            start_line: line,
            end_line: line,
            wait: Duration::ZERO,
        }
    }

    pub(crate) fn absorb(&mut self, command: &Command) {
        self.start_line = self.start_line.min(command.line);
        self.end_line = self.end_line.max(command.line);
        self.wait = self.wait.saturating_add(command.wait);
    }

    /// Whether the auto-countdown may target this region.
    pub fn is_countdown_eligible(&self) -> bool {
        !self.is_named && !self.is_default
    }
}

/// Output of the compiler: the flat command timeline plus its regions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledScript {
    pub commands: Vec<Command>,
    pub regions: Vec<Region>,
}

impl CompiledScript {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Sum of all command waits, saturating at [`Duration::MAX`].
    pub fn total_wait(&self) -> Duration {
        self.commands
            .iter()
            .map(|c| c.wait)
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Index of the first command compiled from `line`.
    pub fn position_of_line(&self, line: usize) -> Option<usize> {
        self.commands.iter().position(|c| c.line == line)
    }

    pub fn region_of(&self, command: &Command) -> &Region {
        &self.regions[command.region]
    }
}

/// Execution context passed to directive handlers.
///
/// Gives access to the owning session, the shared policy, and the dispatch
/// channel. Every dispatch is tagged with the session as its origin.
pub struct Context {
    pub(crate) session: Arc<Session>,
    pub(crate) registry: Registry,
}

impl Context {
    pub(crate) fn new(session: Arc<Session>, registry: Registry) -> Self {
        Self { session, registry }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    pub fn policy(&self) -> &Arc<PlaybackPolicy> {
        self.registry.policy()
    }

    pub fn host_commands(&self) -> &HostCommands {
        &self.registry.config().host
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Queue a host command from this session. Returns false, queueing
    /// nothing, once the session is cancelled.
    pub fn dispatch(&self, command: impl Into<String>, mode: DispatchMode) -> bool {
        let dispatcher = self.registry.dispatcher();
        self.session
            .if_live(|_, _| {
                dispatcher.dispatch_from(self.session.id(), command, mode);
                Some(())
            })
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::channel;
    use crate::host::Host;
    use crate::parser::compile_str;
    use crate::script::Script;

    struct NullHost;

    impl Host for NullHost {
        fn execute(&self, _command: &str, _mode: DispatchMode) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(Duration::from_millis(2500)), "2.5");
        assert_eq!(format_seconds(Duration::from_secs(3)), "3");
        assert_eq!(format_seconds(Duration::from_millis(10)), "0.01");
        assert_eq!(format_seconds(Duration::ZERO), "0");
    }

    #[test]
    fn test_region_absorb_tracks_bounds() {
        let mut region = Region::open("Intro", false, 5);
        for line in [5, 7] {
            region.absorb(&Command {
                text: "/smile".to_string(),
                line,
                region: 0,
                wait: Duration::from_secs(2),
                directive: Directive::Dispatch,
            });
        }
        assert_eq!(region.start_line, 5);
        assert_eq!(region.end_line, 7);
        assert_eq!(region.wait, Duration::from_secs(4));
        assert!(region.is_countdown_eligible());
    }

    #[test]
    fn test_context_dispatch_stops_at_cancel() {
        let (dispatcher, mut drain) = channel();
        let registry = Registry::new(Arc::new(NullHost), dispatcher, Config::default());
        let script = Arc::new(Script::inline("ctx", "/a\n"));
        let session = Arc::new(Session::new(SessionId(3), script, None, compile_str("/a\n", None)));
        let ctx = Context::new(session.clone(), registry);

        assert!(ctx.dispatch("/before", DispatchMode::Queue));
        assert!(session.cancel());
        assert!(!ctx.dispatch("/after", DispatchMode::Queue));

        let sent: Vec<_> = drain.take_pending().into_iter().map(|e| e.command).collect();
        assert_eq!(sent, ["/before"]);
    }
}
