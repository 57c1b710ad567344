//! # Microplay
//!
//! A compiler and playback scheduler for "Micro" scripts: line-oriented
//! choreography that drives timed sequences of text commands against a
//! single-threaded host such as a game client.
//!
//! Scripts are compiled into a flat timeline of [`Command`]s grouped into
//! [`Region`]s. A [`Registry`] launches each compiled script as a [`Session`]
//! on its own tokio task, and every host-visible side effect travels through
//! the [`Dispatcher`] to a [`DispatchDrain`] that the host empties once per
//! tick on its own thread.
//!
//! ## Quick start
//!
//! ```no_run
//! use microplay::{Config, ConsoleHost, Registry, Script, channel, spawn_tick_thread};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let host = Arc::new(ConsoleHost::new());
//!     let (dispatcher, drain) = channel();
//!     spawn_tick_thread(drain, host.clone(), config.playback.drain_tick());
//!
//!     let registry = Registry::new(host, dispatcher, config);
//!     let script = Arc::new(Script::inline("wave", "/wave <wait.1.5>\n/bow\n"));
//!     registry.launch(script, None).await?;
//!     registry.wait_idle().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Script syntax
//!
//! | Line | Meaning |
//! |------|---------|
//! | `/ac fire <wait.2.5>` | Dispatch `/ac fire`, then hold 2.5 seconds |
//! | `/ac fire /wait 2.5` | Same, older wait notation |
//! | `/defaultwait 1` | Lines without a wait token hold 1 second; bare `/defaultwait` clears it |
//! | `#region Intro` ... `#endregion` | Group commands into a region |
//! | `#region :Encore` | Named region, compiled only when selected explicitly |
//! | `# comment` | Ignored |
//! | `/loop` | Start over from the first command |
//! | `/autobusy`, `/autobussy`, `/automare` | Arm a host status flag until the session ends |
//! | `/autocountdown [start\|off]`, `/autocd` | Countdown before each long region ends |
//! | `/autoping` | Shorten the next wait by a fixed ping allowance |
//! | `/acancel` | Send the animation cancel, then the line itself |
//! | `/pad [N] <cmd>` | Send `<cmd>` N times in the background |
//! | `/microcancel` | Consumed, never sent |
//!
//! Any other line is sent to the host verbatim, minus its wait token.

pub mod command;
pub mod config;
pub mod directives;
pub mod dispatch;
pub mod engine;
pub mod host;
pub mod parser;
pub mod policy;
pub mod registry;
pub mod script;
pub mod session;
pub mod timeline;

pub use command::{Command, CompiledScript, Context, MIN_WAIT, Region};
pub use config::{Config, HostCommands, PlaybackConfig};
pub use directives::{CountdownMode, Directive};
pub use dispatch::{
    DispatchDrain, DispatchEnvelope, DispatchGate, DispatchMode, Dispatcher, channel,
};
pub use engine::Engine;
pub use host::{ConsoleHost, Host, spawn_tick_thread};
pub use parser::{compile, compile_file, compile_str};
pub use policy::{AutoFlag, PlaybackPolicy, TickRate};
pub use registry::{LaunchError, Registry};
pub use script::{Script, ScriptId, ScriptSource};
pub use session::{PlaybackProgress, PlaybackStatus, Session, SessionId};
pub use timeline::{Timeline, TimelineSnapshot};
