use anyhow::{Context, Result};
use clap::Parser;
use microplay::{
    AutoFlag, Config, ConsoleHost, Registry, Script, TickRate, channel, spawn_tick_thread,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "microplay",
    about = "Play a Micro script against a console host that prints each command",
    version
)]
struct Args {
    /// Path to the script file
    #[arg(short, long)]
    script: PathBuf,

    /// Play only this region (named `:regions` included)
    #[arg(short, long, conflicts_with = "line")]
    region: Option<String>,

    /// Start from the first command on this line
    #[arg(short, long)]
    line: Option<usize>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Treat `/loop` as a no-op
    #[arg(long)]
    ignore_loop: bool,

    /// Never send auto-countdowns
    #[arg(long)]
    ignore_countdown: bool,

    /// Use the fast scheduler tick
    #[arg(long)]
    fast_tick: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let host = Arc::new(ConsoleHost::new());
    let (dispatcher, drain) = channel();
    let drain_tick = config.playback.drain_tick();
    spawn_tick_thread(drain, host.clone(), drain_tick);

    let registry = Registry::new(host, dispatcher, config);
    let policy = registry.policy().clone();
    if args.ignore_loop {
        policy.set_ignore_looping(true);
    }
    if args.ignore_countdown {
        policy.set_ignore_autocountdown(true);
    }
    if args.fast_tick {
        policy.set_tick_rate(TickRate::Fast);
    }

    let script = Arc::new(Script::from_file(&args.script));
    let id = match args.line {
        Some(line) => registry.launch_at(script, line).await,
        None => registry.launch(script, args.region.as_deref()).await,
    }
    .with_context(|| format!("Failed to start script: {}", args.script.display()))?;

    tokio::select! {
        _ = registry.wait_idle() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!(target: "playback", "Interrupted; cancelling session {}", id);
            registry.cancel_all();
        }
    }

    // Give the busy release a chance to go out before exiting.
    if policy.is_armed(AutoFlag::Busy) {
        tokio::time::sleep(registry.config().playback.busy_grace()).await;
    }
    if policy.is_armed(AutoFlag::Mare) {
        warn!(target: "playback", "Exiting with mare sync still off; pending release dropped");
    }
    tokio::time::sleep(drain_tick * 2).await;

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
