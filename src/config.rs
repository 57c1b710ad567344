//! Configuration loaded from a TOML file.
//!
//! Every field has a default, so an empty file (or no file at all) gives the
//! stock behaviour:
//!
//! ```toml
//! [playback]
//! tick_ms = 33
//! ignore_looping = false
//!
//! [host]
//! busy_on = "/busy on"
//! countdown = "/countdown"
//! ```

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub playback: PlaybackConfig,
    pub host: HostCommands,
}

impl Config {
    /// Read and parse a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        info!(target: "config", "Loaded config from {}", path.display());
        Ok(config)
    }
}

/// Scheduler timing and override settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Normal scheduler tick.
    pub tick_ms: u64,
    /// Tick used by the fast preset.
    pub fast_tick_ms: u64,
    /// How much `/autoping` shortens the next wait.
    pub autoping_ms: u64,
    /// Delay before `busy_off` is sent after an auto-busy session ends.
    pub busy_grace_ms: u64,
    /// Delay before `mare_on` is sent after an auto-mare session ends.
    pub mare_grace_ms: u64,
    pub ignore_looping: bool,
    pub ignore_autocountdown: bool,
    /// Interval of the host drain thread used by the CLI.
    pub drain_tick_ms: u64,
}

impl PlaybackConfig {
    pub fn autoping(&self) -> Duration {
        Duration::from_millis(self.autoping_ms)
    }

    pub fn busy_grace(&self) -> Duration {
        Duration::from_millis(self.busy_grace_ms)
    }

    pub fn mare_grace(&self) -> Duration {
        Duration::from_millis(self.mare_grace_ms)
    }

    pub fn drain_tick(&self) -> Duration {
        Duration::from_millis(self.drain_tick_ms.max(1))
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_ms: 33,
            fast_tick_ms: 16,
            autoping_ms: 100,
            busy_grace_ms: 2_500,
            mare_grace_ms: 600_000,
            ignore_looping: false,
            ignore_autocountdown: false,
            drain_tick_ms: 16,
        }
    }
}

/// Host command strings sent by the control directives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostCommands {
    pub busy_on: String,
    pub busy_off: String,
    pub mare_off: String,
    pub mare_on: String,
    /// Countdown command; the lead time in whole seconds is appended.
    pub countdown: String,
    /// Sent before an `/acancel` line.
    pub animation_cancel: Vec<String>,
    /// Template for the `/autobussy` decorations; `{n}` becomes 1 through 12.
    pub bussy_decoration: String,
}

impl HostCommands {
    pub fn bussy_decorations(&self) -> impl Iterator<Item = String> + '_ {
        (1..=12).map(|n| self.bussy_decoration.replace("{n}", &n.to_string()))
    }
}

impl Default for HostCommands {
    fn default() -> Self {
        Self {
            busy_on: "/busy on".to_string(),
            busy_off: "/busy off".to_string(),
            mare_off: "/mare off".to_string(),
            mare_on: "/mare on".to_string(),
            countdown: "/countdown".to_string(),
            animation_cancel: vec!["/gpose".to_string(), "/gpose".to_string()],
            bussy_decoration: "/echo <se.{n}>".to_string(),
        }
    }
}
