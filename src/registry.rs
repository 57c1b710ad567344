//! The playback registry: owns every running session.
//!
//! Callers launch scripts, then pause, resume, seek, or cancel the resulting
//! sessions by id (or by script). Lookups against unknown ids are no-ops.

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::engine::Engine;
use crate::host::Host;
use crate::parser::compile;
use crate::policy::{PlaybackPolicy, lock};
use crate::script::{Script, ScriptId};
use crate::session::{Session, SessionId};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("playback is not allowed right now")]
    NotAllowed,

    #[error("failed to load script: {0:#}")]
    Source(#[from] anyhow::Error),
}

struct Inner {
    host: Arc<dyn Host>,
    dispatcher: Dispatcher,
    policy: Arc<PlaybackPolicy>,
    config: Config,
    sessions: Mutex<BTreeMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
    idle: Notify,
}

/// Cheaply cloneable handle to the shared registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new(host: Arc<dyn Host>, dispatcher: Dispatcher, config: Config) -> Self {
        let policy = Arc::new(PlaybackPolicy::new(&config.playback));
        Self {
            inner: Arc::new(Inner {
                host,
                dispatcher,
                policy,
                config,
                sessions: Mutex::new(BTreeMap::new()),
                next_id: AtomicU64::new(1),
                idle: Notify::new(),
            }),
        }
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.inner.host
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn policy(&self) -> &Arc<PlaybackPolicy> {
        &self.inner.policy
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Compile `script` (optionally restricted to one region) and start
    /// playing it on a new tokio task.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`LaunchError::NotAllowed`] if the host currently forbids playback; no
    /// session is created. [`LaunchError::Source`] if the script text cannot
    /// be read.
    pub async fn launch(
        &self,
        script: Arc<Script>,
        region: Option<&str>,
    ) -> Result<SessionId, LaunchError> {
        self.launch_inner(script, region, None).await
    }

    /// Launch the whole script, starting from the first command on `line`.
    /// If no command has that line number, playback starts at the top.
    pub async fn launch_at(
        &self,
        script: Arc<Script>,
        line: usize,
    ) -> Result<SessionId, LaunchError> {
        self.launch_inner(script, None, Some(line)).await
    }

    async fn launch_inner(
        &self,
        script: Arc<Script>,
        region: Option<&str>,
        line: Option<usize>,
    ) -> Result<SessionId, LaunchError> {
        if !self.inner.host.is_playback_allowed() {
            info!(
                target: "registry",
                "Not starting {}: playback is not allowed right now", script.id()
            );
            return Err(LaunchError::NotAllowed);
        }

        let lines = script.lines().await?;
        let compiled = compile(&lines[..], region);
        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let session = Arc::new(Session::new(
            id,
            script,
            region.map(str::to_string),
            compiled,
        ));
        if let Some(line) = line {
            if !session.request_seek(line) {
                debug!(
                    target: "registry",
                    "Session {}: no command on line {}, starting at the top", id, line
                );
            }
        }

        lock(&self.inner.sessions).insert(id, session.clone());
        info!(
            target: "registry",
            "Session {} playing {} ({} commands{})",
            id,
            session.script().id(),
            session.commands().len(),
            region.map(|r| format!(", region {r}")).unwrap_or_default()
        );

        tokio::spawn(Engine::new(session, self.clone()).run());
        Ok(id)
    }

    pub fn find(&self, id: SessionId) -> Option<Arc<Session>> {
        lock(&self.inner.sessions).get(&id).cloned()
    }

    pub fn find_by_script(&self, script: &ScriptId) -> Vec<Arc<Session>> {
        lock(&self.inner.sessions)
            .values()
            .filter(|s| s.script().id() == script)
            .cloned()
            .collect()
    }

    /// All active sessions, oldest first.
    pub fn list(&self) -> Vec<Arc<Session>> {
        lock(&self.inner.sessions).values().cloned().collect()
    }

    pub fn is_idle(&self) -> bool {
        lock(&self.inner.sessions).is_empty()
    }

    /// Wait until no sessions remain.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Cancel a session and drop it from the active list.
    pub fn cancel(&self, id: SessionId) -> bool {
        let Some(session) = self.remove(id) else {
            return false;
        };
        session.cancel();
        info!(target: "registry", "Session {} cancelled", id);
        true
    }

    /// Cancel every session. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<_> = lock(&self.inner.sessions).keys().copied().collect();
        ids.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn cancel_script(&self, script: &ScriptId) -> usize {
        self.find_by_script(script)
            .into_iter()
            .filter(|s| self.cancel(s.id()))
            .count()
    }

    pub fn pause(&self, id: SessionId) -> bool {
        self.find(id).is_some_and(|s| s.pause(Instant::now()))
    }

    pub fn resume(&self, id: SessionId) -> bool {
        self.find(id).is_some_and(|s| s.resume(Instant::now()))
    }

    /// Pause a playing session or resume a paused one.
    pub fn toggle_pause(&self, id: SessionId) -> bool {
        self.pause(id) || self.resume(id)
    }

    pub fn pause_script(&self, script: &ScriptId) -> usize {
        let now = Instant::now();
        self.find_by_script(script)
            .iter()
            .filter(|s| s.pause(now))
            .count()
    }

    pub fn resume_script(&self, script: &ScriptId) -> usize {
        let now = Instant::now();
        self.find_by_script(script)
            .iter()
            .filter(|s| s.resume(now))
            .count()
    }

    /// Move a session to the first command on `line` without replaying the
    /// commands in between.
    pub fn seek(&self, id: SessionId, line: usize) -> bool {
        self.find(id).is_some_and(|s| s.request_seek(line))
    }

    pub(crate) fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        let mut sessions = lock(&self.inner.sessions);
        let removed = sessions.remove(&id);
        if sessions.is_empty() {
            self.inner.idle.notify_waiters();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchMode, channel};
    use anyhow::Result;
    use std::sync::atomic::AtomicBool;

    struct GatedHost(AtomicBool);

    impl Host for GatedHost {
        fn execute(&self, _command: &str, _mode: DispatchMode) -> Result<()> {
            Ok(())
        }

        fn is_playback_allowed(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn registry(allowed: bool) -> Registry {
        let (dispatcher, _drain) = channel();
        Registry::new(
            Arc::new(GatedHost(AtomicBool::new(allowed))),
            dispatcher,
            Config::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_rejected_when_not_allowed() {
        let registry = registry(false);
        let script = Arc::new(Script::inline("a", "/wave\n"));
        let result = registry.launch(script, None).await;
        assert!(matches!(result, Err(LaunchError::NotAllowed)));
        assert!(registry.list().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_ids_are_noops() {
        let registry = registry(true);
        let ghost = SessionId(99);
        assert!(!registry.cancel(ghost));
        assert!(!registry.pause(ghost));
        assert!(!registry.resume(ghost));
        assert!(!registry.seek(ghost, 1));
        assert!(registry.find(ghost).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_by_script() {
        let registry = registry(true);
        let script = Arc::new(Script::inline("long", "/a <wait.30>\n"));
        let first = registry.launch(script.clone(), None).await.unwrap();
        let second = registry.launch(script.clone(), None).await.unwrap();
        assert_ne!(first, second);
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        assert_eq!(registry.find_by_script(script.id()).len(), 2);
        assert_eq!(registry.pause_script(script.id()), 2);
        assert_eq!(registry.resume_script(script.id()), 2);
        assert_eq!(registry.cancel_script(script.id()), 2);
        assert!(registry.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_script_is_source_error() {
        let registry = registry(true);
        let script = Arc::new(Script::from_file("/nonexistent/script.txt"));
        let err = registry.launch(script, None).await.unwrap_err();
        assert!(matches!(err, LaunchError::Source(_)));
        assert!(registry.is_idle());
    }
}
