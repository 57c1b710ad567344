//! Script sources and identity.
//!
//! A [`Script`] is a named, read-only view of some text. Its lines are read
//! from the [`ScriptSource`] on first use and cached; [`Script::invalidate`]
//! drops the cache after the underlying file changes so the next launch
//! compiles fresh text.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Stable identity of a script, derived from its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId(String);

impl ScriptId {
    /// Identity for a file: the path with `\` separators normalised to `/`.
    pub fn from_path(path: &Path) -> Self {
        Self(path.to_string_lossy().replace('\\', "/"))
    }

    /// Identity for a script that has no backing file.
    pub fn inline(name: &str) -> Self {
        Self(format!("inline:{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a script's text comes from.
#[async_trait]
pub trait ScriptSource: Send + Sync + 'static {
    /// Read the full script text.
    async fn read(&self) -> Result<String>;
}

/// Reads a script from a file on disk.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ScriptSource for FileSource {
    async fn read(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read script file: {}", self.path.display()))
    }
}

/// A script held in memory.
pub struct InlineSource {
    text: String,
}

impl InlineSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl ScriptSource for InlineSource {
    async fn read(&self) -> Result<String> {
        Ok(self.text.clone())
    }
}

pub struct Script {
    id: ScriptId,
    name: String,
    source: Box<dyn ScriptSource>,
    cache: Mutex<Option<Arc<[String]>>>,
}

impl Script {
    pub fn new(id: ScriptId, name: impl Into<String>, source: impl ScriptSource) -> Self {
        Self {
            id,
            name: name.into(),
            source: Box::new(source),
            cache: Mutex::new(None),
        }
    }

    /// A script backed by a file. The name is the file stem.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::new(ScriptId::from_path(path), name, FileSource::new(path))
    }

    /// A script backed by an in-memory string.
    pub fn inline(name: impl Into<String>, text: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ScriptId::inline(&name), name, InlineSource::new(text))
    }

    pub fn id(&self) -> &ScriptId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The script's lines, read from the source on first call.
    pub async fn lines(&self) -> Result<Arc<[String]>> {
        let mut cache = self.cache.lock().await;
        if let Some(lines) = cache.as_ref() {
            return Ok(lines.clone());
        }
        let text = self.source.read().await?;
        let lines: Arc<[String]> = text.lines().map(str::to_string).collect();
        debug!(target: "compiler", "Read {} lines from {}", lines.len(), self.id);
        *cache = Some(lines.clone());
        Ok(lines)
    }

    /// Forget the cached lines.
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Script")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_from_path_normalises_separators() {
        let id = ScriptId::from_path(Path::new(r"dances\intro.txt"));
        assert_eq!(id.as_str(), "dances/intro.txt");
    }

    #[tokio::test]
    async fn test_inline_lines() {
        let script = Script::inline("wave", "/wave\n/bow\n");
        assert_eq!(script.id().as_str(), "inline:wave");
        assert_eq!(&*script.lines().await.unwrap(), ["/wave", "/bow"]);
    }

    #[tokio::test]
    async fn test_file_lines_cached_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intro.txt");
        std::fs::write(&path, "/a\n").unwrap();

        let script = Script::from_file(&path);
        assert_eq!(script.name(), "intro");
        assert_eq!(script.lines().await.unwrap().len(), 1);

        std::fs::write(&path, "/a\n/b\n").unwrap();
        assert_eq!(script.lines().await.unwrap().len(), 1);

        script.invalidate().await;
        assert_eq!(script.lines().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file_errors() {
        let script = Script::from_file("/nonexistent/dance.txt");
        let err = script.lines().await.unwrap_err();
        assert!(err.to_string().contains("Failed to read script file"));
    }
}
