//! Provider reading routing configuration from local files.
//!
//! Either one `filename` or every supported file in `directory` (merged
//! in name order, first definition wins). Watching uses filesystem
//! notifications by default and falls back to polling every
//! `refresh_seconds` when notifications are unavailable.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::harness::{self, Change, Source};
use super::{BaseProvider, Provider, WatchStrategy};
use crate::config::{extension_of, parse_config_str, supported_extensions};
use crate::error::ProviderError;
use crate::safe::Pool;
use crate::types::{ConfigMessage, Configuration, Constraint};

const PROVIDER_NAME: &str = "file";

/// Quiet period after a notification before re-reading, so multi-step
/// writes are read once complete.
const SETTLE: Duration = Duration::from_millis(50);

const fn default_refresh_seconds() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileProvider {
    #[serde(flatten)]
    pub base: BaseProvider,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<PathBuf>,

    /// Takes precedence over `filename` when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    #[serde(default = "default_refresh_seconds")]
    pub refresh_seconds: u64,
}

impl Default for FileProvider {
    fn default() -> Self {
        Self {
            base: BaseProvider::default(),
            filename: None,
            directory: None,
            refresh_seconds: default_refresh_seconds(),
        }
    }
}

pub struct FileSession {
    events: Option<mpsc::Receiver<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl FileProvider {
    fn target(&self) -> Option<&Path> {
        self.directory.as_deref().or(self.filename.as_deref())
    }

    fn start_watcher(&self) -> Result<(mpsc::Receiver<()>, RecommendedWatcher), notify::Error> {
        let (tx, rx) = mpsc::channel(1);
        let only = if self.directory.is_some() {
            None
        } else {
            self.filename
                .as_deref()
                .and_then(Path::file_name)
                .map(ToOwned::to_owned)
        };

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let relevant = concerns(only.as_deref(), &event);
                if relevant && (event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove()) {
                    // Full channel means a wake-up is already pending.
                    let _ = tx.try_send(());
                }
            }
            Err(e) => tracing::warn!(provider = PROVIDER_NAME, error = %e, "watch error"),
        })?;

        // Watch the containing directory: editors often replace the file.
        let watched = match (&self.directory, &self.filename) {
            (Some(dir), _) => dir.clone(),
            (None, Some(file)) => file
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
            (None, None) => PathBuf::from("."),
        };
        watcher.watch(&watched, RecursiveMode::NonRecursive)?;
        tracing::debug!(provider = PROVIDER_NAME, path = %watched.display(), "watching for changes");
        Ok((rx, watcher))
    }
}

/// Whether `event` touches the watched file (any file when `only` is unset).
fn concerns(only: Option<&OsStr>, event: &Event) -> bool {
    only.map_or(true, |name| {
        event.paths.iter().any(|p| p.file_name() == Some(name))
    })
}

async fn load_file(path: &Path) -> Result<Configuration, ProviderError> {
    let content = tokio::fs::read_to_string(path).await?;
    let display = path.display().to_string();
    parse_config_str(extension_of(path), &content, &display).map_err(|e| ProviderError::Decode {
        provider: PROVIDER_NAME,
        what: display,
        source: Box::new(e),
    })
}

async fn load_directory(dir: &Path) -> Result<Configuration, ProviderError> {
    let extensions = supported_extensions();
    let mut paths = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if !hidden && extensions.contains(&extension_of(&path)) && entry.file_type().await?.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut merged = Configuration::default();
    for path in paths {
        match load_file(&path).await {
            Ok(configuration) => merged.merge(configuration),
            Err(e) => {
                tracing::warn!(provider = PROVIDER_NAME, path = %path.display(), error = %e, "skipping file");
            }
        }
    }
    Ok(merged)
}

#[async_trait]
impl Source for FileProvider {
    type Session = FileSession;

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn connect(&self) -> Result<FileSession, ProviderError> {
        let wants_events = self.base.watch
            && self.base.watch_strategy.unwrap_or(WatchStrategy::LongPoll) == WatchStrategy::LongPoll;
        if !wants_events {
            return Ok(FileSession {
                events: None,
                _watcher: None,
            });
        }

        match self.start_watcher() {
            Ok((rx, watcher)) => Ok(FileSession {
                events: Some(rx),
                _watcher: Some(watcher),
            }),
            Err(e) => {
                tracing::warn!(provider = PROVIDER_NAME, error = %e, "cannot watch for changes");
                Ok(FileSession {
                    events: None,
                    _watcher: None,
                })
            }
        }
    }

    async fn fetch(&self, _session: &mut FileSession) -> Result<Option<Configuration>, ProviderError> {
        let configuration = match (&self.directory, &self.filename) {
            (Some(dir), _) => load_directory(dir).await?,
            (None, Some(file)) => load_file(file).await?,
            (None, None) => {
                return Err(ProviderError::MissingField {
                    provider: PROVIDER_NAME,
                    field: "filename",
                })
            }
        };
        Ok(Some(configuration))
    }

    async fn wait_for_change(&self, session: &mut FileSession) -> Result<Change, ProviderError> {
        let Some(events) = session.events.as_mut() else {
            return Ok(Change::Unsupported);
        };
        if events.recv().await.is_none() {
            return Err(ProviderError::Io(std::io::Error::other("file watcher stopped")));
        }
        tokio::time::sleep(SETTLE).await;
        while events.try_recv().is_ok() {}
        Ok(Change::Changed)
    }

    fn debug_log_configuration(&self) -> bool {
        self.base.debug_log_generated_configuration
    }
}

#[async_trait]
impl Provider for FileProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn init(&mut self, constraints: &[Constraint]) -> Result<(), ProviderError> {
        if self.target().is_none() {
            return Err(ProviderError::MissingField {
                provider: PROVIDER_NAME,
                field: "filename",
            });
        }
        self.base.init_constraints(constraints)
    }

    async fn provide(
        self: Arc<Self>,
        sink: mpsc::Sender<ConfigMessage>,
        pool: Pool,
    ) -> Result<(), ProviderError> {
        let options = self.base.watch_options(
            WatchStrategy::LongPoll,
            Duration::from_secs(self.refresh_seconds),
        );
        pool.go("provider-file", move |token| async move {
            harness::run(&*self, &options, &self.base.retry, &sink, &token).await;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEB: &str = r#"{
        "backends": {"backend-web": {"servers": {"server-0": {"url": "http://10.0.0.1:80"}}}},
        "frontends": {"frontend-web": {"backend": "backend-web", "routes": {"r": {"rule": "Host:web.example.com"}}}}
    }"#;

    const API: &str = r#"{
        "backends": {"backend-api": {"servers": {"server-0": {"url": "http://10.0.0.2:8080"}}}}
    }"#;

    #[test]
    fn init_requires_a_target() {
        let mut provider = FileProvider::default();
        assert!(matches!(
            provider.init(&[]),
            Err(ProviderError::MissingField { field: "filename", .. })
        ));
    }

    #[tokio::test]
    async fn reads_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynamic.json");
        std::fs::write(&path, WEB).unwrap();

        let provider = FileProvider {
            filename: Some(path),
            ..FileProvider::default()
        };
        let mut session = provider.connect().await.unwrap();
        let config = provider.fetch(&mut session).await.unwrap().unwrap();
        assert_eq!(config.backends["backend-web"].servers["server-0"].url, "http://10.0.0.1:80");
        assert_eq!(config.frontends["frontend-web"].backend, "backend-web");
    }

    #[tokio::test]
    async fn malformed_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dynamic.json");
        std::fs::write(&path, "{ not json").unwrap();

        let provider = FileProvider {
            filename: Some(path),
            ..FileProvider::default()
        };
        let mut session = provider.connect().await.unwrap();
        assert!(matches!(
            provider.fetch(&mut session).await,
            Err(ProviderError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn directory_merges_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a-web.json"), WEB).unwrap();
        std::fs::write(dir.path().join("b-api.json"), API).unwrap();
        std::fs::write(dir.path().join("c-broken.json"), "[").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let provider = FileProvider {
            directory: Some(dir.path().to_path_buf()),
            ..FileProvider::default()
        };
        let mut session = provider.connect().await.unwrap();
        let config = provider.fetch(&mut session).await.unwrap().unwrap();
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.frontends.len(), 1);
    }

    #[tokio::test]
    async fn unwatched_session_reports_unsupported() {
        let provider = FileProvider {
            filename: Some(PathBuf::from("dynamic.json")),
            ..FileProvider::default()
        };
        let mut session = provider.connect().await.unwrap();
        assert_eq!(
            provider.wait_for_change(&mut session).await.unwrap(),
            Change::Unsupported
        );
    }
}
