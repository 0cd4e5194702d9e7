//! Configuration store: load, diff, watch
//!
//! Accepts an in-memory document or a filesystem path. Loads are
//! validated and diffed against the previously accepted snapshot; file
//! sources can additionally be watched, with rapid changes coalesced
//! behind a short stability window before reloading.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::{HubError, HubResult};

use super::{ConfigDiff, HubConfig};

/// How long a file must stay quiet before a reload runs.
const STABILITY_WINDOW: Duration = Duration::from_millis(200);

/// Poll interval for the debounce loop.
const DEBOUNCE_TICK: Duration = Duration::from_millis(50);

/// Where the configuration comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A parsed document handed in by the embedder.
    Inline(serde_json::Value),
    /// A JSON file on disk.
    File(PathBuf),
}

/// Emitted on every accepted reload of a watched source.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub config: HubConfig,
    pub diff: ConfigDiff,
}

/// Keeps the watcher thread alive; dropping it stops watching.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
}

/// Load-validate-diff pipeline over a config source.
pub struct ConfigStore {
    source: ConfigSource,
    /// Last accepted snapshot, the baseline for diffs.
    current: Mutex<HubConfig>,
}

impl ConfigStore {
    pub fn new(source: ConfigSource) -> Self {
        Self {
            source,
            current: Mutex::new(HubConfig::default()),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self::new(ConfigSource::File(path.into()))
    }

    pub fn from_value(value: serde_json::Value) -> Self {
        Self::new(ConfigSource::Inline(value))
    }

    /// Path of the backing file, when the source is one.
    pub fn file_path(&self) -> Option<&Path> {
        match &self.source {
            ConfigSource::File(path) => Some(path),
            ConfigSource::Inline(_) => None,
        }
    }

    /// Snapshot of the last accepted configuration.
    pub async fn current(&self) -> HubConfig {
        self.current.lock().await.clone()
    }

    /// Read, parse, validate, and diff against the previous snapshot.
    ///
    /// A failed load leaves the accepted snapshot untouched.
    pub async fn load(&self) -> HubResult<(HubConfig, ConfigDiff)> {
        let config = match &self.source {
            ConfigSource::Inline(value) => HubConfig::from_value(value.clone())?,
            ConfigSource::File(path) => {
                let text =
                    tokio::fs::read_to_string(path)
                        .await
                        .map_err(|e| HubError::ConfigInvalid {
                            reason: format!("cannot read '{}': {}", path.display(), e),
                        })?;
                HubConfig::from_str(&text)?
            }
        };

        let mut current = self.current.lock().await;
        let diff = ConfigDiff::between(&current, &config);
        *current = config.clone();

        debug!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            modified = diff.modified.len(),
            "Configuration loaded"
        );

        Ok((config, diff))
    }

    /// Watch the backing file and emit a `ConfigChange` per accepted
    /// reload. Watcher errors are reported but never stop the watch.
    ///
    /// Returns the event receiver and a handle that keeps the OS
    /// watcher alive.
    pub fn watch(
        self: &Arc<Self>,
        tx: mpsc::Sender<ConfigChange>,
    ) -> HubResult<WatchHandle> {
        let path = match &self.source {
            ConfigSource::File(path) => path.clone(),
            ConfigSource::Inline(_) => {
                return Err(HubError::ConfigInvalid {
                    reason: "cannot watch an inline configuration".into(),
                })
            }
        };

        let (fs_tx, fs_rx) = mpsc::channel::<()>(64);

        let watched = path.clone();
        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    if event.paths.iter().any(|p| p.ends_with(
                        watched.file_name().unwrap_or_default(),
                    )) {
                        debug!(path = %watched.display(), "Config file change detected");
                        let _ = fs_tx.blocking_send(());
                    }
                }
                Err(e) => {
                    error!(path = %watched.display(), error = %e, "Config watcher error");
                }
            }
        })
        .map_err(|e| HubError::ConfigInvalid {
            reason: format!("failed to create config watcher: {}", e),
        })?;

        // Watch the parent directory so editors that replace the file
        // (rename-over) keep being observed.
        let mut watcher = watcher;
        let watch_root = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        watcher
            .watch(&watch_root, RecursiveMode::NonRecursive)
            .map_err(|e| HubError::ConfigInvalid {
                reason: format!("failed to watch '{}': {}", watch_root.display(), e),
            })?;

        info!(path = %path.display(), "Watching configuration file");

        let store = Arc::clone(self);
        tokio::spawn(async move {
            store.debounced_reload_loop(fs_rx, tx).await;
        });

        Ok(WatchHandle { _watcher: watcher })
    }

    /// Coalesce bursts of file events, then reload once quiet.
    async fn debounced_reload_loop(
        self: Arc<Self>,
        mut fs_rx: mpsc::Receiver<()>,
        tx: mpsc::Sender<ConfigChange>,
    ) {
        let mut pending: Option<Instant> = None;

        loop {
            tokio::select! {
                event = fs_rx.recv() => {
                    match event {
                        Some(()) => pending = Some(Instant::now()),
                        None => {
                            debug!("Config watcher channel closed");
                            return;
                        }
                    }
                }
                _ = tokio::time::sleep(DEBOUNCE_TICK) => {
                    let ready = pending
                        .map(|t| t.elapsed() >= STABILITY_WINDOW)
                        .unwrap_or(false);
                    if !ready {
                        continue;
                    }
                    pending = None;

                    match self.load().await {
                        Ok((config, diff)) => {
                            if tx.send(ConfigChange { config, diff }).await.is_err() {
                                debug!("Config change receiver dropped, stopping reload loop");
                                return;
                            }
                        }
                        Err(e) => {
                            // Keep the previous snapshot and keep watching.
                            warn!(error = %e, "Configuration reload failed");
                        }
                    }
                }
            }
        }
    }
}
