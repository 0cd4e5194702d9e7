//! Dev-mode file watching
//!
//! For stdio servers with `dev.enabled`, watches the configured glob
//! patterns under `dev.cwd` and requests a supervisor restart after a
//! short debounce. Glob semantics are standard shell globbing with
//! `**` for arbitrary depth.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use glob::Pattern;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use mcphub_core::DevConfig;

/// Quiet period between the last matching change and the restart.
const RESTART_DEBOUNCE: Duration = Duration::from_millis(300);
const DEBOUNCE_TICK: Duration = Duration::from_millis(100);

/// Watches dev globs and emits restart requests; dropping it stops
/// both the OS watcher and the debounce task.
pub struct DevWatcher {
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for DevWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl DevWatcher {
    /// Start watching. Each matching change burst sends one `()` on
    /// `restart_tx`.
    pub fn spawn(
        server: &str,
        dev: &DevConfig,
        restart_tx: mpsc::Sender<()>,
    ) -> Result<Self> {
        let patterns: Vec<Pattern> = dev
            .watch
            .iter()
            .map(|p| Pattern::new(p).with_context(|| format!("invalid watch pattern '{}'", p)))
            .collect::<Result<_>>()?;

        let cwd = dev.cwd.clone();
        let (fs_tx, fs_rx) = mpsc::channel::<PathBuf>(256);

        let filter_cwd = cwd.clone();
        let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        return;
                    }
                    for path in event.paths {
                        if path_matches(&filter_cwd, &path, &patterns) {
                            let _ = fs_tx.blocking_send(path);
                        }
                    }
                }
                Err(e) => error!(error = %e, "Dev watcher error"),
            }
        })?;

        let mut watcher = watcher;
        watcher
            .watch(&cwd, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch '{}'", cwd.display()))?;

        info!(
            server = %server,
            cwd = %cwd.display(),
            patterns = ?dev.watch,
            "Dev-mode watcher started"
        );

        let server = server.to_string();
        let task = tokio::spawn(debounce_loop(server, fs_rx, restart_tx));

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

/// Match an absolute changed path against the patterns, relative to
/// the dev cwd.
fn path_matches(cwd: &Path, path: &Path, patterns: &[Pattern]) -> bool {
    let relative = match path.strip_prefix(cwd) {
        Ok(relative) => relative,
        Err(_) => return false,
    };
    patterns.iter().any(|p| p.matches_path(relative))
}

async fn debounce_loop(
    server: String,
    mut fs_rx: mpsc::Receiver<PathBuf>,
    restart_tx: mpsc::Sender<()>,
) {
    let mut last_change: Option<Instant> = None;

    loop {
        tokio::select! {
            event = fs_rx.recv() => {
                match event {
                    Some(path) => {
                        debug!(server = %server, path = %path.display(), "Dev file changed");
                        last_change = Some(Instant::now());
                    }
                    None => return,
                }
            }
            _ = tokio::time::sleep(DEBOUNCE_TICK) => {
                let ready = last_change
                    .map(|t| t.elapsed() >= RESTART_DEBOUNCE)
                    .unwrap_or(false);
                if !ready {
                    continue;
                }
                last_change = None;
                info!(server = %server, "Dev files changed, requesting restart");
                if restart_tx.send(()).await.is_err() {
                    warn!(server = %server, "Restart channel closed, stopping dev watcher");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matching_is_relative_to_cwd() {
        let patterns = vec![Pattern::new("src/**/*.js").unwrap()];
        let cwd = Path::new("/srv/app");
        assert!(path_matches(cwd, Path::new("/srv/app/src/a/b.js"), &patterns));
        assert!(!path_matches(cwd, Path::new("/srv/app/dist/a.js"), &patterns));
        assert!(!path_matches(cwd, Path::new("/elsewhere/src/a.js"), &patterns));
    }

    #[tokio::test]
    async fn watcher_emits_restart_after_change() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();

        let dev = DevConfig {
            enabled: true,
            watch: vec!["src/**/*.py".into()],
            cwd: dir.path().to_path_buf(),
        };
        let (tx, mut rx) = mpsc::channel(4);
        let _watcher = DevWatcher::spawn("s", &dev, tx).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("src/main.py"), "x = 1\n").unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no restart requested")
            .expect("channel closed");
    }
}
