//! Configuration file watcher for hot reload.
//!
//! Editors often emit several events for one save (truncate, write, rename).
//! Each event re-reads the file, but a config is only forwarded when it
//! differs from the one currently in effect.

use std::path::{Path, PathBuf};
use std::time::Duration;
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use crate::config::loader::load_config;
use crate::config::schema::OrchestratorConfig;

/// Watches the config file and forwards changed, validated configs.
pub struct ConfigWatcher {
    path: PathBuf,
    current: OrchestratorConfig,
    update_tx: mpsc::UnboundedSender<OrchestratorConfig>,
}

impl ConfigWatcher {
    /// `current` is the config already in effect; reloads equal to it are dropped.
    pub fn new(path: &Path, current: OrchestratorConfig) -> (Self, mpsc::UnboundedReceiver<OrchestratorConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                current,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for updates to flow.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { path, mut current, update_tx } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches_content(&event.kind) => {
                    if let Some(next) = reload(&path, &mut current) {
                        let _ = update_tx.send(next);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?watched, "Config watcher started");
        Ok(watcher)
    }
}

// Permission and timestamp changes never alter the config.
fn touches_content(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) | EventKind::Create(_) => true,
        _ => false,
    }
}

/// Re-read `path`. Returns the new config if it loads, validates and differs
/// from `current`, updating `current` to it.
fn reload(path: &Path, current: &mut OrchestratorConfig) -> Option<OrchestratorConfig> {
    match load_config(path) {
        Ok(next) if next == *current => {
            tracing::debug!(path = ?path, "Config file touched without changes");
            None
        }
        Ok(next) => {
            tracing::info!(path = ?path, "Config file changed, applying reloaded settings");
            *current = next.clone();
            Some(next)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to reload config, keeping current settings");
            None
        }
    }
}
