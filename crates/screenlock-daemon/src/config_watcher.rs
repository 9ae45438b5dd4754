//! Config file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::{EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, info};

use crate::error::{DaemonError, Result};

const CONFIG_DEBOUNCE: Duration = Duration::from_millis(500);
const RELOAD_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Watch `config_path` on a background thread.
///
/// Each burst of writes to the file sends one `()` on `tx`. The thread stops
/// once the receiving side is dropped.
pub fn spawn_config_watcher(
    config_path: PathBuf,
    tx: tokio_mpsc::UnboundedSender<()>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        if let Err(e) = watch_config_file(&config_path, &tx) {
            error!("Config watcher error: {e}");
        }
    })
}

fn is_config_event(event: &notify::Event, config_path: &Path) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == config_path.file_name())
}

fn watch_config_file(config_path: &Path, tx: &tokio_mpsc::UnboundedSender<()>) -> Result<()> {
    let parent = config_path
        .parent()
        .filter(|p| p.is_dir())
        .ok_or_else(|| {
            DaemonError::Config(format!(
                "No directory to watch for {}",
                config_path.display()
            ))
        })?;

    let (event_tx, event_rx) = mpsc::channel();
    let mut watcher =
        notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
            let _ = event_tx.send(result);
        })?;
    watcher.watch(parent, RecursiveMode::NonRecursive)?;
    info!("Watching config file: {}", config_path.display());

    let mut last_reload: Option<Instant> = None;
    for result in event_rx {
        let event = match result {
            Ok(event) => event,
            Err(e) => {
                error!("Watcher error: {e}");
                continue;
            }
        };
        if !is_config_event(&event, config_path) {
            continue;
        }
        if last_reload.is_some_and(|at| at.elapsed() < CONFIG_DEBOUNCE) {
            continue;
        }
        last_reload = Some(Instant::now());

        // Editors write in several steps; let the file settle
        std::thread::sleep(RELOAD_SETTLE_DELAY);
        debug!("Config file changed, requesting reload");
        if tx.send(()).is_err() {
            debug!("Config reload receiver dropped, stopping watcher");
            break;
        }
    }

    Ok(())
}
