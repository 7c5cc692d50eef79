//! File-system watcher that re-submits a source file on change.
//!
//! [`SourceWatcher`] uses the `notify` crate to watch the directory holding
//! the source file and signals a tokio channel whenever that file is
//! written, created, or replaced. Reading the file and submitting it to a
//! [`crate::session::LiveSession`] stays with the receiver.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Whether `event` reports a write or replacement of `target`.
fn is_source_change(event: &Event, target: &Path) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event.paths.iter().any(|p| p.file_name() == target.file_name())
}

/// Watches one source file. Dropping the watcher stops the OS watch.
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl std::fmt::Debug for SourceWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceWatcher")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SourceWatcher {
    /// Watch `path`, sending `()` on `changed` for every change.
    ///
    /// Bursts of notifications are expected; the session's debounce
    /// coalesces them.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the watcher cannot be created or the
    /// containing directory cannot be watched.
    pub fn new(path: &Path, changed: mpsc::UnboundedSender<()>) -> Result<Self> {
        let target = path.to_path_buf();
        let target_for_callback = target.clone();

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| match result {
                Ok(event) if is_source_change(&event, &target_for_callback) => {
                    if changed.send(()).is_err() {
                        debug!("source watcher: receiver dropped");
                    }
                }
                Err(err) => warn!(%err, "source watcher error"),
                _ => {}
            },
        )
        .map_err(|err| AppError::Io(format!("failed to create source watcher: {err}")))?;

        // Editors commonly save via write-to-temp + rename, so watch the parent.
        let watch_target = path
            .parent()
            .filter(|p| p != &Path::new(""))
            .unwrap_or(path);

        watcher
            .watch(watch_target, RecursiveMode::NonRecursive)
            .map_err(|err| {
                AppError::Io(format!(
                    "failed to watch '{}': {err}",
                    watch_target.display()
                ))
            })?;

        info!(path = %path.display(), "source watcher started");

        Ok(Self {
            _watcher: watcher,
            path: target,
        })
    }

    /// Watched file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
