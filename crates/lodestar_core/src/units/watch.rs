//! File watching shared by the watching units.

use core::time::Duration;
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lodestar_runtime::runtime::RuntimeHandle;
use lodestar_runtime::verticle::VerticleError;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use walkdir::WalkDir;

/// Modification times of the files below a directory.
pub(crate) type Snapshot = BTreeMap<PathBuf, SystemTime>;

/// Returns true if `path` has `extension` (always true for `None`).
pub(crate) fn has_extension(path: &Path, extension: Option<&str>) -> bool {
    extension.is_none_or(|ext| path.extension().is_some_and(|e| e == ext))
}

/// Walks `dir` recursively, keeping files with `extension` (all files if `None`).
pub(crate) fn scan(dir: &Path, extension: Option<&str>) -> io::Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() || !has_extension(entry.path(), extension) {
            continue;
        }
        let modified = entry.metadata().map_err(io::Error::from)?.modified()?;
        snapshot.insert(entry.into_path(), modified);
    }
    Ok(snapshot)
}

/// Runs [`scan`] on the worker pool.
pub(crate) async fn scan_on_worker(
    handle: &RuntimeHandle,
    dir: &Path,
    extension: Option<&'static str>,
) -> io::Result<Snapshot> {
    let dir = dir.to_path_buf();
    handle
        .execute_blocking(move || scan(&dir, extension))
        .await
        .map_err(io::Error::other)?
}

/// Creates `dir` on the worker pool.
pub(crate) async fn ensure_directory(
    handle: &RuntimeHandle,
    dir: &Path,
    verticle: &str,
) -> Result<(), VerticleError> {
    let target = dir.to_path_buf();
    handle
        .execute_blocking(move || std::fs::create_dir_all(&target))
        .await
        .map_err(|err| VerticleError::Start {
            verticle: verticle.to_string(),
            reason: err.to_string(),
        })?
        .map_err(VerticleError::Io)
}

/// Recursive file system watch on a directory.
///
/// Events arrive from the watcher thread through a channel and are grouped
/// into batches by [`DirectoryWatch::next_batch`].
pub(crate) struct DirectoryWatch {
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
}

impl DirectoryWatch {
    /// Starts watching `dir`.
    pub(crate) fn start(dir: &Path, verticle: &str) -> Result<Self, VerticleError> {
        let failed = |err: notify::Error| VerticleError::Start {
            verticle: verticle.to_string(),
            reason: format!("cannot watch {}: {err}", dir.display()),
        };
        let (tx, events) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })
        .map_err(failed)?;
        watcher.watch(dir, RecursiveMode::Recursive).map_err(failed)?;
        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// Waits for a change, then collects further changes until none arrived
    /// for `settle`. Returns the touched paths, or `None` once the watcher is gone.
    pub(crate) async fn next_batch(&mut self, settle: Duration) -> Option<BTreeSet<PathBuf>> {
        let mut touched = BTreeSet::new();
        collect(self.events.recv().await?, &mut touched);
        loop {
            match tokio::time::timeout(settle, self.events.recv()).await {
                Ok(Some(event)) => collect(event, &mut touched),
                Ok(None) | Err(_) => return Some(touched),
            }
        }
    }
}

fn collect(event: notify::Result<notify::Event>, touched: &mut BTreeSet<PathBuf>) {
    match event {
        Ok(event) if matches!(event.kind, EventKind::Access(_)) => {}
        Ok(event) => touched.extend(event.paths),
        Err(err) => tracing::warn!(error = %err, "file watch error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_filters_by_extension_and_recurses() {
        let dir = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir(dir.path().join("nested")).expect("mkdir");
        std::fs::write(dir.path().join("a.json"), "{}").expect("write");
        std::fs::write(dir.path().join("b.txt"), "").expect("write");
        std::fs::write(dir.path().join("nested/c.json"), "{}").expect("write");

        assert_eq!(scan(dir.path(), Some("json")).expect("scan").len(), 2);
        assert_eq!(scan(dir.path(), None).expect("scan").len(), 3);
    }

    #[tokio::test]
    async fn watch_reports_created_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut watch = DirectoryWatch::start(dir.path(), "test").expect("watch");

        let created = dir.path().join("orders.json");
        std::fs::write(&created, "{}").expect("write");

        let batch = tokio::time::timeout(Duration::from_secs(5), watch.next_batch(Duration::from_millis(50)))
            .await
            .expect("a change should be reported")
            .expect("watcher alive");
        let created = created.canonicalize().expect("canonical path");
        assert!(
            batch
                .iter()
                .any(|path| path.canonicalize().is_ok_and(|path| path == created)),
            "unexpected batch {batch:?}"
        );
    }
}
