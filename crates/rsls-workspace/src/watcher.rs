//! File system watching for manifest changes.
//!
//! [`ManifestWatcher`] watches a project directory recursively and hands
//! batches of [`WatchEvent`]s to a handler on a background thread. Whether a
//! batch should trigger a cargo update is decided by [`is_interesting`].

use std::sync::mpsc;
use std::thread;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use notify::event::ModifyKind;
use notify::event::RenameMode;
use notify::Config;
use notify::Event;
use notify::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use rsls_project::MANIFEST_FILES;
use rsls_project::TARGET_DIRS;
use thiserror::Error;

/// Path components that never contain anything cargo reads.
const EXCLUDED_DIRS: [&str; 2] = ["target", ".git"];

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {path}")]
    Watch {
        path: Utf8PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("failed to create file watcher")]
    Create(#[from] notify::Error),
    #[error("failed to start watcher thread")]
    Thread(#[from] std::io::Error),
}

/// A change observed on disk.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent {
    /// A file's content changed
    Modified(Utf8PathBuf),
    /// A new file was created
    Created(Utf8PathBuf),
    /// A file was deleted
    Deleted(Utf8PathBuf),
    /// A file was renamed or moved from one path to another
    Renamed { from: Utf8PathBuf, to: Utf8PathBuf },
}

/// Whether `event` can change what `cargo metadata` reports.
///
/// Content edits never do. Structural changes do when they touch a manifest
/// or build script, or a file directly inside a directory cargo scans for
/// implicit targets.
#[must_use]
pub fn is_interesting(event: &WatchEvent) -> bool {
    match event {
        WatchEvent::Modified(_) => false,
        WatchEvent::Created(path) | WatchEvent::Deleted(path) => affects_manifest(path),
        WatchEvent::Renamed { from, to } => affects_manifest(from) || affects_manifest(to),
    }
}

fn affects_manifest(path: &Utf8Path) -> bool {
    if path
        .file_name()
        .is_some_and(|name| MANIFEST_FILES.contains(&name))
    {
        return true;
    }

    path.parent()
        .is_some_and(|parent| TARGET_DIRS.iter().any(|dir| parent.ends_with(dir)))
}

/// Watches a project tree and forwards event batches to a handler.
pub struct ManifestWatcher {
    /// The underlying file system watcher
    _watcher: RecommendedWatcher,
    /// Handle to the background processing thread
    _handle: thread::JoinHandle<()>,
}

impl ManifestWatcher {
    /// Start watching `root` recursively.
    ///
    /// `handler` runs on a background thread; the thread exits once the
    /// watcher is dropped.
    pub fn new<F>(root: &Utf8Path, handler: F) -> Result<Self, WatchError>
    where
        F: Fn(Vec<WatchEvent>) + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(e) => tracing::warn!("File watcher error: {}", e),
            },
            Config::default(),
        )?;

        watcher
            .watch(root.as_std_path(), RecursiveMode::Recursive)
            .map_err(|source| WatchError::Watch {
                path: root.to_path_buf(),
                source,
            })?;

        let handle = thread::Builder::new()
            .name("rsls-watcher".to_string())
            .spawn(move || Self::process_events(&event_rx, &handler))?;

        tracing::debug!("Watching {} for manifest changes", root);

        Ok(Self {
            _watcher: watcher,
            _handle: handle,
        })
    }

    /// Batch whatever is already queued behind each event and hand it over.
    fn process_events<F>(event_rx: &mpsc::Receiver<Event>, handler: &F)
    where
        F: Fn(Vec<WatchEvent>),
    {
        while let Ok(event) = event_rx.recv() {
            let mut batch = convert_notify_event(event);
            while let Ok(event) = event_rx.try_recv() {
                batch.extend(convert_notify_event(event));
            }
            if !batch.is_empty() {
                handler(batch);
            }
        }
    }
}

/// Convert a [`notify::Event`] into our [`WatchEvent`] format.
fn convert_notify_event(event: Event) -> Vec<WatchEvent> {
    let paths: Vec<Utf8PathBuf> = event
        .paths
        .into_iter()
        .filter_map(|path| Utf8PathBuf::from_path_buf(path).ok())
        .filter(|path| !is_excluded(path))
        .collect();

    match event.kind {
        EventKind::Create(_) => paths.into_iter().map(WatchEvent::Created).collect(),
        EventKind::Remove(_) => paths.into_iter().map(WatchEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
            let mut paths = paths.into_iter();
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => vec![WatchEvent::Renamed { from, to }],
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.into_iter().map(WatchEvent::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.into_iter().map(WatchEvent::Created).collect()
        }
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .into_iter()
            .map(|path| WatchEvent::Renamed {
                from: path.clone(),
                to: path,
            })
            .collect(),
        EventKind::Modify(_) => paths.into_iter().map(WatchEvent::Modified).collect(),
        EventKind::Any | EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}

fn is_excluded(path: &Utf8Path) -> bool {
    path.components()
        .any(|component| EXCLUDED_DIRS.contains(&component.as_str()))
}
