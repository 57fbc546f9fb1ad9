//! Units read from a local directory, optionally watched for changes.
//!
//! The directory holds an `index` listing file plus the unit files it names.
//! Unit names are paths relative to the directory and may point into
//! subdirectories (`nested/a.py`).
//!
//! With watching enabled, the first registered change listener starts a
//! recursive [`notify`] watcher on the directory. Create, modify and remove
//! events on the listing file or on a listed unit, matched by relative path,
//! open a [`DEBOUNCE_WINDOW`]; the
//! listener is called once when the window closes, however many events
//! arrived in it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use unitvisor_core::listing::{parse_listing, INDEX_FILE};
use unitvisor_core::{ChangeListener, SourceError, SourceProvider};

/// Quiet period between the first relevant event and the listener call.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// What the last listing saw; shared with the watcher callback.
#[derive(Default)]
struct ListingState {
    names: HashSet<String>,
    newest: Option<DateTime<Utc>>,
}

/// A running watch: the OS handle plus the debounce task's token.
struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
    cancel: CancellationToken,
}

/// Serves units from files in a local directory.
pub struct WatchedDirectorySource {
    directory: PathBuf,
    watch: bool,
    listing: Arc<Mutex<ListingState>>,
    watcher: Mutex<Option<DirectoryWatcher>>,
}

impl WatchedDirectorySource {
    pub fn new(directory: impl Into<PathBuf>, watch: bool) -> Self {
        let directory = directory.into();
        tracing::info!(directory = %directory.display(), watch, "Directory source initialised");
        Self {
            directory,
            watch,
            listing: Arc::new(Mutex::new(ListingState::default())),
            watcher: Mutex::new(None),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// `true` while a watcher is running.
    pub fn is_watching(&self) -> bool {
        lock(&self.watcher).is_some()
    }

    /// Fold a file's modification time into the data age.
    async fn record_mtime(&self, path: &Path) {
        let modified = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|meta| meta.modified().ok())
            .map(DateTime::<Utc>::from);
        if let Some(modified) = modified {
            let mut listing = lock(&self.listing);
            if listing.newest.map_or(true, |newest| modified > newest) {
                listing.newest = Some(modified);
            }
        }
    }

    fn start_watcher(&self, listener: ChangeListener) -> Result<DirectoryWatcher, notify::Error> {
        let (tx, rx) = mpsc::unbounded_channel::<()>();
        let listing = Arc::clone(&self.listing);

        // Some backends report canonical paths; match against both forms.
        let mut roots = vec![self.directory.clone()];
        if let Ok(canonical) = std::fs::canonicalize(&self.directory) {
            if canonical != self.directory {
                roots.push(canonical);
            }
        }

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_relevant(&event, &roots, &lock(&listing).names) => {
                let _ = tx.send(());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Directory watcher error"),
        })?;
        watcher.watch(&self.directory, RecursiveMode::Recursive)?;

        let cancel = CancellationToken::new();
        tokio::spawn(debounce_loop(rx, listener, cancel.clone()));

        Ok(DirectoryWatcher {
            _watcher: watcher,
            cancel,
        })
    }
}

#[async_trait]
impl SourceProvider for WatchedDirectorySource {
    fn kind(&self) -> &'static str {
        "directory"
    }

    async fn list_unit_names(&self) -> Result<Vec<String>, SourceError> {
        let path = self.directory.join(INDEX_FILE);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| SourceError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let names = parse_listing(&text);

        {
            let mut listing = lock(&self.listing);
            listing.names = names.iter().cloned().collect();
            listing.newest = None;
        }
        self.record_mtime(&path).await;
        Ok(names)
    }

    async fn read_unit(&self, name: &str) -> Result<String, SourceError> {
        let path = self.directory.join(name);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::UnitNotFound(path.display().to_string()));
            }
            Err(source) => {
                return Err(SourceError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        self.record_mtime(&path).await;
        Ok(text)
    }

    async fn data_age(&self) -> Option<DateTime<Utc>> {
        lock(&self.listing).newest
    }

    fn register_change_listener(&self, listener: ChangeListener) {
        if !self.watch {
            return;
        }
        let mut slot = lock(&self.watcher);
        if slot.is_some() {
            tracing::debug!("Directory watcher already running");
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(
                directory = %self.directory.display(),
                "No Tokio runtime; directory watching disabled",
            );
            return;
        }

        match self.start_watcher(listener) {
            Ok(watcher) => {
                tracing::info!(directory = %self.directory.display(), "Directory watcher started");
                *slot = Some(watcher);
            }
            Err(e) => {
                tracing::error!(
                    directory = %self.directory.display(),
                    error = %e,
                    "Failed to start directory watcher",
                );
            }
        }
    }

    fn release(&self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.cancel.cancel();
            tracing::info!(directory = %self.directory.display(), "Directory watcher stopped");
        }
    }
}

impl Drop for WatchedDirectorySource {
    fn drop(&mut self) {
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.cancel.cancel();
        }
    }
}

/// Coalesce bursts of events: wait out the window after the first one,
/// drain whatever queued up meanwhile, then notify once.
async fn debounce_loop(
    mut events: mpsc::UnboundedReceiver<()>,
    listener: ChangeListener,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                if event.is_none() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(DEBOUNCE_WINDOW) => {}
                }
                while events.try_recv().is_ok() {}
                tracing::debug!("Directory change detected");
                listener();
            }
        }
    }
}

/// Create/modify/remove of the listing file or a listed unit.
fn is_relevant(event: &Event, roots: &[PathBuf], listed: &HashSet<String>) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event
        .paths
        .iter()
        .filter_map(|path| relative_name(path, roots))
        .any(|name| name == INDEX_FILE || listed.contains(&name))
}

/// `path` relative to the first root containing it, `/`-separated.
fn relative_name(path: &Path, roots: &[PathBuf]) -> Option<String> {
    let relative = roots.iter().find_map(|root| path.strip_prefix(root).ok())?;
    let parts: Option<Vec<&str>> = relative
        .components()
        .map(|component| component.as_os_str().to_str())
        .collect();
    Some(parts?.join("/"))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
