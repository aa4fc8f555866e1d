//! Plugin Directory Watcher
//!
//! Watches the plugins directory and requests a registry refresh whenever a
//! plugin file is created, modified or removed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::Notify;
use tracing::{debug, error, info};

use super::registry::plugin_file;

/// Coalescing refresh request.
///
/// Any number of `request()` calls made before the waiter wakes collapse into
/// one refresh: the pending flag is only cleared right before the refresh
/// runs, so it always reads the latest state of the directory.
#[derive(Debug, Default)]
pub struct RefreshSignal {
    pending: AtomicBool,
    notify: Notify,
    debounce: Duration,
}

impl RefreshSignal {
    pub fn new(debounce: Duration) -> Self {
        Self {
            pending: AtomicBool::new(false),
            notify: Notify::new(),
            debounce,
        }
    }

    /// Ask for a refresh. Cheap, callable from any thread.
    pub fn request(&self) {
        if !self.pending.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Wait until a refresh is due.
    ///
    /// Defers to the next scheduling quantum (plus the debounce, if any) so a
    /// burst of events lands in a single refresh. Cancel-safe: dropping the
    /// future leaves the request pending for the next call.
    pub async fn wait(&self) {
        while !self.is_pending() {
            self.notify.notified().await;
        }

        tokio::task::yield_now().await;
        if !self.debounce.is_zero() {
            tokio::time::sleep(self.debounce).await;
        }

        self.pending.store(false, Ordering::Release);
    }
}

/// Filesystem watcher feeding a [`RefreshSignal`]
pub struct PluginWatcher {
    dir: PathBuf,
    /// The underlying watcher (kept alive)
    _watcher: RecommendedWatcher,
}

impl PluginWatcher {
    /// Start watching `dir` (non-recursively)
    pub fn new(dir: impl AsRef<Path>, signal: Arc<RefreshSignal>) -> Result<Self, notify::Error> {
        let dir = dir
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| dir.as_ref().to_path_buf());

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if is_plugin_change(&event) {
                        debug!("Plugin file change: {:?}", event.paths);
                        signal.request();
                    }
                }
                Err(e) => {
                    error!("Plugin watcher error: {}", e);
                }
            }
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!("Watching plugins directory: {}", dir.display());

        Ok(Self {
            dir,
            _watcher: watcher,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Whether a notify event touches a recognized plugin file
fn is_plugin_change(event: &Event) -> bool {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {}
        _ => return false,
    }
    event.paths.iter().any(|path| plugin_file(path).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};
    use tokio_test::{assert_pending, assert_ready, task};

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_is_plugin_change() {
        assert!(is_plugin_change(&event(
            EventKind::Create(CreateKind::File),
            "/plugins/a.js"
        )));
        assert!(is_plugin_change(&event(
            EventKind::Modify(ModifyKind::Any),
            "/plugins/theme.css"
        )));
        assert!(is_plugin_change(&event(
            EventKind::Remove(RemoveKind::File),
            "/plugins/a.js"
        )));
        assert!(!is_plugin_change(&event(
            EventKind::Modify(ModifyKind::Any),
            "/plugins/a.js.swp"
        )));
        assert!(!is_plugin_change(&event(
            EventKind::Access(AccessKind::Any),
            "/plugins/a.js"
        )));
    }

    #[tokio::test]
    async fn test_burst_collapses_into_one_refresh() {
        let signal = RefreshSignal::default();
        signal.request();
        signal.request();
        signal.request();

        signal.wait().await;
        assert!(!signal.is_pending());

        let mut second = task::spawn(signal.wait());
        assert_pending!(second.poll());

        signal.request();
        assert!(second.is_woken());
        // yield_now needs one more poll
        assert_pending!(second.poll());
        assert_ready!(second.poll());
    }

    #[tokio::test]
    async fn test_cancelled_wait_keeps_request() {
        let signal = RefreshSignal::default();
        signal.request();

        {
            let mut cancelled = task::spawn(signal.wait());
            // Stops at the yield point, then gets dropped
            assert_pending!(cancelled.poll());
        }
        assert!(signal.is_pending());

        signal.wait().await;
        assert!(!signal.is_pending());
    }

    #[tokio::test]
    async fn test_watcher_signals_on_new_plugin() {
        let temp = tempfile::TempDir::new().unwrap();
        let signal = Arc::new(RefreshSignal::default());
        let _watcher = PluginWatcher::new(temp.path(), signal.clone()).unwrap();

        std::fs::write(temp.path().join("fresh.js"), "module.exports = {};").unwrap();

        tokio::time::timeout(Duration::from_secs(10), signal.wait())
            .await
            .expect("watcher should request a refresh");
    }
}
