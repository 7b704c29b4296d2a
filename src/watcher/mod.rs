//! File change watching.
//!
//! Turns raw filesystem notifications (or polling) into a deduplicated,
//! debounced stream of change events over a resolved file set.
//!
//! Architecture:
//! ```text
//! notify / poller → channel → Debouncer (pure timing) → batch of ChangeEvent
//! ```
//!
//! The backend is a per-run choice: OS notifications by default, stat-based
//! polling when requested (config, `--poll`, `DEVLOOP_POLLER`) or when the
//! notification watcher cannot be created (network and virtual filesystems).

mod debounce;
mod poll;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::WatchConfig;
use crate::project::FileSet;
use debounce::Debouncer;

/// Internal channel capacity; bursts beyond this block the producer briefly.
const CHANNEL_BUFFER: usize = 256;

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

/// A debounced change to one watched file.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub at: Instant,
}

/// Typed watcher failures, surfaced upward instead of degrading to silence.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to create filesystem watcher: {0}")]
    Init(#[source] notify::Error),

    #[error("failed to watch {}: {source}", .path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("filesystem watcher failed: {0}")]
    Runtime(#[source] notify::Error),

    #[error("watch event channel closed")]
    Closed,
}

/// Per-run watcher options, derived from config plus environment.
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub debounce: Duration,
    pub poll: bool,
    pub poll_interval: Duration,
}

impl WatcherOptions {
    pub fn from_config(config: &WatchConfig, poll_flag: bool) -> Self {
        Self {
            debounce: Duration::from_millis(config.debounce_ms),
            poll: poll_flag || config.polling_enabled(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// Raw message from a backend to the debouncing front end.
enum WatcherMsg {
    Change(PathBuf, ChangeKind),
    Failure(notify::Error),
}

/// Backend handle; dropping it releases OS watches or stops the poller.
enum Backend {
    Notify(RecommendedWatcher),
    Polling(Arc<AtomicBool>),
}

impl Drop for Backend {
    fn drop(&mut self) {
        if let Self::Polling(stop) = self {
            stop.store(true, Ordering::Relaxed);
        }
    }
}

/// Debounced change stream over one watched file set.
///
/// Created fresh each watch iteration; dropping it releases the backend.
pub struct FileChangeWatcher {
    rx: mpsc::Receiver<WatcherMsg>,
    debouncer: Debouncer,
    set: FileSet,
    _backend: Backend,
}

impl FileChangeWatcher {
    /// Start watching. Selects the backend for this run and attaches it to
    /// the set's roots. Watch-handle errors are typed, never swallowed.
    pub fn start(set: FileSet, options: &WatcherOptions) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);

        let backend = if options.poll {
            crate::debug!("watch"; "polling backend ({} ms interval)", options.poll_interval.as_millis());
            Backend::Polling(poll::spawn(set.clone(), options.poll_interval, tx))
        } else {
            match Self::start_notify(&set, tx.clone()) {
                Ok(backend) => backend,
                Err(WatchError::Init(e)) => {
                    // Notifications unavailable on this filesystem
                    crate::warn!("watch"; "notifications unavailable ({}), falling back to polling", e);
                    Backend::Polling(poll::spawn(set.clone(), options.poll_interval, tx))
                }
                Err(e) => return Err(e),
            }
        };

        Ok(Self {
            rx,
            debouncer: Debouncer::new(options.debounce),
            set,
            _backend: backend,
        })
    }

    fn start_notify(set: &FileSet, tx: mpsc::Sender<WatcherMsg>) -> Result<Backend, WatchError> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => forward_event(event, &tx),
                Err(e) => {
                    let _ = tx.blocking_send(WatcherMsg::Failure(e));
                }
            }
        })
        .map_err(WatchError::Init)?;

        for root in set.roots() {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|source| WatchError::Root {
                    path: root.clone(),
                    source,
                })?;
        }

        Ok(Backend::Notify(watcher))
    }

    /// Suspend until a debounced batch of qualifying changes is ready.
    ///
    /// Cancel-safe: callers race this against the session token; pending
    /// debouncer state survives an abandoned call.
    pub async fn next_batch(&mut self) -> Result<Vec<ChangeEvent>, WatchError> {
        loop {
            tokio::select! {
                biased;
                msg = self.rx.recv() => match msg {
                    Some(WatcherMsg::Change(path, kind)) => {
                        if self.set.contains(&path) {
                            self.debouncer.add(path, kind);
                        }
                    }
                    Some(WatcherMsg::Failure(e)) => return Err(WatchError::Runtime(e)),
                    None => return Err(WatchError::Closed),
                },
                _ = tokio::time::sleep(self.debouncer.sleep_duration()) => {
                    if let Some(batch) = self.debouncer.take_if_ready() {
                        return Ok(batch);
                    }
                }
            }
        }
    }
}

/// Map a notify event into per-path change messages.
fn forward_event(event: notify::Event, tx: &mpsc::Sender<WatcherMsg>) {
    use notify::EventKind;

    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Added,
        EventKind::Remove(_) => ChangeKind::Removed,
        EventKind::Modify(modify) => {
            // Ignore metadata-only changes (mtime/atime/chmod noise)
            if matches!(modify, notify::event::ModifyKind::Metadata(_)) {
                return;
            }
            ChangeKind::Modified
        }
        _ => return,
    };

    for path in event.paths {
        if tx.blocking_send(WatcherMsg::Change(path, kind)).is_err() {
            return; // watcher dropped
        }
    }
}
