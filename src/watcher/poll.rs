//! Stat-based polling backend.
//!
//! Rescans the watch roots on a fixed interval and diffs (mtime, len)
//! fingerprints against the previous pass. Used where OS notifications are
//! unreliable: network shares, container mounts, virtual filesystems.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::sync::mpsc;

use super::{ChangeKind, WatcherMsg};
use crate::project::{FileFingerprint, FileSet, walk_root};

/// Spawn the polling thread. The returned flag stops it; the thread also
/// exits when the receiving side of `tx` is dropped.
pub(super) fn spawn(
    set: FileSet,
    interval: Duration,
    tx: mpsc::Sender<WatcherMsg>,
) -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);

    std::thread::spawn(move || {
        // Seed from the resolved snapshot so changes between resolution and
        // the first tick are not lost.
        let mut previous: FxHashMap<PathBuf, FileFingerprint> =
            set.iter().map(|(p, f)| (p.clone(), *f)).collect();

        while !stop_flag.load(Ordering::Relaxed) {
            std::thread::sleep(interval);
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }

            let current = rescan(&set, &previous);
            if emit_diff(&previous, &current, &tx).is_err() {
                break; // watcher dropped
            }
            previous = current;
        }
    });

    stop
}

/// Build the current fingerprint map: walk every root, then stat watched
/// paths outside the roots (the manifest may live elsewhere).
fn rescan(
    set: &FileSet,
    previous: &FxHashMap<PathBuf, FileFingerprint>,
) -> FxHashMap<PathBuf, FileFingerprint> {
    let mut files = Vec::new();
    for root in set.roots() {
        walk_root(root, &mut files);
    }

    let mut current: FxHashMap<PathBuf, FileFingerprint> = files
        .into_iter()
        .map(|f| (f.path, f.fingerprint))
        .collect();

    for path in previous.keys() {
        if current.contains_key(path) || set.roots().iter().any(|r| path.starts_with(r)) {
            continue;
        }
        if let Some(fingerprint) = FileFingerprint::of(path) {
            current.insert(path.clone(), fingerprint);
        }
    }

    current
}

/// Send one message per added/modified/removed path.
fn emit_diff(
    previous: &FxHashMap<PathBuf, FileFingerprint>,
    current: &FxHashMap<PathBuf, FileFingerprint>,
    tx: &mpsc::Sender<WatcherMsg>,
) -> Result<(), ()> {
    for (path, fingerprint) in current {
        match previous.get(path) {
            None => send(tx, path, ChangeKind::Added)?,
            Some(old) if old != fingerprint => send(tx, path, ChangeKind::Modified)?,
            Some(_) => {}
        }
    }

    for path in previous.keys() {
        if !current.contains_key(path) {
            send(tx, path, ChangeKind::Removed)?;
        }
    }

    Ok(())
}

fn send(tx: &mpsc::Sender<WatcherMsg>, path: &PathBuf, kind: ChangeKind) -> Result<(), ()> {
    tx.blocking_send(WatcherMsg::Change(path.clone(), kind))
        .map_err(|_| ())
}
