use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use super::{ChangeEvent, ChangeKind};

/// Pure debouncer: only handles timing and event deduplication.
pub(super) struct Debouncer {
    window: Duration,
    /// Path → ChangeKind (dedup is free via HashMap key uniqueness)
    pub(super) changes: FxHashMap<PathBuf, ChangeKind>,
    pub(super) last_event: Option<Instant>,
}

impl Debouncer {
    pub(super) fn new(window: Duration) -> Self {
        Self {
            window,
            changes: FxHashMap::default(),
            last_event: None,
        }
    }

    /// Record a raw change, applying dedup rules:
    /// - Removed + Added/Modified → file was restored, use the new event
    /// - Modified + Removed → file was deleted, upgrade to Removed
    /// - Added + Removed → appeared then vanished, discard (no-op)
    /// - otherwise: first event wins
    pub(super) fn add(&mut self, path: PathBuf, kind: ChangeKind) {
        if is_temp_file(&path) {
            return;
        }

        if let Some(&existing) = self.changes.get(&path) {
            match (existing, kind) {
                (ChangeKind::Removed, ChangeKind::Added | ChangeKind::Modified) => {
                    crate::debug!("watch"; "restore {}: {}", kind.label(), path.display());
                    self.changes.insert(path, kind);
                }
                (ChangeKind::Modified, ChangeKind::Removed) => {
                    crate::debug!("watch"; "upgrade modified->removed: {}", path.display());
                    self.changes.insert(path, ChangeKind::Removed);
                }
                (ChangeKind::Added, ChangeKind::Removed) => {
                    crate::debug!("watch"; "discard added+removed: {}", path.display());
                    self.changes.remove(&path);
                }
                _ => return,
            }
            self.last_event = Some(Instant::now());
            return;
        }

        crate::debug!("watch"; "event {}: {}", kind.label(), path.display());
        self.changes.insert(path, kind);
        self.last_event = Some(Instant::now());
    }

    /// Take the collapsed batch if the debounce window has elapsed.
    pub(super) fn take_if_ready(&mut self) -> Option<Vec<ChangeEvent>> {
        if !self.is_ready() {
            return None;
        }

        let changes = std::mem::take(&mut self.changes);
        self.last_event = None;

        if changes.is_empty() {
            return None;
        }

        let at = Instant::now();
        let mut events: Vec<_> = changes
            .into_iter()
            .map(|(path, kind)| ChangeEvent { path, kind, at })
            .collect();
        events.sort_by(|a, b| a.path.cmp(&b.path));
        Some(events)
    }

    pub(super) fn is_ready(&self) -> bool {
        let Some(last_event) = self.last_event else {
            return false;
        };

        last_event.elapsed() >= self.window && !self.changes.is_empty()
    }

    /// Precise sleep duration until next possible ready time.
    pub(super) fn sleep_duration(&self) -> Duration {
        let Some(last_event) = self.last_event else {
            return Duration::from_secs(86400);
        };

        self.window
            .saturating_sub(last_event.elapsed())
            .max(Duration::from_millis(1))
    }
}

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(300);

    #[test]
    fn test_debouncer_empty() {
        let debouncer = Debouncer::new(WINDOW);
        assert!(!debouncer.is_ready());
    }

    #[test]
    fn test_same_path_burst_collapses() {
        let mut debouncer = Debouncer::new(Duration::ZERO);

        // Editor write+touch burst: one emitted event
        debouncer.add(PathBuf::from("/p/a.rs"), ChangeKind::Modified);
        debouncer.add(PathBuf::from("/p/a.rs"), ChangeKind::Modified);
        debouncer.add(PathBuf::from("/p/a.rs"), ChangeKind::Modified);

        let events = debouncer.take_if_ready().expect("batch ready");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn test_temp_file_ignored() {
        let mut debouncer = Debouncer::new(WINDOW);

        debouncer.add(PathBuf::from("/p/real.rs"), ChangeKind::Modified);
        debouncer.add(PathBuf::from("/p/.a.rs.swp"), ChangeKind::Modified);
        debouncer.add(PathBuf::from("/p/a.rs~"), ChangeKind::Modified);

        assert_eq!(debouncer.changes.len(), 1);
    }

    #[test]
    fn test_dedup_first_event_wins() {
        let mut debouncer = Debouncer::new(WINDOW);

        debouncer.add(PathBuf::from("/p/a.rs"), ChangeKind::Added);
        debouncer.add(PathBuf::from("/p/a.rs"), ChangeKind::Modified);

        assert_eq!(debouncer.changes[&PathBuf::from("/p/a.rs")], ChangeKind::Added);
    }

    #[test]
    fn test_remove_then_add_restores() {
        let mut debouncer = Debouncer::new(WINDOW);

        debouncer.add(PathBuf::from("/p/a.rs"), ChangeKind::Removed);
        debouncer.add(PathBuf::from("/p/a.rs"), ChangeKind::Added);

        assert_eq!(debouncer.changes[&PathBuf::from("/p/a.rs")], ChangeKind::Added);
    }

    #[test]
    fn test_add_then_remove_discards() {
        let mut debouncer = Debouncer::new(WINDOW);

        debouncer.add(PathBuf::from("/p/a.rs"), ChangeKind::Added);
        debouncer.add(PathBuf::from("/p/a.rs"), ChangeKind::Removed);

        assert!(debouncer.changes.is_empty());
    }

    #[test]
    fn test_modify_then_remove_upgrades() {
        let mut debouncer = Debouncer::new(WINDOW);

        debouncer.add(PathBuf::from("/p/a.rs"), ChangeKind::Modified);
        debouncer.add(PathBuf::from("/p/a.rs"), ChangeKind::Removed);

        assert_eq!(
            debouncer.changes[&PathBuf::from("/p/a.rs")],
            ChangeKind::Removed
        );
    }

    #[test]
    fn test_not_ready_inside_window() {
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.add(PathBuf::from("/p/a.rs"), ChangeKind::Modified);
        assert!(!debouncer.is_ready());
        assert!(debouncer.take_if_ready().is_none());
    }

    #[test]
    fn test_sleep_duration_no_events() {
        let debouncer = Debouncer::new(WINDOW);
        assert!(debouncer.sleep_duration() >= Duration::from_secs(3600));
    }

    #[test]
    fn test_sleep_duration_after_event() {
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.last_event = Some(Instant::now());

        let dur = debouncer.sleep_duration();
        assert!(dur <= WINDOW);
        assert!(dur >= WINDOW - Duration::from_millis(10));
    }

    #[test]
    fn test_batch_sorted_by_path() {
        let mut debouncer = Debouncer::new(Duration::ZERO);
        debouncer.add(PathBuf::from("/p/z.rs"), ChangeKind::Modified);
        debouncer.add(PathBuf::from("/p/a.rs"), ChangeKind::Modified);

        let events = debouncer.take_if_ready().unwrap();
        assert_eq!(events[0].path, PathBuf::from("/p/a.rs"));
        assert_eq!(events[1].path, PathBuf::from("/p/z.rs"));
    }
}
