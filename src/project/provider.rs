//! Watched file set resolution.
//!
//! The watch loop resolves a fresh snapshot at the start of every iteration;
//! snapshots are never reused stale. `FileSetProvider` is the seam for a
//! project-model service; the built-in `ScanProvider` walks the watch roots.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Result;
use rustc_hash::FxHashMap;

/// Directories never worth watching.
const SKIP_DIRS: &[&str] = &["target", "node_modules", "__pycache__"];

/// Cheap change fingerprint: modification time plus length, stat only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    pub mtime: Option<SystemTime>,
    pub len: u64,
}

impl FileFingerprint {
    /// Stat a path. `None` when the file vanished between listing and stat.
    pub fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            mtime: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

/// One file in the watched set.
#[derive(Debug, Clone)]
pub struct WatchedFile {
    pub path: PathBuf,
    pub fingerprint: FileFingerprint,
}

/// A resolved snapshot of the watched file set.
#[derive(Debug, Clone, Default)]
pub struct FileSet {
    files: FxHashMap<PathBuf, FileFingerprint>,
    roots: Vec<PathBuf>,
}

impl FileSet {
    pub fn new(files: impl IntoIterator<Item = WatchedFile>, roots: Vec<PathBuf>) -> Self {
        Self {
            files: files
                .into_iter()
                .map(|f| (f.path, f.fingerprint))
                .collect(),
            roots,
        }
    }

    /// Directories the OS watcher attaches to.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Is this path part of the watched set? Paths under a watch root count
    /// even when they appeared after resolution (newly added files).
    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.roots.iter().any(|root| path.starts_with(root))
    }

    pub fn fingerprint(&self, path: &Path) -> Option<&FileFingerprint> {
        self.files.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &FileFingerprint)> {
        self.files.iter()
    }

    /// Sorted paths, for list output and deterministic diffing.
    pub fn sorted_paths(&self) -> Vec<&PathBuf> {
        let mut paths: Vec<_> = self.files.keys().collect();
        paths.sort();
        paths
    }
}

/// Resolves the current watched file set for a project.
///
/// Resolution runs fresh each watch iteration; the set may change between
/// iterations (generated files, new sources).
pub trait FileSetProvider: Send + Sync {
    fn resolve(&self) -> Result<FileSet>;
}

/// Built-in provider: parallel walk of the watch roots.
pub struct ScanProvider {
    roots: Vec<PathBuf>,
    manifest: PathBuf,
}

impl ScanProvider {
    pub fn new(roots: Vec<PathBuf>, manifest: PathBuf) -> Self {
        Self { roots, manifest }
    }
}

/// Walk one root, collecting watchable files. Shared with the polling
/// watcher backend, which rescans on every tick.
pub(crate) fn walk_root(root: &Path, out: &mut Vec<WatchedFile>) {
    for entry in jwalk::WalkDir::new(root)
        .skip_hidden(true)
        .process_read_dir(|_, _, _, children| {
            children.retain(|entry| {
                entry.as_ref().is_ok_and(|e| {
                    let name = e.file_name().to_string_lossy();
                    !(e.file_type().is_dir() && SKIP_DIRS.contains(&name.as_ref()))
                })
            });
        })
    {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(fingerprint) = FileFingerprint::of(&path) {
            out.push(WatchedFile { path, fingerprint });
        }
    }
}

impl FileSetProvider for ScanProvider {
    fn resolve(&self) -> Result<FileSet> {
        let mut files = Vec::new();
        for root in &self.roots {
            if !root.exists() {
                anyhow::bail!("watch root does not exist: {}", root.display());
            }
            walk_root(root, &mut files);
        }

        // The manifest is always watched, wherever the roots point.
        if let Some(fingerprint) = FileFingerprint::of(&self.manifest) {
            files.push(WatchedFile {
                path: self.manifest.clone(),
                fingerprint,
            });
        }

        crate::debug!("watch"; "resolved {} files under {} roots", files.len(), self.roots.len());
        Ok(FileSet::new(files, self.roots.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_project() -> (TempDir, ScanProvider) {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("main.rs"), "fn main() {}").unwrap();
        std::fs::write(src.join("lib.rs"), "").unwrap();
        let manifest = temp.path().join("devloop.toml");
        std::fs::write(&manifest, "").unwrap();

        let provider = ScanProvider::new(vec![src], manifest);
        (temp, provider)
    }

    #[test]
    fn test_resolve_includes_sources_and_manifest() {
        let (temp, provider) = make_project();
        let set = provider.resolve().unwrap();

        assert_eq!(set.len(), 3);
        assert!(set.contains(&temp.path().join("src/main.rs")));
        assert!(set.contains(&temp.path().join("devloop.toml")));
    }

    #[test]
    fn test_resolve_missing_root_fails() {
        let temp = TempDir::new().unwrap();
        let provider = ScanProvider::new(
            vec![temp.path().join("nope")],
            temp.path().join("devloop.toml"),
        );
        assert!(provider.resolve().is_err());
    }

    #[test]
    fn test_skip_dirs_excluded() {
        let (temp, provider) = make_project();
        let target = temp.path().join("src/target");
        std::fs::create_dir_all(&target).unwrap();
        std::fs::write(target.join("junk.o"), "x").unwrap();

        let set = provider.resolve().unwrap();
        assert!(set.fingerprint(&target.join("junk.o")).is_none());
    }

    #[test]
    fn test_contains_covers_new_files_under_roots() {
        let (temp, provider) = make_project();
        let set = provider.resolve().unwrap();

        // Not yet on disk, but inside a watched root
        assert!(set.contains(&temp.path().join("src/new_file.rs")));
        // Outside every root and not the manifest
        assert!(!set.contains(&temp.path().join("elsewhere.rs")));
    }

    #[test]
    fn test_sorted_paths_deterministic() {
        let (_temp, provider) = make_project();
        let set = provider.resolve().unwrap();
        let paths = set.sorted_paths();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }
}
