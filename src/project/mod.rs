//! Project discovery.
//!
//! A project is marked by its manifest: `devloop.toml`, or a named variant
//! `<name>.devloop.toml` when several projects share a directory. Discovery
//! failures are fatal and happen before the watch loop starts.

mod provider;

pub use provider::{FileFingerprint, FileSet, FileSetProvider, ScanProvider, WatchedFile};
pub(crate) use provider::walk_root;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Plain manifest file name.
pub const MANIFEST_NAME: &str = "devloop.toml";

/// Suffix for named manifests (`web.devloop.toml`).
const MANIFEST_SUFFIX: &str = ".devloop.toml";

/// A located project: manifest file plus its root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub manifest: PathBuf,
    pub root: PathBuf,
}

/// Discovery failures. All fatal: reported, process exits nonzero.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("no devloop.toml found in {} or any parent directory", .0.display())]
    NotFound(PathBuf),

    #[error("no project manifest found in {}", .0.display())]
    NoneInDirectory(PathBuf),

    #[error("more than one project manifest in {}: {}", .dir.display(), .candidates.join(", "))]
    Ambiguous { dir: PathBuf, candidates: Vec<String> },

    #[error("project manifest {} does not exist", .0.display())]
    MissingFile(PathBuf),
}

impl Project {
    fn from_manifest(manifest: PathBuf) -> Self {
        let root = manifest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { manifest, root }
    }
}

/// Locate the project.
///
/// - `--project <file>`: use that manifest directly.
/// - `--project <dir>`: search the directory; zero manifests or more than one
///   is an error (the candidates are listed so the user can pick one).
/// - no `--project`: walk up from `cwd` looking for `devloop.toml`.
pub fn discover(project_arg: Option<&Path>, cwd: &Path) -> Result<Project, ProjectError> {
    match project_arg {
        Some(path) if path.is_dir() => search_directory(path),
        Some(path) => {
            if path.is_file() {
                Ok(Project::from_manifest(path.to_path_buf()))
            } else {
                Err(ProjectError::MissingFile(path.to_path_buf()))
            }
        }
        None => walk_ancestors(cwd),
    }
}

/// Search one directory for manifest candidates.
fn search_directory(dir: &Path) -> Result<Project, ProjectError> {
    let mut candidates = Vec::new();

    let entries = fs::read_dir(dir).map_err(|_| ProjectError::NoneInDirectory(dir.to_path_buf()))?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name == MANIFEST_NAME || name.ends_with(MANIFEST_SUFFIX) {
            candidates.push(name.to_string());
        }
    }
    candidates.sort();

    match candidates.len() {
        0 => Err(ProjectError::NoneInDirectory(dir.to_path_buf())),
        1 => Ok(Project::from_manifest(dir.join(&candidates[0]))),
        _ => Err(ProjectError::Ambiguous {
            dir: dir.to_path_buf(),
            candidates,
        }),
    }
}

/// Walk up from `start` until a `devloop.toml` appears.
fn walk_ancestors(start: &Path) -> Result<Project, ProjectError> {
    for dir in start.ancestors() {
        let manifest = dir.join(MANIFEST_NAME);
        if manifest.is_file() {
            return Ok(Project::from_manifest(manifest));
        }
    }
    Err(ProjectError::NotFound(start.to_path_buf()))
}
