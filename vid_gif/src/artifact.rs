//! Transient pipeline files
//!
//! Every file the pipeline writes lives in a per-session scratch directory
//! and is tracked so it can be removed on teardown. Deletion is idempotent:
//! removing a file that was never written or is already gone succeeds.

use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// What a file is for; also names the stage that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactRole {
    /// Raw bytes of the current upload.
    Upload,
    /// Whole clip with orientation normalized.
    OrientedPreview,
    /// Selected range with orientation normalized.
    TrimmedNormalized,
    /// Final animated image.
    GifOutput,
}

impl ArtifactRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactRole::Upload => "upload",
            ArtifactRole::OrientedPreview => "oriented-preview",
            ArtifactRole::TrimmedNormalized => "trimmed-normalized",
            ArtifactRole::GifOutput => "gif-output",
        }
    }
}

impl fmt::Display for ArtifactRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finished, fully written pipeline file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineArtifact {
    pub path: PathBuf,
    pub role: ArtifactRole,
}

impl PipelineArtifact {
    pub fn new(path: impl Into<PathBuf>, role: ArtifactRole) -> Self {
        Self {
            path: path.into(),
            role,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Delete the file. Safe to call more than once.
    pub fn discard(&self) {
        if let Err(e) = remove_if_exists(&self.path) {
            warn!(
                path = %self.path.display(),
                role = %self.role,
                error = %e,
                "Failed to remove artifact"
            );
        }
    }
}

/// Remove `path`; a missing file is not an error. Returns whether a file
/// was actually deleted.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// `dir/name.partial.ext` for `dir/name.ext`: where an encoder writes until
/// the output has been checked.
pub fn partial_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}.partial.{}", stem, ext.to_string_lossy()),
        None => format!("{}.partial", stem),
    };
    path.with_file_name(name)
}

/// Scratch directory plus the list of paths handed out from it.
///
/// Dropping the store deletes the directory with everything in it.
#[derive(Debug)]
pub struct ArtifactStore {
    dir: TempDir,
    allocated: Vec<PathBuf>,
    counter: u64,
}

impl ArtifactStore {
    /// Create a scratch directory under `parent` (system temp dir when `None`).
    pub fn new(parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("vid_gif-");
        let dir = match parent {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        debug!(dir = %dir.path().display(), "Created artifact directory");
        Ok(Self {
            dir,
            allocated: Vec::new(),
            counter: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Reserve a fresh path for a file of `role`. Nothing is created on disk.
    pub fn allocate(&mut self, role: ArtifactRole, extension: &str) -> PathBuf {
        self.counter += 1;
        let path = self
            .dir
            .path()
            .join(format!("{}-{}.{}", role.as_str(), self.counter, extension));
        self.allocated.push(path.clone());
        path
    }

    /// Number of paths handed out and not yet released.
    pub fn tracked(&self) -> usize {
        self.allocated.len()
    }

    /// Delete one allocated path (and its partial sibling).
    pub fn release(&mut self, path: &Path) {
        remove_quietly(path);
        remove_quietly(&partial_path_for(path));
        self.allocated.retain(|p| p != path);
    }

    /// Delete every allocated path. Idempotent.
    pub fn purge(&mut self) {
        let count = self.allocated.len();
        for path in self.allocated.drain(..) {
            remove_quietly(&path);
            remove_quietly(&partial_path_for(&path));
        }
        if count > 0 {
            debug!(count, dir = %self.dir.path().display(), "Purged artifacts");
        }
    }
}

impl Drop for ArtifactStore {
    fn drop(&mut self) {
        self.purge();
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = remove_if_exists(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove artifact");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path_for(Path::new("/tmp/s/trimmed-normalized-2.mp4")),
            PathBuf::from("/tmp/s/trimmed-normalized-2.partial.mp4")
        );
        assert_eq!(
            partial_path_for(Path::new("/tmp/s/out")),
            PathBuf::from("/tmp/s/out.partial")
        );
    }

    #[test]
    fn test_remove_if_exists_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.gif");
        fs::write(&path, b"GIF89a").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&dir.path().join("never.gif")).unwrap());
    }

    #[test]
    fn test_allocate_is_unique_and_named_by_role() {
        let mut store = ArtifactStore::new(None).unwrap();
        let a = store.allocate(ArtifactRole::TrimmedNormalized, "mp4");
        let b = store.allocate(ArtifactRole::TrimmedNormalized, "mp4");
        assert_ne!(a, b);
        assert!(a.starts_with(store.dir()));
        assert!(a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("trimmed-normalized-"));
        assert_eq!(store.tracked(), 2);
    }

    #[test]
    fn test_purge_removes_outputs_and_partials() {
        let mut store = ArtifactStore::new(None).unwrap();
        let gif = store.allocate(ArtifactRole::GifOutput, "gif");
        let clip = store.allocate(ArtifactRole::OrientedPreview, "mp4");
        fs::write(&gif, b"GIF89a").unwrap();
        fs::write(partial_path_for(&clip), b"half").unwrap();

        store.purge();
        assert!(!gif.exists());
        assert!(!partial_path_for(&clip).exists());
        assert_eq!(store.tracked(), 0);
        store.purge();
    }

    #[test]
    fn test_release_single_path() {
        let mut store = ArtifactStore::new(None).unwrap();
        let keep = store.allocate(ArtifactRole::Upload, "mov");
        let drop = store.allocate(ArtifactRole::GifOutput, "gif");
        fs::write(&keep, b"x").unwrap();
        fs::write(&drop, b"y").unwrap();
        store.release(&drop);
        assert!(keep.exists());
        assert!(!drop.exists());
        assert_eq!(store.tracked(), 1);
    }

    #[test]
    fn test_drop_removes_directory() {
        let dir;
        {
            let mut store = ArtifactStore::new(None).unwrap();
            let path = store.allocate(ArtifactRole::Upload, "mp4");
            fs::write(&path, b"bytes").unwrap();
            dir = store.dir().to_path_buf();
        }
        assert!(!dir.exists());
    }

    #[test]
    fn test_discard_artifact_twice() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = PipelineArtifact::new(dir.path().join("x.gif"), ArtifactRole::GifOutput);
        fs::write(&artifact.path, b"GIF89a").unwrap();
        assert_eq!(artifact.size_bytes(), 6);
        artifact.discard();
        artifact.discard();
        assert!(!artifact.path.exists());
    }

    #[test]
    fn test_store_in_custom_parent() {
        let parent = tempfile::tempdir().unwrap();
        let nested = parent.path().join("work");
        let store = ArtifactStore::new(Some(&nested)).unwrap();
        assert!(store.dir().starts_with(&nested));
    }
}
