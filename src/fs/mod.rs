// src/fs/mod.rs

//! Filesystem seam used by the pipeline.
//!
//! The detector walks the source tree, the dropper moves content and deletes
//! descriptors, and the status reporter rewrites its file, all through
//! [`FileSystem`]. Production uses [`RealFileSystem`]; tests can swap in
//! [`mock::MockFileSystem`] to inject failures.

use std::fmt::Debug;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};

pub mod mock;

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    /// Whether `path` is a directory, following symlinks.
    fn is_dir(&self, path: &Path) -> bool;

    /// Whether `path` itself is a symlink (not followed).
    fn is_symlink(&self, path: &Path) -> bool;

    /// Return a list of entries in a directory.
    /// Returns full paths.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Move `from` to `to`. Both files and directory trees are accepted.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Create or truncate `path` and write `contents` to it.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_symlink(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink())
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading dir {:?}", path))? {
            let entry = entry.with_context(|| format!("reading entry of {:?}", path))?;
            entries.push(entry.path());
        }
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("creating dir {:?}", path))
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).with_context(|| format!("moving {:?} to {:?}", from, to))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).with_context(|| format!("removing file {:?}", path))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        fs::write(path, contents).with_context(|| format!("writing file {:?}", path))
    }
}

/// Recursively collect every non-directory path below `root`.
///
/// The first error aborts the walk; callers treat that as "try again later".
/// Entries are visited in sorted order so detection order is stable.
/// Symlinked directories are not descended into, so each file is reported
/// under one path only.
pub fn collect_files(fs: &dyn FileSystem, root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = fs.read_dir(&dir)?;
        entries.sort();
        // Reverse so that popping keeps subdirectories in sorted order.
        for entry in entries.into_iter().rev() {
            if fs.is_dir(&entry) {
                if fs.is_symlink(&entry) {
                    continue;
                }
                stack.push(entry);
            } else {
                files.push(entry);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Whether `path` has the descriptor extension `ext` (compared
/// case-insensitively, without the leading dot).
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext.trim_start_matches('.')))
}

/// First component of a relative or absolute path.
///
/// - `"a/b/c.txt"` -> `"a"`
/// - `"/a/b/c.txt"` -> `"/"`
/// - `"../a/b"` -> `".."`
/// - `"a.txt"` -> `"a.txt"`
///
/// Leading `.` components are skipped; an empty path yields an empty path.
pub fn topmost_path(path: &Path) -> PathBuf {
    for component in path.components() {
        match component {
            Component::CurDir => continue,
            Component::Prefix(prefix) => return PathBuf::from(prefix.as_os_str()),
            Component::RootDir => return PathBuf::from(Component::RootDir.as_os_str()),
            Component::ParentDir => return PathBuf::from(".."),
            Component::Normal(name) => return PathBuf::from(name),
        }
    }
    PathBuf::new()
}
