// src/fs/mock.rs

use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEntry {
    File(Vec<u8>),
    Dir,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<PathBuf, MockEntry>,
    fail_read_dir: HashSet<PathBuf>,
    fail_rename: HashSet<PathBuf>,
    fail_remove: HashSet<PathBuf>,
    symlinks: HashSet<PathBuf>,
}

/// In-memory filesystem with failure injection.
///
/// Paths are stored verbatim, so tests should use absolute paths.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<State>>,
}

impl MockFileSystem {
    pub fn new() -> Self {
        let fs = Self::default();
        fs.state
            .lock()
            .unwrap()
            .entries
            .insert(PathBuf::from("/"), MockEntry::Dir);
        fs
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let path = path.as_ref();
        let mut state = self.state.lock().unwrap();
        if let Some(parent) = path.parent() {
            ensure_dirs(&mut state.entries, parent);
        }
        state
            .entries
            .insert(path.to_path_buf(), MockEntry::File(content.into()));
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut state = self.state.lock().unwrap();
        ensure_dirs(&mut state.entries, path.as_ref());
    }

    /// Add `path` as a symlink that resolves to a directory.
    pub fn add_dir_symlink(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut state = self.state.lock().unwrap();
        ensure_dirs(&mut state.entries, path);
        state.symlinks.insert(path.to_path_buf());
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.state.lock().unwrap().entries.contains_key(path.as_ref())
    }

    pub fn entry(&self, path: impl AsRef<Path>) -> Option<MockEntry> {
        self.state.lock().unwrap().entries.get(path.as_ref()).cloned()
    }

    /// Make `read_dir(path)` fail until cleared.
    pub fn fail_read_dir(&self, path: impl AsRef<Path>, fail: bool) {
        toggle(&mut self.state.lock().unwrap().fail_read_dir, path.as_ref(), fail);
    }

    /// Make `rename(path, _)` fail until cleared.
    pub fn fail_rename(&self, path: impl AsRef<Path>, fail: bool) {
        toggle(&mut self.state.lock().unwrap().fail_rename, path.as_ref(), fail);
    }

    /// Make `remove_file(path)` fail until cleared.
    pub fn fail_remove(&self, path: impl AsRef<Path>, fail: bool) {
        toggle(&mut self.state.lock().unwrap().fail_remove, path.as_ref(), fail);
    }
}

fn toggle(set: &mut HashSet<PathBuf>, path: &Path, on: bool) {
    if on {
        set.insert(path.to_path_buf());
    } else {
        set.remove(path);
    }
}

fn ensure_dirs(entries: &mut BTreeMap<PathBuf, MockEntry>, path: &Path) {
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            continue;
        }
        entries
            .entry(ancestor.to_path_buf())
            .or_insert(MockEntry::Dir);
    }
}

impl FileSystem for MockFileSystem {
    fn is_dir(&self, path: &Path) -> bool {
        matches!(
            self.state.lock().unwrap().entries.get(path),
            Some(MockEntry::Dir)
        )
    }

    fn is_symlink(&self, path: &Path) -> bool {
        self.state.lock().unwrap().symlinks.contains(path)
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let state = self.state.lock().unwrap();
        if state.fail_read_dir.contains(path) {
            return Err(anyhow!("Permission denied: {:?}", path));
        }
        match state.entries.get(path) {
            Some(MockEntry::Dir) => Ok(state
                .entries
                .keys()
                .filter(|p| p.parent() == Some(path) && p.as_path() != path)
                .cloned()
                .collect()),
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(MockEntry::File(_)) = state.entries.get(path) {
            return Err(anyhow!("File exists: {:?}", path));
        }
        ensure_dirs(&mut state.entries, path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_rename.contains(from) {
            return Err(anyhow!("Operation not permitted: {:?}", from));
        }
        if !state.entries.contains_key(from) {
            return Err(anyhow!("File not found: {:?}", from));
        }
        if let Some(parent) = to.parent() {
            if !matches!(state.entries.get(parent), Some(MockEntry::Dir)) {
                return Err(anyhow!("Parent directory not found: {:?}", parent));
            }
        }

        let moved: Vec<PathBuf> = state
            .entries
            .keys()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(entry) = state.entries.remove(&old) {
                let rest = old.strip_prefix(from).unwrap_or(Path::new(""));
                let new = if rest.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(rest)
                };
                state.entries.insert(new, entry);
            }
        }
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_remove.contains(path) {
            return Err(anyhow!("Permission denied: {:?}", path));
        }
        match state.entries.get(path) {
            Some(MockEntry::File(_)) => {
                state.entries.remove(path);
                Ok(())
            }
            Some(MockEntry::Dir) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }
}
