//! Scratch storage for the rendered report.
//!
//! One directory per collector instance, named with a fresh UUID under the
//! scratch root. Created lazily on first write, removed exactly once on
//! cleanup. Writes and purges are serialized, and a purged directory is
//! never written to again.

use crate::result::{BoxError, CollectorError, CollectorResult};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Filesystem capability used by [`ScratchStore`]
pub trait FileSystem: Send + Sync {
    /// Check if a directory exists
    fn dir_exists(&self, path: &Path) -> bool;

    /// Create a directory and its parents
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Write a file, replacing any previous content
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Remove a directory and everything below it
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct OsFileSystem;

impl FileSystem for OsFileSystem {
    fn dir_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        std::fs::write(path, contents)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir_all(path)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    dirs: BTreeSet<PathBuf>,
    files: BTreeMap<PathBuf, Vec<u8>>,
    locked: BTreeSet<PathBuf>,
    removals: usize,
}

/// In-memory filesystem for tests and dry runs.
///
/// Directories can be [`lock`](Self::lock)ed to make removal fail the way a
/// file held open by another process would.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    state: Mutex<MemoryState>,
}

impl MemoryFileSystem {
    /// Create an empty filesystem
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read a file back
    #[must_use]
    pub fn read(&self, path: &Path) -> Option<Vec<u8>> {
        self.state().files.get(path).cloned()
    }

    /// Check if a file exists
    #[must_use]
    pub fn file_exists(&self, path: &Path) -> bool {
        self.state().files.contains_key(path)
    }

    /// Number of files currently stored
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.state().files.len()
    }

    /// Number of successful directory removals
    #[must_use]
    pub fn removal_count(&self) -> usize {
        self.state().removals
    }

    /// Make removal of `path` fail until [`unlock`](Self::unlock)ed
    pub fn lock(&self, path: &Path) {
        let _ = self.state().locked.insert(path.to_path_buf());
    }

    /// Allow removal of `path` again
    pub fn unlock(&self, path: &Path) {
        let _ = self.state().locked.remove(path);
    }
}

impl FileSystem for MemoryFileSystem {
    fn dir_exists(&self, path: &Path) -> bool {
        self.state().dirs.contains(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            let _ = state.dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        let parent = path.parent().unwrap_or_else(|| Path::new(""));
        if !state.dirs.contains(parent) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {}", parent.display()),
            ));
        }
        let _ = state.files.insert(path.to_path_buf(), contents.to_vec());
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut state = self.state();
        if !state.dirs.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {}", path.display()),
            ));
        }
        if state.locked.iter().any(|locked| locked.starts_with(path)) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "the process cannot access the file because it is being used by another process",
            ));
        }
        state.dirs.retain(|dir| !dir.starts_with(path));
        state.files.retain(|file, _| !file.starts_with(path));
        state.removals += 1;
        Ok(())
    }
}

/// Per-run scratch directory location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScratchDirectory {
    path: PathBuf,
}

impl ScratchDirectory {
    /// A fresh, uniquely named directory under `root`. Nothing is created
    /// on disk until the first write.
    #[must_use]
    pub fn new_under(root: &Path) -> Self {
        Self {
            path: root.join(Uuid::new_v4().to_string()),
        }
    }

    /// Use an explicit path
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Directory path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Writes the report into scratch storage and removes it afterwards
pub struct ScratchStore {
    fs: Arc<dyn FileSystem>,
    purged: Mutex<HashSet<PathBuf>>,
}

impl fmt::Debug for ScratchStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScratchStore")
            .field("purged", &self.purged_guard().len())
            .finish_non_exhaustive()
    }
}

impl Default for ScratchStore {
    fn default() -> Self {
        Self::new(Arc::new(OsFileSystem))
    }
}

impl ScratchStore {
    /// Create a store over the given filesystem
    #[must_use]
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            purged: Mutex::new(HashSet::new()),
        }
    }

    fn purged_guard(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.purged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write `bytes` to `directory/file_name`, creating the directory if
    /// needed, and return the full path.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Persist`] if the file name is empty, the
    /// directory was already purged, or the filesystem fails
    pub fn write(&self, directory: &Path, file_name: &str, bytes: &[u8]) -> CollectorResult<PathBuf> {
        let persist_error = |source: BoxError| CollectorError::Persist {
            file_name: file_name.to_string(),
            directory: directory.to_path_buf(),
            source,
        };

        if file_name.trim().is_empty() {
            return Err(persist_error("report file name is empty".into()));
        }

        let path = {
            let purged = self.purged_guard();
            if purged.contains(directory) {
                return Err(persist_error("scratch directory has already been purged".into()));
            }

            if !self.fs.dir_exists(directory) {
                self.fs
                    .create_dir_all(directory)
                    .map_err(|e| persist_error(Box::new(e)))?;
            }

            let path = directory.join(file_name);
            self.fs
                .write(&path, bytes)
                .map_err(|e| persist_error(Box::new(e)))?;
            path
        };

        debug!(path = %path.display(), bytes = bytes.len(), "report written to scratch directory");
        Ok(path)
    }

    /// Recursively delete `directory`. A directory that doesn't exist is a
    /// no-op, so purging twice is fine. Once purged, the directory refuses
    /// further writes.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::Cleanup`] if deletion fails
    pub fn purge(&self, directory: &Path) -> CollectorResult<()> {
        let removed = {
            let mut purged = self.purged_guard();
            let _ = purged.insert(directory.to_path_buf());

            if self.fs.dir_exists(directory) {
                self.fs
                    .remove_dir_all(directory)
                    .map_err(|e| CollectorError::Cleanup {
                        directory: directory.to_path_buf(),
                        source: Box::new(e),
                    })?;
                true
            } else {
                false
            }
        };

        if removed {
            debug!(directory = %directory.display(), "scratch directory purged");
        } else {
            debug!(directory = %directory.display(), "scratch directory absent, nothing to purge");
        }
        Ok(())
    }

    /// Check if `directory` has been purged through this store
    #[must_use]
    pub fn is_purged(&self, directory: &Path) -> bool {
        self.purged_guard().contains(directory)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn memory_store() -> (Arc<MemoryFileSystem>, ScratchStore) {
        let fs = Arc::new(MemoryFileSystem::new());
        let store = ScratchStore::new(fs.clone());
        (fs, store)
    }

    mod write_tests {
        use super::*;

        #[test]
        fn test_write_creates_directory_and_file() {
            let (fs, store) = memory_store();
            let dir = Path::new("/tmp/run");

            let path = store.write(dir, "coverage.cobertura.xml", b"<coverage/>").unwrap();

            assert_eq!(path, dir.join("coverage.cobertura.xml"));
            assert!(fs.dir_exists(dir));
            assert_eq!(fs.read(&path).unwrap(), b"<coverage/>");
        }

        #[test]
        fn test_write_overwrites() {
            let (fs, store) = memory_store();
            let dir = Path::new("/tmp/run");
            let _ = store.write(dir, "report.json", b"first").unwrap();
            let path = store.write(dir, "report.json", b"second").unwrap();
            assert_eq!(fs.read(&path).unwrap(), b"second");
            assert_eq!(fs.file_count(), 1);
        }

        #[test]
        fn test_empty_file_name_is_persist_error() {
            let (_, store) = memory_store();
            let err = store.write(Path::new("/tmp/run"), "", b"x").unwrap_err();
            assert_eq!(
                err.to_string(),
                "Failed to save coverage report '' in directory '/tmp/run'"
            );
        }

        #[test]
        fn test_write_after_purge_is_refused() {
            let (fs, store) = memory_store();
            let dir = Path::new("/tmp/run");
            store.purge(dir).unwrap();

            let err = store.write(dir, "report.json", b"late").unwrap_err();
            assert!(matches!(err, CollectorError::Persist { .. }));
            assert_eq!(fs.file_count(), 0);
        }
    }

    mod purge_tests {
        use super::*;

        #[test]
        fn test_purge_removes_directory() {
            let (fs, store) = memory_store();
            let dir = Path::new("/tmp/run");
            let path = store.write(dir, "report.json", b"{}").unwrap();

            store.purge(dir).unwrap();

            assert!(!fs.dir_exists(dir));
            assert!(!fs.file_exists(&path));
            assert!(store.is_purged(dir));
        }

        #[test]
        fn test_purge_missing_directory_is_noop() {
            let (fs, store) = memory_store();
            store.purge(Path::new("/tmp/never-created")).unwrap();
            assert_eq!(fs.removal_count(), 0);
        }

        #[test]
        fn test_purge_twice_is_noop() {
            let (fs, store) = memory_store();
            let dir = Path::new("/tmp/run");
            let _ = store.write(dir, "report.json", b"{}").unwrap();
            store.purge(dir).unwrap();
            store.purge(dir).unwrap();
            assert_eq!(fs.removal_count(), 1);
        }

        #[test]
        fn test_locked_directory_is_cleanup_error() {
            let (fs, store) = memory_store();
            let dir = Path::new("/tmp/run");
            let _ = store.write(dir, "report.json", b"{}").unwrap();
            fs.lock(dir);

            let err = store.purge(dir).unwrap_err();
            assert!(matches!(err, CollectorError::Cleanup { .. }));
            assert!(err
                .to_report_string()
                .starts_with("Failed to cleanup report directory: '/tmp/run' ---> "));

            fs.unlock(dir);
            store.purge(dir).unwrap();
            assert!(!fs.dir_exists(dir));
        }
    }

    mod os_tests {
        use super::*;

        #[test]
        fn test_os_round_trip_and_purge() {
            let root = tempfile::tempdir().unwrap();
            let scratch = ScratchDirectory::new_under(root.path());
            let store = ScratchStore::default();

            assert!(!scratch.path().exists());
            let path = store.write(scratch.path(), "coverage.json", b"payload").unwrap();
            assert_eq!(std::fs::read(&path).unwrap(), b"payload");

            store.purge(scratch.path()).unwrap();
            assert!(!scratch.path().exists());
            store.purge(scratch.path()).unwrap();
        }

        #[test]
        fn test_scratch_directories_are_unique() {
            let root = Path::new("/tmp");
            assert_ne!(ScratchDirectory::new_under(root), ScratchDirectory::new_under(root));
        }
    }
}
