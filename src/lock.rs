//! Scoped exclusive advisory lock on a directory.
//!
//! Mirrors `examples/original_source/lock.go`'s `DirLock`: open (or
//! create) the directory, take a non-blocking `flock(2)` exclusive lock
//! on the directory's file descriptor, and release it (explicitly, or
//! implicitly when the process exits and the descriptor is closed).

use crate::error::{IncrError, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Create `dir` if absent and acquire a non-blocking exclusive lock
    /// on it. Fails with `IncrError::AlreadyLocked` if another process
    /// (or another `DirLock` in this process) already holds it.
    pub fn acquire(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let file = File::open(dir)?;

        file.try_lock_exclusive().map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                IncrError::AlreadyLocked(dir.display().to_string())
            } else {
                IncrError::Lock(format!("failed to acquire lock for {}: {}", dir.display(), e))
            }
        })?;

        Ok(DirLock {
            file,
            path: dir.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Explicitly release the lock. Also released on drop / process
    /// exit, so callers rarely need to call this directly.
    pub fn release(self) -> Result<()> {
        fs2::FileExt::unlock(&self.file)
            .map_err(|e| IncrError::Lock(format!("failed to unlock {}: {}", self.path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_creates_missing_directory() {
        let base = tempdir().unwrap();
        let target = base.path().join("nested").join("snapshots");

        let lock = DirLock::acquire(&target).unwrap();
        assert!(target.is_dir());
        lock.release().unwrap();
    }

    #[test]
    fn second_acquire_in_same_process_fails() {
        let base = tempdir().unwrap();
        let dir = base.path().join("store");
        fs::create_dir_all(&dir).unwrap();

        let first = DirLock::acquire(&dir).unwrap();
        let second = DirLock::acquire(&dir);

        assert!(matches!(second, Err(IncrError::AlreadyLocked(_))));
        first.release().unwrap();

        // now that the first lock has been released, a new one succeeds
        DirLock::acquire(&dir).unwrap();
    }
}
