//! Filesystem tree rooted at a directory: listing, pinning, marking
//! success, deleting, and retention ("clean up") of snapshots.
//!
//! Layout, per spec.md §3:
//!
//! ```text
//! <root>/timestamp/<TS>/        canonical snapshot subvolumes
//! <root>/hourly/<i>              relative symlink into ../timestamp/<TS>
//! <root>/daily/<i>
//! <root>/weekly/<i>
//! <root>/monthly/<i>
//! <root>/pinned/<TS>             retained indefinitely
//! <root>/archive/<TS>.snap[.snpy]
//! <root>/success/<TS>            optional, informational only
//! ```

use crate::command::{Command, CommandSystem, Context};
use crate::error::{IncrError, Result};
use crate::interval::{self, Interval};
use crate::limits::Limits;
use crate::timestamp::Timestamp;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[cfg(test)]
mod tests;

pub struct SnapshotStore {
    root: PathBuf,
    context: Context,
    command: Box<dyn Command>,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>, context: Context) -> Self {
        Self::with_command(root, context, Box::new(CommandSystem {}))
    }

    pub fn with_command(root: impl Into<PathBuf>, context: Context, command: Box<dyn Command>) -> Self {
        SnapshotStore {
            root: root.into(),
            context,
            command,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn timestamp_dir(&self) -> PathBuf {
        self.root.join("timestamp")
    }

    pub fn snapshot_path(&self, ts: &Timestamp) -> PathBuf {
        self.timestamp_dir().join(ts.as_str())
    }

    fn bucket_dir(&self, interval: Interval) -> PathBuf {
        self.root.join(interval.name())
    }

    fn pinned_dir(&self) -> PathBuf {
        self.root.join("pinned")
    }

    fn success_dir(&self) -> PathBuf {
        self.root.join("success")
    }

    /// Enumerate `timestamp/`, silently skipping entries that are not
    /// directories or do not parse as a `Timestamp`. Creates
    /// `timestamp/` if missing. Never fails on an unparseable name.
    pub fn list(&self) -> Result<Vec<Timestamp>> {
        let dir = self.timestamp_dir();
        fs::create_dir_all(&dir)?;

        let mut timestamps = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue,
            };
            if let Ok(ts) = Timestamp::from_str(name) {
                timestamps.push(ts);
            }
        }
        timestamps.sort();
        Ok(timestamps)
    }

    /// Create `pinned/<TS> -> ../timestamp/<TS>`. Idempotent: an
    /// existing symlink already pointing at the same target is not an
    /// error; a symlink pointing elsewhere fails with `AlreadyExists`.
    pub fn pin(&mut self, ts: &Timestamp) -> Result<()> {
        create_idempotent_symlink(&self.pinned_dir(), ts)
    }

    /// Create `success/<TS> -> ../timestamp/<TS>`.
    pub fn mark_success(&mut self, ts: &Timestamp) -> Result<()> {
        create_idempotent_symlink(&self.success_dir(), ts)
    }

    /// Set of timestamps named under `pinned/`, regardless of whether
    /// their link target still exists (spec.md §9 open question (a):
    /// `success/` is informational only, never a pin; this function
    /// only inspects `pinned/`).
    fn pinned_set(&self) -> Result<HashSet<Timestamp>> {
        let dir = self.pinned_dir();
        if !dir.is_dir() {
            return Ok(HashSet::new());
        }

        let mut pinned = HashSet::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(name) = name.to_str() {
                if let Ok(ts) = Timestamp::from_str(name) {
                    pinned.insert(ts);
                }
            }
        }
        Ok(pinned)
    }

    /// Invoke FSCTL subvolume-snapshot `-r <source> timestamp/<TS>`,
    /// creating `timestamp/` first if it does not yet exist.
    pub fn create_snapshot(&mut self, source: &Path, ts: &Timestamp) -> Result<()> {
        let dir = self.timestamp_dir();
        fs::create_dir_all(&dir)?;
        let dest = self.snapshot_path(ts);

        let source_str = source.to_str().ok_or_else(|| IncrError::Fsctl {
            command: "btrfs subvolume snapshot".into(),
            stderr: format!("non-utf8 path: {}", source.display()),
        })?;
        let dest_str = dest.to_str().ok_or_else(|| IncrError::Fsctl {
            command: "btrfs subvolume snapshot".into(),
            stderr: format!("non-utf8 path: {}", dest.display()),
        })?;

        self.command
            .run(
                &format!("sudo btrfs subvolume snapshot -r \"{}\" \"{}\"", source_str, dest_str),
                &self.context,
            )
            .map(|_| ())
    }

    /// Invoke FSCTL subvolume-delete on `timestamp/<TS>`.
    pub fn delete(&mut self, ts: &Timestamp) -> Result<()> {
        let path = self.snapshot_path(ts);
        let path_str = path.to_str().ok_or_else(|| {
            IncrError::Fsctl {
                command: "btrfs subvolume delete".into(),
                stderr: format!("non-utf8 path: {}", path.display()),
            }
        })?;

        self.command
            .run(
                &format!("sudo btrfs subvolume delete \"{}\"", path_str),
                &self.context,
            )
            .map(|_| ())
    }

    /// Best-effort delete used for cleaning up partial snapshots; logs
    /// rather than propagates on failure.
    pub fn delete_best_effort(&mut self, ts: &Timestamp) {
        if let Err(e) = self.delete(ts) {
            log::warn!("failed to delete partial snapshot {}: {}", ts, e);
        }
    }

    /// The retention algorithm (spec.md §4.2). Rebuilds every bucket
    /// symlink forest from scratch each run so correctness cannot drift
    /// (older implementations that only added links without first
    /// clearing stray targets are a documented mistake, see spec.md §9).
    ///
    /// Aborts on the first delete failure, returning the partial
    /// surviving set computed so far.
    pub fn clean_up(&mut self, now: &Timestamp, existing: &[Timestamp], limits: &Limits) -> Result<Vec<Timestamp>> {
        let now_dt = now.to_datetime()?;

        let mut keep: HashSet<Timestamp> = HashSet::new();
        keep.insert(now.clone());
        keep.extend(self.pinned_set()?);

        let mut sorted_existing = existing.to_vec();
        sorted_existing.sort();

        for interval in interval::ALL {
            let dir = self.bucket_dir(interval);
            fs::create_dir_all(&dir)?;
            remove_symlinks(&dir)?;

            let cap = interval.cap(limits) as i64;
            let mut picks: HashMap<i64, Timestamp> = HashMap::new();

            for ts in &sorted_existing {
                let t = match ts.to_datetime() {
                    Ok(t) => t,
                    Err(_) => continue,
                };
                let idx = interval.index(now_dt, t);
                if idx < 0 || idx >= cap {
                    continue;
                }
                // ascending iteration + unconditional overwrite: the
                // lexicographically largest (newest) timestamp in this
                // index class is visited last and survives.
                picks.insert(idx, ts.clone());
            }

            for (idx, ts) in &picks {
                keep.insert(ts.clone());
                let src = PathBuf::from("..").join("timestamp").join(ts.as_str());
                symlink(&src, dir.join(idx.to_string()))?;
            }
        }

        let mut survivors = Vec::new();
        for ts in &sorted_existing {
            if keep.contains(ts) {
                survivors.push(ts.clone());
            } else {
                self.delete(ts)?;
            }
        }

        survivors.sort();
        Ok(survivors)
    }
}

fn create_idempotent_symlink(dir: &Path, ts: &Timestamp) -> Result<()> {
    fs::create_dir_all(dir)?;
    let dst = dir.join(ts.as_str());
    let src = PathBuf::from("..").join("timestamp").join(ts.as_str());

    match fs::read_link(&dst) {
        Ok(existing_target) if existing_target == src => Ok(()),
        Ok(_) => Err(IncrError::AlreadyExists(dst.display().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            symlink(&src, &dst)?;
            Ok(())
        }
        Err(e) => Err(IncrError::Io(e)),
    }
}

fn remove_symlinks(dir: &Path) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_symlink() {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
