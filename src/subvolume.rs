//! Top-level per-subvolume workflow: snapshot, optional pin/archive,
//! replicate to every configured destination, then clean up.

use crate::command::Context;
use crate::error::IncrError;
use crate::limits::Limits;
use crate::lock::DirLock;
use crate::pipeline::SendPipeline;
use crate::replicator::{self, Destination};
use crate::store::SnapshotStore;
use crate::timestamp::Timestamp;
use anyhow::{Context as _, Result};
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;

/// One source subvolume: where to read it from, its own snapshot
/// store, and the set of places it replicates to.
pub struct Subvolume {
    pub source_dir: PathBuf,
    pub local_store: SnapshotStore,
    pub local_context: Context,
    pub limits: Limits,
    pub pin: bool,
    pub archive: bool,
    pub no_compression: bool,
    pub destinations: Vec<Destination>,
}

impl Subvolume {
    /// Runs the full per-subvolume workflow described in the module
    /// doc comment. Per-destination replication errors are logged and
    /// do not abort the run; a failure to snapshot, archive, or clean
    /// up the local store does.
    pub fn run_snapshot(&mut self) -> Result<()> {
        let _lock = DirLock::acquire(self.local_store.root()).context("locking local snapshot store")?;

        log::info!(
            "subvolume {}: destination {}, limits {}, {} remote(s), pin={}, archive={}",
            self.source_dir.display(),
            self.local_store.root().display(),
            self.limits,
            self.destinations.len(),
            self.pin,
            self.archive
        );

        let ts = Timestamp::now();

        if let Err(e) = self.local_store.create_snapshot(&self.source_dir, &ts) {
            self.local_store.delete_best_effort(&ts);
            return Err(e).context("creating local snapshot");
        }

        self.local_store
            .mark_success(&ts)
            .context("marking snapshot as successful")?;

        if self.pin || self.archive {
            self.local_store.pin(&ts).context("pinning new snapshot")?;
        }

        if self.archive {
            if let Err(e) = self.write_archive(&ts) {
                return Err(e).context("archiving new snapshot");
            }
        }

        let timestamps = self.local_store.list().context("listing local timestamps")?;

        for destination in &mut self.destinations {
            let result = replicator::replicate(
                &self.local_store,
                &self.local_context,
                &timestamps,
                &ts,
                destination,
                self.no_compression,
            );
            if let Err(e) = result {
                log::error!("replication to a destination failed: {:#}", e);
            }
        }

        self.local_store
            .clean_up(&ts, &timestamps, &self.limits)
            .context("cleaning up local store")?;

        Ok(())
    }

    /// Full send of `ts` into `archive/<ts>.snap[.snpy]`. On failure,
    /// the partial archive file is removed before the error is
    /// returned.
    fn write_archive(&mut self, ts: &Timestamp) -> Result<()> {
        let archive_dir = self.local_store.root().join("archive");
        fs::create_dir_all(&archive_dir).context("creating archive directory")?;

        let extension = if self.no_compression { "snap" } else { "snap.snpy" };
        let archive_path = archive_dir.join(format!("{}.{}", ts, extension));

        let result = self.send_to_archive_file(ts, &archive_path);
        if result.is_err() {
            let _ = fs::remove_file(&archive_path);
        }
        result
    }

    fn send_to_archive_file(&self, ts: &Timestamp, archive_path: &std::path::Path) -> Result<()> {
        let snapshot_path = self.local_store.snapshot_path(ts);
        let send = SendPipeline::spawn(&snapshot_path, None, &self.local_context);

        send.started
            .recv()
            .map_err(|_| anyhow::anyhow!("archive sender supervisor thread dropped before signalling started"))??;

        let file = File::create(archive_path).context("creating archive file")?;

        let mut stdout = send
            .stdout
            .ok_or_else(|| anyhow::anyhow!("archive sender produced no stdout despite a successful start"))?;

        let copy_result: io::Result<()> = if self.no_compression {
            let mut file = file;
            io::copy(&mut stdout, &mut file).map(|_| ())
        } else {
            let mut encoder = snap::write::FrameEncoder::new(file);
            let copied = io::copy(&mut stdout, &mut encoder).map(|_| ());
            copied.and_then(|_| encoder.into_inner().map(|_| ()).map_err(|e| e.into_error()))
        };
        copy_result.context("streaming archive send output to file")?;

        let done: std::result::Result<(), IncrError> = send
            .done
            .recv()
            .map_err(|_| anyhow::anyhow!("archive sender supervisor thread dropped before signalling done"))?;
        done.context("archive send subprocess")?;

        Ok(())
    }
}
