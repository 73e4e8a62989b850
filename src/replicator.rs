//! Wires a `SendPipeline` to a receiver — either a local
//! `ReceivePipeline` or a `RemoteStore` — selecting an incremental
//! parent and tearing both sides down together on failure.

use crate::command::Context;
use crate::error::IncrError;
use crate::limits::Limits;
use crate::lock::DirLock;
use crate::pipeline::{self, EventReceiver, ReceivePipeline, SendPipeline};
use crate::remote::RemoteStore;
use crate::store::SnapshotStore;
use crate::timestamp::{calc_parent, Timestamp};
use anyhow::{Context as _, Result};
use std::fs::File;
use std::io::{self, Write};
use std::sync::mpsc;
use std::thread;

/// Where a replicated snapshot goes: a separately-rooted local store
/// (`host == ""` in configuration) or a true network peer.
pub enum Destination {
    Local { store: SnapshotStore, limits: Limits },
    Remote { store: RemoteStore, limits: Limits },
}

/// Replicates `ts` — already present at `local.snapshot_path(ts)` — to
/// `destination`. Selects an incremental parent from the destination's
/// existing timestamps and `local_timestamps`; falls back to a full
/// send if none is shared.
pub fn replicate(
    local: &SnapshotStore,
    local_context: &Context,
    local_timestamps: &[Timestamp],
    ts: &Timestamp,
    destination: &mut Destination,
    no_compression: bool,
) -> Result<()> {
    match destination {
        Destination::Local { store, limits } => {
            replicate_local(local, local_context, local_timestamps, ts, store, *limits)
        }
        Destination::Remote { store, limits } => {
            replicate_remote(local, local_context, local_timestamps, ts, store, *limits, no_compression)
        }
    }
}

fn replicate_local(
    local: &SnapshotStore,
    local_context: &Context,
    local_timestamps: &[Timestamp],
    ts: &Timestamp,
    dest_store: &mut SnapshotStore,
    limits: Limits,
) -> Result<()> {
    let _lock = DirLock::acquire(dest_store.root()).context("locking destination store")?;
    let remote_timestamps = dest_store.list().context("listing destination timestamps")?;
    let parent = calc_parent(local_timestamps, &remote_timestamps);

    let snapshot_path = local.snapshot_path(ts);
    let parent_path = parent.as_ref().map(|p| local.snapshot_path(p));

    let send = SendPipeline::spawn(&snapshot_path, parent_path.as_deref(), local_context);
    let (read_end, write_end) = os_pipe().context("creating replication pipe")?;

    let dest_root = dest_store.root().to_path_buf();
    let receive = ReceivePipeline::spawn(&dest_root, ts.clone(), local_context.clone(), read_end);

    run_pipeline(send, receive.started, receive.done, write_end)?;

    let existing = dest_store.list().context("listing destination timestamps after receive")?;
    dest_store
        .clean_up(ts, &existing, &limits)
        .context("cleaning up destination store")?;

    Ok(())
}

fn replicate_remote(
    local: &SnapshotStore,
    local_context: &Context,
    local_timestamps: &[Timestamp],
    ts: &Timestamp,
    remote: &RemoteStore,
    limits: Limits,
    no_compression: bool,
) -> Result<()> {
    anyhow::ensure!(!remote.is_local(), "replicate_remote called with host == \"\"");

    let remote_timestamps = remote.get_timestamps().context("checking remote timestamps")?;
    let parent = calc_parent(local_timestamps, &remote_timestamps);

    let snapshot_path = local.snapshot_path(ts);
    let parent_path = parent.as_ref().map(|p| local.snapshot_path(p));

    let send = SendPipeline::spawn(&snapshot_path, parent_path.as_deref(), local_context);
    let (read_end, write_end) = os_pipe().context("creating replication pipe")?;

    if no_compression {
        let receive = remote.receive(ts, Some(&limits), true, read_end);
        run_pipeline(send, receive.started, receive.done, write_end)
    } else {
        // compress into the pipe locally; the peer decompresses on its
        // end (see `run_receiver` in main.rs), so the wire carries the
        // Snappy-framed bytes, not raw send-stream bytes.
        let receive = remote.receive(ts, Some(&limits), false, read_end);
        let compressor = snap::write::FrameEncoder::new(write_end);
        run_pipeline(send, receive.started, receive.done, compressor)
    }
}

enum Side {
    Sender,
    Receiver,
}

/// Awaits both `started` signals, pumps the sender's stdout into
/// `write_end` (closing it once the sender is done so the receiver
/// sees EOF), and awaits both `done` signals per the ordering and
/// cancellation rules: the winning side of the `done` race determines
/// whether the loser is torn down with a termination signal or simply
/// drained after seeing a closed pipe.
fn run_pipeline<W>(send: SendPipeline, receiver_started: EventReceiver, receiver_done: EventReceiver, write_end: W) -> Result<()>
where
    W: Write + Send + 'static,
{
    let send_started = send
        .started
        .recv()
        .map_err(|_| anyhow::anyhow!("sender supervisor thread dropped before signalling started"))?;
    let recv_started = receiver_started
        .recv()
        .map_err(|_| anyhow::anyhow!("receiver supervisor thread dropped before signalling started"))?;

    if send_started.is_err() || recv_started.is_err() {
        log::debug!("replication: a side failed to start, tearing down the other");
        send.signal();
        drop(write_end);
        let _ = send.done.recv();
        let _ = receiver_done.recv();
        send_started?;
        recv_started?;
        unreachable!("one of send_started/recv_started was Err above");
    }

    log::trace!("replication: both sides started");

    // captured before `stdout`/`done` are moved out below, since a
    // partially-moved `send` can no longer be borrowed as a whole (the
    // `send.signal()` calls further down only need the pid).
    let send_pid = send.pid();
    let stdout = send.stdout;
    let pump = thread::spawn(move || -> io::Result<()> {
        let mut write_end = write_end;
        if let Some(mut out) = stdout {
            io::copy(&mut out, &mut write_end)?;
        }
        Ok(())
    });

    let (tx, rx) = mpsc::channel::<(Side, crate::error::Result<()>)>();
    {
        let tx = tx.clone();
        let send_done = send.done;
        thread::spawn(move || {
            if let Ok(result) = send_done.recv() {
                let _ = tx.send((Side::Sender, result));
            }
        });
    }
    {
        thread::spawn(move || {
            if let Ok(result) = receiver_done.recv() {
                let _ = tx.send((Side::Receiver, result));
            }
        });
    }

    let (first_side, first_result) = rx
        .recv()
        .map_err(|_| anyhow::anyhow!("both sender and receiver done channels dropped without reporting"))?;

    match (first_side, first_result) {
        (Side::Receiver, Err(e)) => {
            // receiver failed before the sender finished: tear the sender down
            log::debug!("replication: receiver done (failed) first, signalling sender");
            if let Some(pid) = send_pid {
                pipeline::terminate(pid);
            }
            let _ = pump.join();
            let _ = rx.recv(); // drain sender's done
            Err(e.into())
        }
        (Side::Sender, Err(e)) => {
            // sender failed: dropping write_end (pump thread exit) closes the
            // pipe, the receiver observes EOF and should terminate on its own
            log::debug!("replication: sender done (failed) first, closing pipe");
            let _ = pump.join();
            let _ = rx.recv(); // drain receiver's done
            Err(e.into())
        }
        (Side::Sender, Ok(())) => {
            log::trace!("replication: sender done (ok) first, awaiting receiver");
            let _ = pump.join();
            let (_, second) = rx
                .recv()
                .map_err(|_| anyhow::anyhow!("receiver done channel dropped without reporting"))?;
            second.map_err(Into::into)
        }
        (Side::Receiver, Ok(())) => {
            log::trace!("replication: receiver done (ok) first, awaiting sender");
            let _ = pump.join();
            let (_, second) = rx
                .recv()
                .map_err(|_| anyhow::anyhow!("sender done channel dropped without reporting"))?;
            second.map_err(Into::into)
        }
    }
}

/// A real OS pipe shared between the sender and receiver threads,
/// standing in for the spec's "in-process pipe": a blocking
/// `Read`/`Write` pair independent of either subprocess's own stdio.
fn os_pipe() -> std::result::Result<(File, File), IncrError> {
    let (read_fd, write_fd) = nix::unistd::pipe()
        .map_err(|e| IncrError::Stream(format!("failed to create replication pipe: {}", e)))?;
    Ok((File::from(read_fd), File::from(write_fd)))
}
