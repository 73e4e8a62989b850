//! Spawns `FSCTL receive <root>/timestamp`, copying bytes from a
//! caller-supplied stream into its stdin.

use super::{oneshot, terminate, wait_for_exit, EventReceiver};
use crate::command::{self, Context};
use crate::error::IncrError;
use crate::timestamp::Timestamp;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::thread;

pub struct ReceivePipeline {
    pub started: EventReceiver,
    pub done: EventReceiver,
    pid: Option<u32>,
}

impl ReceivePipeline {
    /// Creates `<root>/timestamp` if absent, spawns the receiver, and
    /// copies bytes from `input` into its stdin on a background
    /// thread. `input` is never closed here — the caller owns it.
    ///
    /// On a non-zero exit, `<root>/timestamp/<ts>` is deleted on a
    /// best-effort basis (logged, never overriding the primary error)
    /// before `done` fires.
    pub fn spawn<R>(root: &Path, ts: Timestamp, context: Context, mut input: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let (started_tx, started_rx) = oneshot();
        let (done_tx, done_rx) = oneshot();

        let timestamp_dir = root.join("timestamp");
        if let Err(e) = fs::create_dir_all(&timestamp_dir) {
            started_tx.send(Err(IncrError::Io(e))).ok();
            done_tx.send(Err(IncrError::Cancelled)).ok();
            return ReceivePipeline {
                started: started_rx,
                done: done_rx,
                pid: None,
            };
        }

        let command_line = format!("sudo btrfs receive \"{}\"", timestamp_dir.display());
        let snapshot_path = timestamp_dir.join(ts.as_str());

        match command::spawn_piped(&command_line, &context) {
            Ok(mut child) => {
                let mut stdin = child.stdin.take();
                let pid = child.id();
                log::trace!("receive: command started, pid {}", pid);
                started_tx.send(Ok(())).ok();

                thread::spawn(move || {
                    if let Some(stdin) = stdin.as_mut() {
                        // a broken pipe here just means the child exited
                        // early; wait_for_exit below surfaces the real error.
                        let _ = io::copy(&mut input, stdin);
                    }
                    drop(stdin);
                    log::trace!("receive: input stream exhausted, awaiting subprocess exit");

                    let result = wait_for_exit(command_line, child);
                    if result.is_err() && snapshot_path.is_dir() {
                        log::debug!("receive failed, deleting partial snapshot {}", snapshot_path.display());
                        delete_partial(&snapshot_path, &context);
                    }
                    log::trace!("receive: done signal ready, ok={}", result.is_ok());
                    done_tx.send(result).ok();
                });

                ReceivePipeline {
                    started: started_rx,
                    done: done_rx,
                    pid: Some(pid),
                }
            }
            Err(e) => {
                let stderr = e.to_string();
                started_tx.send(Err(e)).ok();
                done_tx
                    .send(Err(IncrError::Fsctl {
                        command: command_line,
                        stderr,
                    }))
                    .ok();

                ReceivePipeline {
                    started: started_rx,
                    done: done_rx,
                    pid: None,
                }
            }
        }
    }

    /// Forwards a termination signal to the subprocess.
    pub fn signal(&self) {
        if let Some(pid) = self.pid {
            terminate(pid);
        }
    }
}

fn delete_partial(path: &Path, context: &Context) {
    let command_line = format!("sudo btrfs subvolume delete \"{}\"", path.display());
    match command::spawn_piped(&command_line, context) {
        Ok(mut child) => {
            child.stdin.take();
            match child.wait() {
                Ok(status) if status.success() => {}
                Ok(status) => log::warn!(
                    "failed to delete partial snapshot {}: exit {:?}",
                    path.display(),
                    status.code()
                ),
                Err(e) => log::warn!("failed to delete partial snapshot {}: {}", path.display(), e),
            }
        }
        Err(e) => log::warn!("failed to delete partial snapshot {}: {}", path.display(), e),
    }
}
