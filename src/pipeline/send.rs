//! Spawns `FSCTL send` and exposes its stdout as a byte stream for a
//! downstream consumer (the in-process pipe wired by `Replicator`).

use super::{oneshot, terminate, wait_for_exit, EventReceiver};
use crate::command::{self, Context};
use crate::error::IncrError;
use std::path::Path;
use std::process::ChildStdout;
use std::thread;

pub struct SendPipeline {
    pub started: EventReceiver,
    pub done: EventReceiver,
    /// `None` only if the subprocess failed to exec; check `started`.
    pub stdout: Option<ChildStdout>,
    pid: Option<u32>,
}

impl SendPipeline {
    /// `FSCTL send <path>` for a full send, or `FSCTL send -p <parent>
    /// <path>` for an incremental send against `parent`.
    pub fn spawn(path: &Path, parent: Option<&Path>, context: &Context) -> Self {
        let (started_tx, started_rx) = oneshot();
        let (done_tx, done_rx) = oneshot();

        let mut command_line = String::from("sudo btrfs send");
        if let Some(parent) = parent {
            command_line.push_str(&format!(" -p \"{}\"", parent.display()));
        }
        command_line.push_str(&format!(" \"{}\"", path.display()));

        match command::spawn_piped(&command_line, context) {
            Ok(mut child) => {
                let stdout = child.stdout.take();
                let pid = child.id();
                started_tx.send(Ok(())).ok();

                thread::spawn(move || {
                    let result = wait_for_exit(command_line, child);
                    done_tx.send(result).ok();
                });

                SendPipeline {
                    started: started_rx,
                    done: done_rx,
                    stdout,
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

                SendPipeline {
                    started: started_rx,
                    done: done_rx,
                    stdout: None,
                    pid: None,
                }
            }
        }
    }

    /// Forwards a termination signal to the subprocess; used to tear
    /// the sender down once the receiver has already failed.
    pub fn signal(&self) {
        if let Some(pid) = self.pid {
            terminate(pid);
        }
    }

    /// The subprocess pid, if it was spawned successfully. Callers that
    /// need to signal the sender after partially consuming `stdout`/
    /// `done` (which borrowing `&self` would then forbid) should capture
    /// this up front instead of holding on to `self`.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}
