//! Concurrent send/receive subprocess orchestration.
//!
//! Each subprocess is supervised by a background thread that reports
//! through two single-shot channels, `started` and `done`: `started`
//! carries the outcome of `exec` itself, `done` the subprocess's
//! terminal status. Neither channel is ever sent to twice.

pub mod receive;
pub mod send;

pub use receive::ReceivePipeline;
pub use send::SendPipeline;

use crate::error::{IncrError, Result};
use std::io::Read;
use std::process::Child;
use std::sync::mpsc;

pub type EventReceiver = mpsc::Receiver<Result<()>>;

pub(crate) fn oneshot() -> (mpsc::Sender<Result<()>>, EventReceiver) {
    mpsc::channel()
}

/// Drains `child`'s stderr, waits for exit, and maps a non-zero status
/// to `IncrError::Fsctl` carrying the captured text.
pub(crate) fn wait_for_exit(command: String, mut child: Child) -> Result<()> {
    let mut stderr_text = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut stderr_text);
    }

    let status = child.wait().map_err(IncrError::Io)?;

    if status.success() {
        Ok(())
    } else {
        Err(IncrError::Fsctl {
            command,
            stderr: stderr_text,
        })
    }
}

/// Sends SIGTERM to `pid`, falling back to SIGKILL if the process is
/// no longer reachable under SIGTERM (e.g. already exiting).
pub(crate) fn terminate(pid: u32) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pid as i32);
    if signal::kill(pid, Signal::SIGTERM).is_err() {
        let _ = signal::kill(pid, Signal::SIGKILL);
    }
}
