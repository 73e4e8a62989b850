//! Talks to a peer `incrbtrfs` binary over `ssh`: timestamp enumeration
//! via the receive-check JSON protocol, and streamed receives.

use crate::error::{IncrError, Result};
use crate::limits::Limits;
use crate::pipeline::{oneshot, EventReceiver};
use crate::timestamp::Timestamp;
use serde::Deserialize;
use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::thread;

/// Current wire protocol version. Exchanged in the receive-check JSON;
/// a mismatch is fatal and is never retried.
pub const PROTOCOL_VERSION: u32 = 3;

#[derive(Debug, Clone)]
pub struct RemoteStore {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub exec: String,
    pub directory: String,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(rename = "Version")]
    version: u32,
    #[serde(rename = "Timestamps")]
    timestamps: Vec<String>,
}

/// The two one-shot signals produced by `RemoteStore::receive`, mirroring
/// a local `ReceivePipeline`.
pub struct RemoteReceive {
    pub started: EventReceiver,
    pub done: EventReceiver,
}

impl RemoteStore {
    /// `host == ""` denotes a local destination; callers must use
    /// `SnapshotStore` directly rather than calling into this type.
    pub fn is_local(&self) -> bool {
        self.host.is_empty()
    }

    fn ssh(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg("-C") // transport compression, on by default for remote pipelines
            .arg(format!("{}@{}", self.user, self.host))
            .arg(remote_command);
        cmd
    }

    /// Runs `<exec> -receive -check -destination <dir>` and parses its
    /// stdout as `{"Version": int, "Timestamps": [string, ...]}`.
    /// Fails on malformed JSON, and with `VersionMismatch` if the
    /// reported version differs from ours. Unparseable timestamps in
    /// the response are dropped rather than failing the call.
    pub fn get_timestamps(&self) -> Result<Vec<Timestamp>> {
        debug_assert!(!self.is_local(), "get_timestamps called on a local RemoteStore");

        let remote_command = format!("{} -receive -check -destination {}", self.exec, self.directory);
        let output = self
            .ssh(&remote_command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(IncrError::Io)?;

        if !output.status.success() {
            return Err(IncrError::Fsctl {
                command: remote_command,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let response: CheckResponse = serde_json::from_slice(&output.stdout)?;

        if response.version != PROTOCOL_VERSION {
            return Err(IncrError::VersionMismatch {
                local: PROTOCOL_VERSION,
                remote: response.version,
            });
        }

        Ok(response
            .timestamps
            .iter()
            .filter_map(|s| Timestamp::from_str(s).ok())
            .collect())
    }

    /// Runs `<exec> -receive -destination <dir> -timestamp <ts> [limit
    /// flags] [-noCompression]` with `input` piped to its stdin, and
    /// forwards the remote process's stdout/stderr to local stderr.
    pub fn receive<R>(&self, ts: &Timestamp, limits: Option<&Limits>, no_compression: bool, mut input: R) -> RemoteReceive
    where
        R: Read + Send + 'static,
    {
        let (started_tx, started_rx) = oneshot();
        let (done_tx, done_rx) = oneshot();

        let mut remote_command = format!(
            "{} -receive -destination {} -timestamp {}",
            self.exec, self.directory, ts
        );
        if let Some(limits) = limits {
            if limits.hourly > 0 {
                remote_command.push_str(&format!(" -hourly {}", limits.hourly));
            }
            if limits.daily > 0 {
                remote_command.push_str(&format!(" -daily {}", limits.daily));
            }
            if limits.weekly > 0 {
                remote_command.push_str(&format!(" -weekly {}", limits.weekly));
            }
            if limits.monthly > 0 {
                remote_command.push_str(&format!(" -monthly {}", limits.monthly));
            }
        }
        if no_compression {
            remote_command.push_str(" -noCompression");
        }

        let mut cmd = self.ssh(&remote_command);
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

        match cmd.spawn() {
            Ok(mut child) => {
                let mut stdin = child.stdin.take();
                let stdout = child.stdout.take();
                let stderr = child.stderr.take();
                started_tx.send(Ok(())).ok();

                let stdout_forwarder = stdout.map(|mut out| {
                    thread::spawn(move || {
                        let _ = io::copy(&mut out, &mut io::stderr());
                    })
                });
                let stderr_forwarder = stderr.map(|mut err| {
                    thread::spawn(move || {
                        let _ = io::copy(&mut err, &mut io::stderr());
                    })
                });

                thread::spawn(move || {
                    if let Some(stdin) = stdin.as_mut() {
                        let _ = io::copy(&mut input, stdin);
                    }
                    drop(stdin);

                    if let Some(h) = stdout_forwarder {
                        let _ = h.join();
                    }
                    if let Some(h) = stderr_forwarder {
                        let _ = h.join();
                    }

                    let result = match child.wait() {
                        Ok(status) if status.success() => Ok(()),
                        Ok(status) => Err(IncrError::Fsctl {
                            command: remote_command,
                            stderr: format!("exit {:?}", status.code()),
                        }),
                        Err(e) => Err(IncrError::Io(e)),
                    };
                    done_tx.send(result).ok();
                });
            }
            Err(e) => {
                let stderr = e.to_string();
                started_tx.send(Err(IncrError::Io(e))).ok();
                done_tx
                    .send(Err(IncrError::Fsctl {
                        command: remote_command,
                        stderr,
                    }))
                    .ok();
            }
        }

        RemoteReceive {
            started: started_rx,
            done: done_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_response_parses_version_and_timestamps() {
        let json = r#"{"Version":3,"Timestamps":["20240101_000000","not-a-timestamp"]}"#;
        let response: CheckResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.version, 3);
        assert_eq!(response.timestamps.len(), 2);
    }

    #[test]
    fn ssh_command_includes_port_and_compression() {
        let store = RemoteStore {
            host: "backup.example.com".into(),
            port: 2222,
            user: "incr".into(),
            exec: "incrbtrfs".into(),
            directory: "/backups/host".into(),
        };

        let cmd = store.ssh("incrbtrfs -receive -check -destination /backups/host");
        let args: Vec<String> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();

        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"-C".to_string()));
        assert!(args.contains(&"incr@backup.example.com".to_string()));
    }
}
