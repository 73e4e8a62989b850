//! Local/remote command execution.
//!
//! `Context::Local` runs a command as the given user via `sudo`;
//! `Context::Remote` runs it over `ssh`. Every FSCTL invocation in this
//! crate (subvolume list/show/snapshot/delete, `btrfs send`/`receive`)
//! goes through this abstraction so it can be replaced with
//! [`CommandMock`] in tests.

use crate::error::{IncrError, Result};
use std::process;

#[cfg(test)]
mod tests;

pub trait Command {
    /// Runs a command in the provided context, returning captured stdout.
    fn run(&mut self, command: &str, context: &Context) -> Result<String>;

    /// Runs several commands, piping stdout of one into stdin of the
    /// next; returns the stdout of the last command.
    fn run_piped(&mut self, commands: &[(&str, &Context)]) -> Result<String>;
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Context {
    /// Run locally as `user` via `sudo -nu <user> bash -c "<command>"`.
    Local { user: String },
    /// Run on `host` over `ssh -i <identity> <user>@<host> "<command>"`.
    Remote {
        host: String,
        user: String,
        identity: String,
    },
}

fn build_command(command: &str, context: &Context) -> process::Command {
    match context {
        Context::Local { user } => {
            let mut com = process::Command::new("sudo");
            com.arg("-nu").arg(user).arg("bash").arg("-c").arg(command);
            com
        }
        Context::Remote {
            host,
            user,
            identity,
        } => {
            let mut com = process::Command::new("ssh");
            com.arg("-i")
                .arg(identity)
                .arg(format!("{}@{}", user, host))
                .arg(command);
            com
        }
    }
}

/// Spawn `command` in `context` with stdin, stdout and stderr all
/// piped, without waiting for it. Used by [`crate::pipeline`] to stream
/// bytes through a running `FSCTL send`/`receive` rather than buffering
/// a full captured output.
pub fn spawn_piped(command: &str, context: &Context) -> Result<process::Child> {
    log::debug!("spawning: {} ({:?})", command, context);
    build_command(command, context)
        .stdin(process::Stdio::piped())
        .stdout(process::Stdio::piped())
        .stderr(process::Stdio::piped())
        .spawn()
        .map_err(IncrError::Io)
}

pub struct CommandSystem {}

impl CommandSystem {
    fn spawn(
        &mut self,
        command: &str,
        context: &Context,
        pre: Option<&mut process::Child>,
    ) -> Result<process::Child> {
        let mut com = build_command(command, context);

        if let Some(child) = pre {
            let stdout = child.stdout.take().ok_or_else(|| {
                IncrError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "preceding command produced no stdout",
                ))
            })?;
            com.stdin(stdout);
        }

        com.stdout(process::Stdio::piped())
            .stderr(process::Stdio::piped())
            .spawn()
            .map_err(IncrError::Io)
    }
}

impl Command for CommandSystem {
    fn run(&mut self, command: &str, context: &Context) -> Result<String> {
        log::debug!("running: {} ({:?})", command, context);
        self.run_piped(&[(command, context)])
    }

    fn run_piped(&mut self, commands: &[(&str, &Context)]) -> Result<String> {
        let mut child: Option<process::Child> = None;

        for (command, context) in commands {
            child = Some(match child {
                Some(mut c) => self.spawn(command, context, Some(&mut c))?,
                None => self.spawn(command, context, None)?,
            });
        }

        let output = child
            .ok_or_else(|| IncrError::Fsctl {
                command: "<empty pipeline>".into(),
                stderr: String::new(),
            })?
            .wait_with_output()
            .map_err(IncrError::Io)?;

        check_output(&commands.last().map(|(c, _)| c.to_string()).unwrap_or_default(), &output)
    }
}

pub struct CommandMock {
    pub commands: Vec<(String, Context)>,
    pub responses: Vec<Result<String>>,
}

impl Command for CommandMock {
    fn run(&mut self, command: &str, context: &Context) -> Result<String> {
        if self.commands.is_empty() {
            return Err(IncrError::Fsctl {
                command: command.to_string(),
                stderr: "no more commands expected by mock".into(),
            });
        }
        let (command_expected, context_expected) = self.commands.remove(0);

        assert_eq!(command, command_expected);
        assert_eq!(*context, context_expected);

        self.responses.remove(0)
    }

    fn run_piped(&mut self, commands: &[(&str, &Context)]) -> Result<String> {
        let mut last = None;
        for (command, context) in commands {
            last = Some(self.run(command, context)?);
        }
        last.ok_or_else(|| IncrError::Fsctl {
            command: "<empty pipeline>".into(),
            stderr: "no output found".into(),
        })
    }
}

fn check_output(command: &str, output: &process::Output) -> Result<String> {
    match output.status.code() {
        Some(0) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
        Some(code) => Err(IncrError::Fsctl {
            command: command.to_string(),
            stderr: format!(
                "exit status {}: {}",
                code,
                String::from_utf8_lossy(&output.stderr)
            ),
        }),
        None => Err(IncrError::Fsctl {
            command: command.to_string(),
            stderr: "terminated by signal".into(),
        }),
    }
}
