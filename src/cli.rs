//! Command-line surface. The process has three mutually exclusive
//! roles (spec.md §4.9): driver (default), receiver/receive-check
//! (`-receive`), and `-loadFile`. The teacher binary takes no flags at
//! all (one env var); `clap`'s derive API is enrichment for the
//! multi-role shape this tool actually needs.

use crate::limits::OptionalLimits;
use crate::timestamp::Timestamp;
use clap::Parser;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "incrbtrfs", about = "Incremental btrfs snapshot replication")]
pub struct Cli {
    /// Act as a receiver (or, with --check, a receive-check) peer
    /// instead of the default driver role.
    #[arg(long)]
    pub receive: bool,

    /// With --receive, emit `{Version, Timestamps}` JSON on stdout
    /// instead of receiving a stream.
    #[arg(long)]
    pub check: bool,

    /// Destination snapshot store root (receiver, receive-check, and
    /// loadFile roles).
    #[arg(long)]
    pub destination: Option<PathBuf>,

    /// Timestamp to receive under (receiver role).
    #[arg(long)]
    pub timestamp: Option<String>,

    /// Load a previously captured send stream from a file instead of
    /// receiving one over stdin.
    #[arg(long = "loadFile")]
    pub load_file: Option<PathBuf>,

    /// Pin the received or loaded snapshot.
    #[arg(long)]
    pub pin: bool,

    #[arg(long)]
    pub hourly: Option<u32>,
    #[arg(long)]
    pub daily: Option<u32>,
    #[arg(long)]
    pub weekly: Option<u32>,
    #[arg(long)]
    pub monthly: Option<u32>,

    /// Disable Snappy framing on both sides of a receive.
    #[arg(long = "noCompression")]
    pub no_compression: bool,

    #[arg(long, conflicts_with_all = ["verbose", "debug"])]
    pub quiet: bool,
    #[arg(long, conflicts_with_all = ["quiet", "debug"])]
    pub verbose: bool,
    #[arg(long, conflicts_with_all = ["quiet", "verbose"])]
    pub debug: bool,

    /// TOML configuration file (driver role only).
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    pub fn level_filter(self) -> log::LevelFilter {
        match self {
            Verbosity::Quiet => log::LevelFilter::Error,
            Verbosity::Normal => log::LevelFilter::Info,
            Verbosity::Verbose => log::LevelFilter::Debug,
            Verbosity::Debug => log::LevelFilter::Trace,
        }
    }
}

pub enum Role {
    Driver {
        config: PathBuf,
    },
    Receiver {
        destination: PathBuf,
        timestamp: Timestamp,
        limits: OptionalLimits,
        no_compression: bool,
    },
    ReceiveCheck {
        destination: PathBuf,
    },
    LoadFile {
        file: PathBuf,
        destination: PathBuf,
        pin: bool,
        limits: OptionalLimits,
    },
}

impl Cli {
    pub fn verbosity(&self) -> Verbosity {
        if self.debug {
            Verbosity::Debug
        } else if self.verbose {
            Verbosity::Verbose
        } else if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }

    fn limits(&self) -> OptionalLimits {
        OptionalLimits {
            hourly: self.hourly,
            daily: self.daily,
            weekly: self.weekly,
            monthly: self.monthly,
        }
    }

    pub fn resolve_role(&self) -> anyhow::Result<Role> {
        if self.receive {
            let destination = self
                .destination
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--receive requires --destination"))?;

            if self.check {
                return Ok(Role::ReceiveCheck { destination });
            }

            let timestamp = self
                .timestamp
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("--receive requires --timestamp"))?;

            Ok(Role::Receiver {
                destination,
                timestamp: Timestamp::from_str(timestamp)?,
                limits: self.limits(),
                no_compression: self.no_compression,
            })
        } else if let Some(file) = &self.load_file {
            let destination = self
                .destination
                .clone()
                .ok_or_else(|| anyhow::anyhow!("--loadFile requires --destination"))?;

            Ok(Role::LoadFile {
                file: file.clone(),
                destination,
                pin: self.pin,
                limits: self.limits(),
            })
        } else {
            let config = self
                .config
                .clone()
                .ok_or_else(|| anyhow::anyhow!("driver role requires a configuration file path"))?;

            Ok(Role::Driver { config })
        }
    }
}
