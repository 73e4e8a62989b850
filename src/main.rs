mod cli;
mod command;
mod configuration;
mod error;
mod interval;
mod limits;
mod lock;
mod pipeline;
mod remote;
mod replicator;
mod store;
mod subvolume;
mod timestamp;

use anyhow::{Context as _, Result};
use clap::Parser;
use cli::{Cli, Role};
use command::Context;
use configuration::Configuration;
use lock::DirLock;
use pipeline::ReceivePipeline;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use store::SnapshotStore;
use timestamp::Timestamp;

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbosity().level_filter())
        .init();

    if let Err(e) = run(&cli) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match cli.resolve_role()? {
        Role::Driver { config } => run_driver(&config),
        Role::Receiver {
            destination,
            timestamp,
            limits,
            no_compression,
        } => run_receiver(&destination, timestamp, &limits, no_compression),
        Role::ReceiveCheck { destination } => run_receive_check(&destination),
        Role::LoadFile {
            file,
            destination,
            pin,
            limits,
        } => run_load_file(&file, &destination, pin, &limits),
    }
}

/// Reads the config, iterates its subvolumes, and runs each one's
/// snapshot/replicate/clean-up workflow. Per-subvolume failures are
/// logged and do not stop later subvolumes, but they do cause a
/// non-zero overall exit (spec.md §7: "any subvolume error causes exit
/// 1 after all subvolumes have been attempted").
fn run_driver(config_path: &Path) -> Result<()> {
    let config = Configuration::read_from_file(config_path).context("loading configuration")?;
    let subvolumes = config.into_subvolumes();

    let mut any_failed = false;
    for mut subvolume in subvolumes {
        if let Err(e) = subvolume.run_snapshot() {
            log::error!(
                "subvolume {} failed: {:#}",
                subvolume.source_dir.display(),
                e
            );
            any_failed = true;
        }
    }

    anyhow::ensure!(!any_failed, "one or more subvolumes failed");
    Ok(())
}

/// Receiver role: lock the destination, run `ReceivePipeline` against
/// stdin, then `CleanUp` using whatever retention flags were forwarded
/// by the driver side.
fn run_receiver(
    destination: &Path,
    ts: Timestamp,
    limits: &limits::OptionalLimits,
    no_compression: bool,
) -> Result<()> {
    let _lock = DirLock::acquire(destination).context("locking destination store")?;
    let mut store = SnapshotStore::new(destination, Context::Local { user: "root".into() });

    let stdin = io::stdin();
    let effective_limits = limits::Limits::default().merge(&[limits]);

    if no_compression {
        receive_and_clean_up(&mut store, &ts, stdin.lock(), &effective_limits)?;
    } else {
        let decoder = snap::read::FrameDecoder::new(stdin.lock());
        receive_and_clean_up(&mut store, &ts, decoder, &effective_limits)?;
    }

    Ok(())
}

fn receive_and_clean_up<R>(store: &mut SnapshotStore, ts: &Timestamp, input: R, limits: &limits::Limits) -> Result<()>
where
    R: Read + Send + 'static,
{
    let receive = ReceivePipeline::spawn(store.root(), ts.clone(), Context::Local { user: "root".into() }, input);

    receive
        .started
        .recv()
        .map_err(|_| anyhow::anyhow!("receiver supervisor thread dropped before signalling started"))??;
    receive
        .done
        .recv()
        .map_err(|_| anyhow::anyhow!("receiver supervisor thread dropped before signalling done"))?
        .context("receive subprocess")?;

    let existing = store.list().context("listing destination timestamps")?;
    store.clean_up(ts, &existing, limits).context("cleaning up destination store")?;
    Ok(())
}

#[derive(Serialize)]
struct CheckResponse {
    #[serde(rename = "Version")]
    version: u32,
    #[serde(rename = "Timestamps")]
    timestamps: Vec<String>,
}

/// receive-check role: lock the destination (so the listing cannot be
/// mutated mid-check by a concurrent receiver) and emit the timestamp
/// list as JSON.
fn run_receive_check(destination: &Path) -> Result<()> {
    let _lock = DirLock::acquire(destination).context("locking destination store")?;
    let store = SnapshotStore::new(destination, Context::Local { user: "root".into() });
    let timestamps = store.list().context("listing destination timestamps")?;

    let response = CheckResponse {
        version: remote::PROTOCOL_VERSION,
        timestamps: timestamps.iter().map(|t| t.to_string()).collect(),
    };

    serde_json::to_writer(io::stdout(), &response).context("writing receive-check response")?;
    Ok(())
}

/// loadFile role: sniff the extension (`.snap` raw, `.snap.snpy`
/// compressed), feed the file into `ReceivePipeline`, and pin it if
/// requested.
fn run_load_file(file: &Path, destination: &Path, pin: bool, limits: &limits::OptionalLimits) -> Result<()> {
    let _lock = DirLock::acquire(destination).context("locking destination store")?;
    let mut store = SnapshotStore::new(destination, Context::Local { user: "root".into() });

    let ts = timestamp_from_filename(file)?;
    let handle = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let effective_limits = limits::Limits::default().merge(&[limits]);

    let is_compressed = file
        .to_str()
        .map(|name| name.ends_with(".snap.snpy"))
        .unwrap_or(false);

    if is_compressed {
        let decoder = snap::read::FrameDecoder::new(handle);
        receive_and_clean_up(&mut store, &ts, decoder, &effective_limits)?;
    } else {
        receive_and_clean_up(&mut store, &ts, handle, &effective_limits)?;
    }

    if pin {
        store.pin(&ts).context("pinning loaded snapshot")?;
    }

    Ok(())
}

fn timestamp_from_filename(file: &Path) -> Result<Timestamp> {
    let stem = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("non-utf8 file name: {}", file.display()))?;
    let stem = stem
        .strip_suffix(".snap.snpy")
        .or_else(|| stem.strip_suffix(".snap"))
        .unwrap_or(stem);

    stem.parse::<Timestamp>()
        .with_context(|| format!("{} does not encode a valid timestamp", file.display()))
}
