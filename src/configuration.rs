//! TOML configuration file: the nested table structure from spec.md
//! §6, plus the hierarchical `Limits` merge and the subvolume/store
//! objects the rest of the crate operates on.

use crate::command::Context;
use crate::error::{IncrError, Result};
use crate::limits::{Limits, OptionalLimits};
use crate::replicator::Destination;
use crate::store::SnapshotStore;
use crate::subvolume::Subvolume;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub user_local: Option<String>,
    #[serde(rename = "snapshot", default)]
    pub snapshots: Vec<SnapshotEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Defaults {
    #[serde(default)]
    pub limits: OptionalLimits,
    #[serde(default)]
    pub remote: RemoteDefaults,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoteDefaults {
    #[serde(default)]
    pub limits: OptionalLimits,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotEntry {
    pub directory: String,
    pub destination: Option<String>,
    #[serde(default)]
    pub limits: OptionalLimits,
    #[serde(default)]
    pub pin: bool,
    #[serde(default)]
    pub archive: bool,
    #[serde(default)]
    pub no_compression: bool,
    #[serde(default)]
    pub remote: Vec<RemoteEntry>,
}

#[derive(Debug, Deserialize)]
pub struct RemoteEntry {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub exec: String,
    pub directory: String,
    #[serde(default)]
    pub limits: OptionalLimits,
}

fn default_port() -> u16 {
    22
}

const DEFAULT_DESTINATION_SUBDIR: &str = ".incrbtrfs";

impl Configuration {
    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| IncrError::Config(format!("reading {}: {}", path.display(), e)))?;
        let config: Configuration = toml::from_str(&text)
            .map_err(|e| IncrError::Config(format!("parsing {}: {}", path.display(), e)))?;
        config.check_unique_destinations()?;
        Ok(config)
    }

    fn check_unique_destinations(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for snapshot in &self.snapshots {
            let destination = snapshot
                .destination
                .clone()
                .unwrap_or_else(|| default_destination(&snapshot.directory));
            if !seen.insert(destination.clone()) {
                return Err(IncrError::Config(format!(
                    "duplicate destination root: {}",
                    destination
                )));
            }
            for remote in &snapshot.remote {
                let key = format!("{}:{}", remote.host, remote.directory);
                if !seen.insert(key.clone()) {
                    return Err(IncrError::Config(format!(
                        "duplicate destination root: {}",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolves this configuration into the runtime `Subvolume`
    /// objects the driver role iterates over.
    pub fn into_subvolumes(self) -> Vec<Subvolume> {
        let local_defaults = Limits::default().merge(&[&self.defaults.limits]);
        let remote_defaults = local_defaults.merge(&[&self.defaults.remote.limits]);
        let local_user = self.user_local.unwrap_or_else(|| "root".to_string());
        let local_context = Context::Local { user: local_user };

        self.snapshots
            .into_iter()
            .map(|entry| {
                let destination_root = entry
                    .destination
                    .clone()
                    .unwrap_or_else(|| default_destination(&entry.directory));
                let own_limits = local_defaults.merge(&[&entry.limits]);
                let pin = entry.pin;
                let archive = entry.archive;
                let no_compression = entry.no_compression;

                let destinations = entry
                    .remote
                    .iter()
                    .map(|remote| {
                        let limits = remote_defaults.merge(&[&entry.limits, &remote.limits]);
                        if remote.host.is_empty() {
                            Destination::Local {
                                store: SnapshotStore::new(remote.directory.clone(), local_context.clone()),
                                limits,
                            }
                        } else {
                            Destination::Remote {
                                store: crate::remote::RemoteStore {
                                    host: remote.host.clone(),
                                    port: remote.port,
                                    user: remote.user.clone(),
                                    exec: remote.exec.clone(),
                                    directory: remote.directory.clone(),
                                },
                                limits,
                            }
                        }
                    })
                    .collect();

                Subvolume {
                    source_dir: PathBuf::from(&entry.directory),
                    local_store: SnapshotStore::new(destination_root, local_context.clone()),
                    local_context: local_context.clone(),
                    limits: own_limits,
                    pin,
                    archive,
                    no_compression,
                    destinations,
                }
            })
            .collect()
    }
}

fn default_destination(directory: &str) -> String {
    Path::new(directory)
        .join(DEFAULT_DESTINATION_SUBDIR)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [[snapshot]]
            directory = "/src/data"
        "#;
        let config: Configuration = toml::from_str(toml).unwrap();
        assert_eq!(config.snapshots.len(), 1);
        assert_eq!(config.snapshots[0].directory, "/src/data");
        assert!(config.snapshots[0].destination.is_none());
    }

    #[test]
    fn default_destination_is_dotincrbtrfs_under_source() {
        assert_eq!(default_destination("/src/data"), "/src/data/.incrbtrfs");
    }

    #[test]
    fn resolves_hierarchical_limits() {
        let toml = r#"
            [defaults.limits]
            daily = 7

            [defaults.remote.limits]
            daily = 3

            [[snapshot]]
            directory = "/src/data"

            [[snapshot.remote]]
            host = ""
            directory = "/backup/data"
        "#;
        let config: Configuration = toml::from_str(toml).unwrap();
        let subvolumes = config.into_subvolumes();
        assert_eq!(subvolumes[0].limits.daily, 7);

        match &subvolumes[0].destinations[0] {
            Destination::Local { limits, .. } => assert_eq!(limits.daily, 3),
            Destination::Remote { .. } => panic!("expected a local destination"),
        }
    }

    #[test]
    fn rejects_duplicate_destination_roots() {
        let toml = r#"
            [[snapshot]]
            directory = "/src/a"
            destination = "/backup/shared"

            [[snapshot]]
            directory = "/src/b"
            destination = "/backup/shared"
        "#;
        let config: Configuration = toml::from_str(toml).unwrap();
        assert!(matches!(config.check_unique_destinations(), Err(IncrError::Config(_))));
    }
}
