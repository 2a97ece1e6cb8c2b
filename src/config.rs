use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::handlers::MacAddress;
use crate::hw::{DEFAULT_PROBE_TIMEOUT, DeviceDirectory, SessionSettings};

const CONFIG_FILE: &str = "config.json";

/// Errors returned while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file `{path}`")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Settings read from `summit/config.json` in the platform config directory.
///
/// Every section is optional; missing values fall back to their defaults.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SummitConfig {
    pub session: SessionSettings,
    pub probe: ProbeConfig,
    pub capture: CaptureConfig,
    pub datalog: DatalogConfig,
    pub topology: Topology,
}

/// Prune-pass settings.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    #[serde(with = "crate::utils::humantime_duration")]
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub enabled: bool,
    pub directory: Option<PathBuf>,
}

impl CaptureConfig {
    /// Directory to capture into, when capture is on.
    #[must_use]
    pub fn active_directory(&self) -> Option<&Path> {
        self.enabled.then_some(self.directory.as_deref()).flatten()
    }
}

/// Where command records are appended as JSON lines.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatalogConfig {
    pub path: Option<PathBuf>,
}

/// MACs the bench is expected to hold.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct Topology {
    pub master_mac: Option<MacAddress>,
    pub slave_macs: Vec<MacAddress>,
}

/// Differences between the expected and the discovered topology.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TopologyReport {
    /// Expected master MAC and the one found, when they differ.
    pub master_mismatch: Option<(MacAddress, Option<MacAddress>)>,
    pub missing: Vec<MacAddress>,
    pub unexpected: Vec<MacAddress>,
}

impl TopologyReport {
    #[must_use]
    pub fn is_match(&self) -> bool {
        self.master_mismatch.is_none() && self.missing.is_empty() && self.unexpected.is_empty()
    }
}

impl Topology {
    /// Compares the expected MACs with what was discovered.
    ///
    /// Only configured parts are checked: with no `master_mac` the master is
    /// not compared, and with no `slave_macs` the directory is not.
    #[must_use]
    pub fn validate(
        &self,
        master: Option<MacAddress>,
        directory: &DeviceDirectory,
    ) -> TopologyReport {
        let master_mismatch = self
            .master_mac
            .filter(|expected| master != Some(*expected))
            .map(|expected| (expected, master));
        if self.slave_macs.is_empty() {
            return TopologyReport {
                master_mismatch,
                ..TopologyReport::default()
            };
        }

        let found = directory.macs();
        TopologyReport {
            master_mismatch,
            missing: self
                .slave_macs
                .iter()
                .filter(|mac| !found.contains(mac))
                .copied()
                .collect(),
            unexpected: found
                .into_iter()
                .filter(|mac| !self.slave_macs.contains(mac))
                .collect(),
        }
    }
}

impl SummitConfig {
    /// Default location of the config file, if a home directory is known.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "summit").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Loads `path`, or the default file when `path` is `None`.
    ///
    /// A missing default file yields the defaults; a missing explicit file is
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::read(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::read(&path),
                _ => {
                    debug!("no config file found; using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let config = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }
}
