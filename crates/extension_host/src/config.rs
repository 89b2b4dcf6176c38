//! Loader configuration.

use crate::warning::WarningState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_directory() -> PathBuf {
    PathBuf::from("plugins")
}

fn default_host_version() -> String {
    "v1".to_string()
}

fn default_mappings_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Settings for [`ExtensionLoader`](crate::ExtensionLoader).
///
/// Every field has a default so a partial TOML table is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Directory scanned by `load_directory`
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// Internal version of the running host, selects the remap resources
    #[serde(default = "default_host_version")]
    pub host_version: String,
    /// Root holding `mappings/<host_version>/`
    #[serde(default = "default_mappings_dir")]
    pub mappings_dir: PathBuf,
    /// Host package relocated under the version, e.g. `host/internal` becomes
    /// `host/internal/<host_version>`
    #[serde(default)]
    pub relocation_prefix: Option<String>,
    /// Wrap every handler in a timing probe
    #[serde(default)]
    pub timings: bool,
    /// Policy for deprecated-occurrence registrations
    #[serde(default)]
    pub warning_state: WarningState,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            host_version: default_host_version(),
            mappings_dir: default_mappings_dir(),
            relocation_prefix: None,
            timings: false,
            warning_state: WarningState::default(),
        }
    }
}

impl LoaderConfig {
    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_host_version(mut self, version: impl Into<String>) -> Self {
        self.host_version = version.into();
        self
    }

    pub fn with_mappings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mappings_dir = dir.into();
        self
    }

    pub fn with_relocation_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.relocation_prefix = Some(prefix.into());
        self
    }

    pub fn with_timings(mut self, enabled: bool) -> Self {
        self.timings = enabled;
        self
    }

    pub fn with_warning_state(mut self, state: WarningState) -> Self {
        self.warning_state = state;
        self
    }
}
