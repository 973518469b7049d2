//! On-disk locations for persisted and ephemeral state

use std::path::{Path, PathBuf};

const APP_DIR: &str = "cdw";

/// Where the automation server keeps its config and per-run credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationPaths {
    pub config_file: PathBuf,
    pub credentials_file: PathBuf,
}

impl AutomationPaths {
    /// Paths under the platform config directory (`~/.config/cdw` on Linux).
    pub fn default_locations() -> Self {
        Self::in_dir(&default_state_dir())
    }

    /// Paths under an explicit state directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            config_file: dir.join("automation-api.json"),
            credentials_file: dir.join("automation-api-credentials.json"),
        }
    }
}

/// Base directory for config and credentials.
pub fn default_state_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Private directory for generated shell startup scripts.
pub fn default_shell_integration_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("shell-integration")
}
