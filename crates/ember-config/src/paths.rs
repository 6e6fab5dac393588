//! OS-specific locations for configuration and log files.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

const APP_NAME: &str = "ember";

/// Where the server keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDirs {
    /// Holds `config.ron`.
    pub config_dir: PathBuf,
    /// Holds the JSON log file.
    pub log_dir: PathBuf,
}

impl AppDirs {
    /// Resolve the platform directories (XDG on Linux, Known Folders on
    /// Windows, Library on macOS) without creating them.
    pub fn resolve() -> Result<Self, ConfigError> {
        let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::under(&base.join(APP_NAME)))
    }

    /// Lay the directories out under an explicit root, as when the user
    /// passes `--config`.
    pub fn under(root: &Path) -> Self {
        Self {
            config_dir: root.to_path_buf(),
            log_dir: root.join("logs"),
        }
    }

    /// `root` when given, the platform default otherwise.
    pub fn resolve_with_override(root: Option<&Path>) -> Result<Self, ConfigError> {
        match root {
            Some(root) => Ok(Self::under(root)),
            None => Self::resolve(),
        }
    }
}
