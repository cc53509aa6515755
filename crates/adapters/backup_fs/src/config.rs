//! Backup storage configuration.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// One sub-directory per device lives here.
    pub root_dir: PathBuf,
    /// Exported device logs are appended to files in this directory.
    pub logs_dir: PathBuf,
    /// Remote directory holding the device configuration files.
    pub remote_config_dir: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("data/store/backup"),
            logs_dir: PathBuf::from("data/store/backup/logs"),
            remote_config_dir: "/config".to_string(),
        }
    }
}
