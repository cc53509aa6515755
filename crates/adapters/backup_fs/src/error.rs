//! Backup adapter error types.

use std::path::PathBuf;

use portbridge_domain::error::BridgeError;

/// Errors specific to the local backup store.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Reading or writing the backup tree failed.
    #[error("backup io failed on {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The legacy history file is not valid JSON.
    #[error("malformed legacy history {path:?}")]
    LegacyLog {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl BackupError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    /// Convert into a [`BridgeError::Storage`] for propagation across port
    /// boundaries.
    pub fn into_domain(self) -> BridgeError {
        BridgeError::Storage(Box::new(self))
    }
}

impl From<BackupError> for BridgeError {
    fn from(err: BackupError) -> Self {
        err.into_domain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_path_of_failed_io() {
        let err = BackupError::io("/tmp/x")(std::io::Error::other("boom"));
        assert_eq!(err.to_string(), "backup io failed on \"/tmp/x\"");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn should_convert_into_storage_error() {
        let err: BridgeError = BackupError::io("/tmp/x")(std::io::Error::other("boom")).into();
        assert!(matches!(err, BridgeError::Storage(_)));
    }
}
