use std::path::PathBuf;

use lifeboat_core::ConfigError;
use thiserror::Error;

/// Failures that abort a backup run or an admin operation.
///
/// Remote-side failures never appear here; they are reported in
/// [`crate::manager::RunReport::remote_error`].
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup source not found: {}", .0.display())]
    SourceMissing(PathBuf),
    #[error("local snapshot I/O failed: {0:#}")]
    Io(anyhow::Error),
    #[error(transparent)]
    ConfigInvalid(#[from] ConfigError),
    #[error("persisting backup settings failed: {0:#}")]
    ConfigStore(anyhow::Error),
    #[error("scheduler registration failed: {0:#}")]
    Scheduler(anyhow::Error),
}
