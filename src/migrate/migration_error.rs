use thiserror::Error;

use crate::backend::BackendError;

/// An error that aborts a whole migration.
///
/// Failures at individual nodes are recorded in the [`MigrationReport`](super::MigrationReport) instead.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Failed to open container {path}: {source}")]
    Container {
        path: String,
        #[source]
        source: BackendError,
    },
    #[error("Migration cancelled while copying {0}")]
    Cancelled(String),
}
