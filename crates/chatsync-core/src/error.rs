//! Top-level error type for sync operations

use thiserror::Error;

use crate::remote::RemoteError;
use crate::storage::StorageError;
use crate::workspace::MaterializeError;

/// Errors surfaced by the orchestrator and snapshot manager
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local store failure
    #[error(transparent)]
    Local(#[from] StorageError),

    /// Remote store failure that has no local fallback
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Writing the file tree failed
    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    /// No project id could be resolved
    #[error("No project id given")]
    NoProject,

    /// The project has no snapshot to restore
    #[error("Project '{0}' has no snapshot")]
    NoSnapshot(String),
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;
