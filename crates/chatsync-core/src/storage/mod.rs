//! Local store layer
//!
//! The local store is the project's offline copy: one chat record and one
//! active snapshot per project id.
//!
//! ## Implementations
//!
//! - **SQLite** (`SqliteLocalStore`): durable store used by the CLI
//! - **Memory** (`MemoryLocalStore`): volatile store with failure injection

pub mod error;
pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;

use crate::models::{Snapshot, StoredChat};

pub use error::{StorageError, StorageResult};
pub use memory::MemoryLocalStore;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use sqlite::SqliteLocalStore;

/// Record storage keyed by project id
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Chat record for a project, `None` if never stored
    async fn get_messages(&self, project_id: &str) -> StorageResult<Option<StoredChat>>;

    /// Replace the chat record for a project
    async fn set_messages(&self, project_id: &str, chat: &StoredChat) -> StorageResult<()>;

    async fn get_snapshot(&self, project_id: &str) -> StorageResult<Option<Snapshot>>;

    async fn set_snapshot(&self, project_id: &str, snapshot: &Snapshot) -> StorageResult<()>;

    /// Remove the chat record and snapshot of a project
    async fn delete_by_id(&self, project_id: &str) -> StorageResult<()>;
}
