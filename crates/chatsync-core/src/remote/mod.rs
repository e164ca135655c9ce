//! Remote authoritative store
//!
//! The remote store owns the canonical message log and the active snapshot
//! of every project. Appends are idempotent by message id, so a message
//! delivered twice (background retry racing a user retry) is stored once.
//!
//! ## Implementations
//!
//! - **HTTP** (`HttpRemoteStore`): JSON over HTTP with bearer auth
//! - **Memory** (`MemoryRemoteStore`): in-process server with fault injection

pub mod error;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Message, Snapshot};

pub use error::{RemoteError, RemoteResult};
pub use http::HttpRemoteStore;
pub use memory::MemoryRemoteStore;

/// One page of a project's server log
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub messages: Vec<Message>,
    /// Total number of messages the server holds for the project
    pub total: usize,
}

/// Server-side message and snapshot storage
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch `limit` messages starting at `offset`
    async fn get_messages_page(
        &self,
        project_id: &str,
        offset: usize,
        limit: usize,
    ) -> RemoteResult<Page>;

    /// Store messages, ignoring ids the server already has
    async fn append_messages(&self, project_id: &str, messages: &[Message]) -> RemoteResult<()>;

    async fn clear_messages(&self, project_id: &str) -> RemoteResult<()>;

    async fn get_snapshot(&self, project_id: &str) -> RemoteResult<Option<Snapshot>>;

    async fn set_snapshot(&self, project_id: &str, snapshot: &Snapshot) -> RemoteResult<()>;
}
