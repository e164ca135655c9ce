//! Delivery of chat messages to the remote store
//!
//! ## Flow
//!
//! 1. `ChatSync::open` loads a project: server history merged with the
//!    local copy, or the local copy alone when the server is unreachable
//! 2. `ChatSync::append` writes new messages locally and marks them pending
//! 3. `ChatSync::sync_pending` delivers pending messages; failures keep
//!    them pending with the error recorded
//! 4. `BackgroundSync` re-triggers delivery after a delay, on sign-in and
//!    on demand
//!
//! ## Usage
//!
//! ```ignore
//! let sync = Arc::new(ChatSync::new(local, Some(remote), auth, SyncOptions::default()));
//! let opened = sync.open("project-1", None).await?;
//! let background = sync.spawn_background_sync("project-1");
//! sync.append("project-1", vec![message]).await?;
//! ```

mod background;
mod orchestrator;
mod registry;
mod retry;

pub use background::BackgroundSync;
pub use orchestrator::{
    AppendOutcome, ChatSync, DeliveryOutcome, LoadPhase, LoadSource, OpenedChat, SyncEvent,
    SyncOptions,
};
pub use registry::{compute_state, LastError, SyncGuard, SyncRegistry, SyncState, SyncStatus};
pub use retry::RetryPolicy;
