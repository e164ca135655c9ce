//! chatsync Core Library
//!
//! This crate keeps a project's append-only chat log consistent between a
//! local cache and a remote authoritative store, and records snapshots of
//! the project's generated file tree that the conversation can be rewound to.
//!
//! # Architecture
//!
//! - **Local store**: offline copy, written first; pending messages carry a
//!   marker so a restart knows what is still undelivered
//! - **Remote store**: canonical log; appends are idempotent by message id
//! - **Merge**: server wins for ids it knows, local-only messages are kept
//!   and ordered after confirmed history
//!
//! # Quick Start
//!
//! ```text
//! let sync = Arc::new(ChatSync::new(local, Some(remote), auth, SyncOptions::default()));
//!
//! // Load history (server first, local fallback)
//! let opened = sync.open("project-1", None).await?;
//!
//! // Append and deliver
//! sync.append("project-1", vec![Message::new(Role::User, "hello")]).await?;
//! ```
//!
//! # Modules
//!
//! - `sync`: orchestrator, pending registry and background delivery
//! - `merge` / `ordering`: log reconciliation and total order
//! - `annotations`: pending and error markers
//! - `history`: paginated loading with a page ceiling
//! - `snapshot`: file tree snapshots and the visible log
//! - `storage` / `remote`: store traits and implementations
//! - `config`: application configuration

pub mod annotations;
pub mod auth;
pub mod config;
pub mod error;
pub mod history;
pub mod merge;
pub mod models;
pub mod ordering;
pub mod remote;
pub mod snapshot;
pub mod storage;
pub mod sync;
pub mod workspace;

pub use auth::{AuthHandle, AuthState};
pub use config::Config;
pub use error::{SyncError, SyncResult};
pub use history::{HistoryLoader, HistoryProgress, StopReason};
pub use merge::{merge, MergeOutcome};
pub use models::{Annotation, FileEntry, FileTree, Message, MessageContent, Role, Snapshot, StoredChat};
pub use remote::{HttpRemoteStore, MemoryRemoteStore, RemoteError, RemoteStore};
pub use snapshot::{compute_visible_log, RestoreReport, SnapshotManager, VisibleLog};
pub use storage::{LocalStore, MemoryLocalStore, SqliteLocalStore, StorageError};
pub use sync::{BackgroundSync, ChatSync, SyncEvent, SyncOptions, SyncRegistry, SyncState, SyncStatus};
pub use workspace::{DirectoryMaterializer, FileTreeMaterializer};
