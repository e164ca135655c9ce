//! Per-project delivery bookkeeping
//!
//! The registry is the in-memory source of truth for which messages of a
//! project still have to reach the server, the last delivery error, and
//! whether a delivery is in flight. It is created once per session and
//! shared by `Arc`; every mutation bumps a revision on a watch channel so
//! front-ends know to re-render the status.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::annotations::is_pending;
use crate::models::{Annotation, Message, SyncMarker};

/// Derived sync state shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    Synced,
    Syncing,
    Pending,
    Error,
    SignedOut,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SyncState::Synced => "synced",
            SyncState::Syncing => "syncing",
            SyncState::Pending => "pending",
            SyncState::Error => "error",
            SyncState::SignedOut => "signed-out",
        };
        f.write_str(label)
    }
}

/// Last delivery failure of a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Snapshot of a project's sync status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    pub pending_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_at: Option<DateTime<Utc>>,
}

/// Derive the user-visible state
///
/// Precedence: no project, syncing, signed out, pending, error, synced.
pub fn compute_state(
    project_id: Option<&str>,
    authenticated: bool,
    syncing: bool,
    pending_count: usize,
    has_error: bool,
) -> SyncState {
    if project_id.is_none() {
        return if authenticated {
            SyncState::Synced
        } else {
            SyncState::SignedOut
        };
    }
    if syncing {
        SyncState::Syncing
    } else if !authenticated {
        SyncState::SignedOut
    } else if pending_count > 0 {
        SyncState::Pending
    } else if has_error {
        SyncState::Error
    } else {
        SyncState::Synced
    }
}

#[derive(Debug, Default)]
struct ProjectEntry {
    pending: BTreeSet<String>,
    error: Option<LastError>,
    in_flight: usize,
}

impl ProjectEntry {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.error.is_none() && self.in_flight == 0
    }
}

/// Shared per-project pending/error registry
#[derive(Debug)]
pub struct SyncRegistry {
    projects: Mutex<HashMap<String, ProjectEntry>>,
    revision: watch::Sender<u64>,
}

impl Default for SyncRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncRegistry {
    pub fn new() -> Self {
        let (revision, _rx) = watch::channel(0);
        Self {
            projects: Mutex::new(HashMap::new()),
            revision,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProjectEntry>> {
        self.projects.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply `f` to a project's entry, then notify observers
    fn update<R>(&self, project_id: &str, f: impl FnOnce(&mut ProjectEntry) -> R) -> R {
        let result = {
            let mut projects = self.lock();
            let entry = projects.entry(project_id.to_string()).or_default();
            let result = f(entry);
            if entry.is_idle() {
                projects.remove(project_id);
            }
            result
        };
        self.revision.send_modify(|rev| *rev += 1);
        result
    }

    fn read<R>(&self, project_id: &str, f: impl FnOnce(&ProjectEntry) -> R) -> R {
        let projects = self.lock();
        match projects.get(project_id) {
            Some(entry) => f(entry),
            None => f(&ProjectEntry::default()),
        }
    }

    pub fn mark_pending(&self, project_id: &str, message_id: &str) {
        self.update(project_id, |entry| {
            entry.pending.insert(message_id.to_string());
        });
    }

    /// Remove a message from the pending set; unknown ids are ignored
    pub fn mark_synced(&self, project_id: &str, message_id: &str) {
        self.update(project_id, |entry| {
            entry.pending.remove(message_id);
        });
    }

    /// Forget every pending id of a project
    pub fn clear_all(&self, project_id: &str) {
        self.update(project_id, |entry| entry.pending.clear());
    }

    pub fn set_error(&self, project_id: &str, error: impl Into<String>) {
        let error = error.into();
        debug!("Recording sync error for {}: {}", project_id, error);
        self.update(project_id, |entry| {
            entry.error = Some(LastError {
                message: error,
                at: Utc::now(),
            });
        });
    }

    pub fn clear_error(&self, project_id: &str) {
        self.update(project_id, |entry| entry.error = None);
    }

    /// Pending ids in a stable order
    pub fn pending_ids(&self, project_id: &str) -> Vec<String> {
        self.read(project_id, |entry| entry.pending.iter().cloned().collect())
    }

    pub fn pending_count(&self, project_id: &str) -> usize {
        self.read(project_id, |entry| entry.pending.len())
    }

    pub fn is_pending(&self, project_id: &str, message_id: &str) -> bool {
        self.read(project_id, |entry| entry.pending.contains(message_id))
    }

    pub fn last_error(&self, project_id: &str) -> Option<LastError> {
        self.read(project_id, |entry| entry.error.clone())
    }

    pub fn is_syncing(&self, project_id: &str) -> bool {
        self.read(project_id, |entry| entry.in_flight > 0)
    }

    /// Mark a delivery as in flight until the guard is dropped
    pub fn begin_sync(&self, project_id: &str) -> SyncGuard<'_> {
        self.update(project_id, |entry| entry.in_flight += 1);
        SyncGuard {
            registry: self,
            project_id: project_id.to_string(),
        }
    }

    /// Rebuild a project's pending set from the markers stored in its log
    ///
    /// The newest delivery error found on a pending message becomes the
    /// project's last error. Returns the number of pending messages.
    pub fn initialize_from_store(&self, project_id: &str, messages: &[Message]) -> usize {
        let pending: BTreeSet<String> = messages
            .iter()
            .filter(|m| is_pending(m))
            .map(|m| m.id.clone())
            .collect();

        let error = messages
            .iter()
            .filter(|m| is_pending(m))
            .filter_map(stored_error)
            .last();

        let count = pending.len();
        self.update(project_id, |entry| {
            entry.pending = pending;
            entry.error = error;
        });

        if count > 0 {
            debug!("Restored {} pending messages for {}", count, project_id);
        }
        count
    }

    /// Drop all state of a project
    pub fn remove_project(&self, project_id: &str) {
        self.update(project_id, |entry| {
            entry.pending.clear();
            entry.error = None;
        });
    }

    pub fn status(&self, project_id: Option<&str>, authenticated: bool) -> SyncStatus {
        let Some(id) = project_id else {
            return SyncStatus {
                state: compute_state(None, authenticated, false, 0, false),
                pending_count: 0,
                last_error: None,
                last_error_at: None,
            };
        };

        self.read(id, |entry| SyncStatus {
            state: compute_state(
                Some(id),
                authenticated,
                entry.in_flight > 0,
                entry.pending.len(),
                entry.error.is_some(),
            ),
            pending_count: entry.pending.len(),
            last_error: entry.error.as_ref().map(|e| e.message.clone()),
            last_error_at: entry.error.as_ref().map(|e| e.at),
        })
    }

    /// Receiver bumped on every mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }
}

fn stored_error(message: &Message) -> Option<LastError> {
    message.annotations.iter().find_map(|a| match a {
        Annotation::Sync(SyncMarker::SyncError { error, failed_at }) => Some(LastError {
            message: error.clone(),
            at: failed_at.unwrap_or_else(Utc::now),
        }),
        _ => None,
    })
}

/// RAII marker of an in-flight delivery
#[must_use = "the delivery is only marked in flight while the guard is alive"]
pub struct SyncGuard<'a> {
    registry: &'a SyncRegistry,
    project_id: String,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.registry.update(&self.project_id, |entry| {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        });
    }
}
