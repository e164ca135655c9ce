//! Sync orchestrator
//!
//! `ChatSync` ties the stores, the registry and the snapshot manager
//! together. It loads a project's log (server first, local fallback),
//! appends new messages locally before attempting delivery, and delivers
//! pending messages on explicit triggers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::background::BackgroundSync;
use super::registry::{SyncRegistry, SyncStatus};
use super::retry::RetryPolicy;
use crate::annotations::{add_pending, clear_pending, is_no_store};
use crate::auth::AuthState;
use crate::config::{Config, HistoryConfig};
use crate::error::{SyncError, SyncResult};
use crate::history::{HistoryLoad, HistoryLoader, HistoryProgress, StopReason};
use crate::merge::{merge, valid_messages};
use crate::models::{FileTree, Message, Snapshot, StoredChat};
use crate::ordering::max_sequence;
use crate::remote::{RemoteError, RemoteResult, RemoteStore};
use crate::snapshot::{
    compute_visible_log, DefaultRestoreFormatter, RestoreReport, RestoreSummaryFormatter,
    SnapshotManager, VisibleLog,
};
use crate::storage::{LocalStore, StorageError};
use crate::workspace::FileTreeMaterializer;

/// Progress of opening a project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// Nothing opened yet
    Idle,
    Loading,
    /// The server log was fetched and merged
    ServerOk,
    /// The local copy is shown
    LocalFallback,
    /// Neither store has messages
    Empty,
    Ready,
}

/// Where an opened log came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Server,
    Local,
    Empty,
}

/// Events emitted by the orchestrator
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Sync status of a project changed
    StatusChanged {
        project_id: String,
        status: SyncStatus,
    },
    /// Non-blocking problem worth showing the user
    Warning(String),
    /// A history page arrived
    HistoryProgress(HistoryProgress),
    /// A snapshot restore finished cleanly
    ShowResults(RestoreReport),
}

/// A freshly opened project
#[derive(Debug, Clone)]
pub struct OpenedChat {
    pub project_id: String,
    pub source: LoadSource,
    /// Archived and active messages as displayed
    pub log: VisibleLog,
    /// Canonical merged log, without display-only messages
    pub messages: Vec<Message>,
    pub snapshot: Option<Snapshot>,
    /// Why history loading stopped, when the server was used
    pub history_stop: Option<StopReason>,
    /// Message count the server reported
    pub server_total: Option<usize>,
    /// Local store failure; the log was started empty
    pub local_error: Option<String>,
    /// Remote failure that caused the local fallback
    pub remote_error: Option<String>,
    pub status: SyncStatus,
}

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// No pending messages
    Nothing,
    /// No signed-in remote; messages stay pending
    Skipped,
    Delivered { count: usize },
    /// Delivery failed; messages stay pending
    Failed { error: RemoteError, pending: usize },
}

/// Result of appending messages
#[derive(Debug, Clone, PartialEq)]
pub struct AppendOutcome {
    /// Ids written to the local log, in order
    pub appended: Vec<String>,
    /// Messages with empty content or no id
    pub invalid: usize,
    /// Messages flagged `no-store`
    pub not_stored: usize,
    /// Ids already present in the log
    pub duplicates: usize,
    pub delivery: DeliveryOutcome,
}

/// Tunables of a `ChatSync`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncOptions {
    pub history: HistoryConfig,
    pub retry: RetryPolicy,
    /// Schedule backoff retries after a failed background delivery
    pub auto_retry: bool,
    /// Delay before the background task's first delivery attempt
    pub background_delay: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SyncOptions {
    fn from(config: &Config) -> Self {
        Self {
            history: config.history,
            retry: config.retry_policy(),
            auto_retry: config.retry.auto_retry,
            background_delay: config.background_sync_delay(),
        }
    }
}

/// Chat log synchronization for one session
pub struct ChatSync {
    local: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    auth: Arc<dyn AuthState>,
    registry: Arc<SyncRegistry>,
    snapshots: SnapshotManager,
    history: Option<HistoryLoader>,
    formatter: Arc<dyn RestoreSummaryFormatter>,
    options: SyncOptions,
    /// Bumped on every `open`; stale loads compare against it
    generation: AtomicU64,
    active: Mutex<Option<String>>,
    phase: watch::Sender<LoadPhase>,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncEvent>>>,
    /// Serializes read-modify-write cycles on the local log
    write_lock: tokio::sync::Mutex<()>,
    delivery_lock: tokio::sync::Mutex<()>,
}

impl ChatSync {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Option<Arc<dyn RemoteStore>>,
        auth: Arc<dyn AuthState>,
        options: SyncOptions,
    ) -> Self {
        let (phase, _rx) = watch::channel(LoadPhase::Idle);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            snapshots: SnapshotManager::new(local.clone(), remote.clone(), auth.clone()),
            history: remote
                .as_ref()
                .map(|r| HistoryLoader::new(r.clone(), options.history)),
            local,
            remote,
            auth,
            registry: Arc::new(SyncRegistry::new()),
            formatter: Arc::new(DefaultRestoreFormatter),
            options,
            generation: AtomicU64::new(0),
            active: Mutex::new(None),
            phase,
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            write_lock: tokio::sync::Mutex::new(()),
            delivery_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Share an existing registry (builder style)
    pub fn with_registry(mut self, registry: Arc<SyncRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Use a custom restore summary (builder style)
    pub fn with_formatter(mut self, formatter: Arc<dyn RestoreSummaryFormatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn registry(&self) -> &Arc<SyncRegistry> {
        &self.registry
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn auth(&self) -> &Arc<dyn AuthState> {
        &self.auth
    }

    /// Take the event receiver (can only be called once)
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SyncEvent>> {
        self.event_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn phase(&self) -> LoadPhase {
        *self.phase.borrow()
    }

    /// Subscribe to load phase changes
    pub fn subscribe_phase(&self) -> watch::Receiver<LoadPhase> {
        self.phase.subscribe()
    }

    /// Project of the most recent `open`
    pub fn active_project(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn signed_in_remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.remote
            .as_ref()
            .filter(|_| self.auth.is_authenticated())
    }

    fn emit(&self, event: SyncEvent) {
        // Nobody listening is fine
        let _ = self.event_tx.send(event);
    }

    fn warn_user(&self, message: String) {
        warn!("{}", message);
        self.emit(SyncEvent::Warning(message));
    }

    fn set_phase(&self, phase: LoadPhase) {
        self.phase.send_replace(phase);
    }

    fn emit_status(&self, project_id: &str) {
        self.emit(SyncEvent::StatusChanged {
            project_id: project_id.to_string(),
            status: self.status(project_id),
        });
    }

    /// Make `project_id` the active project and return its generation
    fn activate(&self, project_id: &str) -> u64 {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        *active = Some(project_id.to_string());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_phase(LoadPhase::Loading);
        generation
    }

    /// Publish `phase` only while `generation` is still the active load
    fn publish_phase(&self, generation: u64, phase: LoadPhase) -> bool {
        let _active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !self.is_current(generation) {
            return false;
        }
        self.set_phase(phase);
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    async fn read_local(
        &self,
        project_id: &str,
    ) -> Result<(Option<StoredChat>, Option<Snapshot>), StorageError> {
        let chat = self.local.get_messages(project_id).await?;
        let snapshot = self.local.get_snapshot(project_id).await?;
        Ok((chat, snapshot))
    }

    /// Full server log and snapshot, `None` without a signed-in remote
    async fn read_remote(
        &self,
        project_id: &str,
    ) -> Option<RemoteResult<(HistoryLoad, Option<Snapshot>)>> {
        self.signed_in_remote()?;
        let history = self.history.as_ref()?;

        let progress_tx = self.event_tx.clone();
        let on_progress = move |progress: HistoryProgress| {
            let _ = progress_tx.send(SyncEvent::HistoryProgress(progress));
        };

        let (log, snapshot) = tokio::join!(
            history.load_all(project_id, on_progress),
            self.snapshots.load_remote(project_id)
        );
        Some(log.and_then(|log| snapshot.map(|snapshot| (log, snapshot))))
    }

    /// Load a project's log
    ///
    /// Returns `Ok(None)` when another project was opened while this one was
    /// loading.
    pub async fn open(
        &self,
        project_id: &str,
        rewind_to: Option<&str>,
    ) -> SyncResult<Option<OpenedChat>> {
        if project_id.is_empty() {
            return Err(SyncError::NoProject);
        }

        let generation = self.activate(project_id);
        debug!("Opening {} (generation {})", project_id, generation);

        let (local, remote) = tokio::join!(self.read_local(project_id), self.read_remote(project_id));

        if !self.is_current(generation) {
            debug!("Discarding stale load of {}", project_id);
            return Ok(None);
        }

        let (stored, local_snapshot, local_error) = match local {
            Ok((chat, snapshot)) => (chat, snapshot, None),
            Err(e) => {
                self.warn_user(format!("Could not read local copy of {}: {}", project_id, e));
                (None, None, Some(e.to_string()))
            }
        };
        let stored = stored.unwrap_or_default();

        let mut source = LoadSource::Local;
        let mut snapshot = local_snapshot;
        let mut history_stop = None;
        let mut server_total = None;
        let mut remote_error = None;

        let server_messages = match remote {
            Some(Ok((history, server_snapshot))) => {
                source = LoadSource::Server;
                history_stop = Some(history.stop);
                server_total = Some(history.total);
                match history.stop {
                    StopReason::RateLimited => self.warn_user(format!(
                        "History of {} partially loaded: server rate limit",
                        project_id
                    )),
                    StopReason::PageLimit => info!(
                        "Showing the first {} of {} messages of {}",
                        history.messages.len(),
                        history.total,
                        project_id
                    ),
                    StopReason::Complete => {}
                }

                if let Some(server_snapshot) = server_snapshot {
                    if snapshot.as_ref() != Some(&server_snapshot) && local_error.is_none() {
                        if let Err(e) = self.snapshots.adopt(project_id, &server_snapshot).await {
                            warn!("Could not cache snapshot of {}: {}", project_id, e);
                        }
                    }
                    snapshot = Some(server_snapshot);
                }
                Some(history.messages)
            }
            Some(Err(e)) => {
                self.warn_user(format!(
                    "Could not load {} from server, showing local copy: {}",
                    project_id, e
                ));
                remote_error = Some(e.to_string());
                None
            }
            None => None,
        };

        // Appends may have landed while the server was answering, so the
        // merge runs against a fresh read of the local log
        let write = self.write_lock.lock().await;
        if !self.is_current(generation) {
            debug!("Discarding stale load of {}", project_id);
            return Ok(None);
        }

        let (base, base_is_fresh) = if local_error.is_none() {
            match self.local.get_messages(project_id).await {
                Ok(chat) => (chat.unwrap_or_default(), true),
                Err(e) => {
                    warn!("Could not re-read local copy of {}: {}", project_id, e);
                    (stored, false)
                }
            }
        } else {
            (stored, false)
        };

        let messages = match &server_messages {
            Some(server) => {
                let outcome = merge(server, &base.messages);
                debug!(
                    "Merged {}: {} from server, {} local only, {} duplicates",
                    project_id,
                    outcome.server_count,
                    outcome.local_only_count,
                    outcome.duplicates_removed
                );
                if base_is_fresh && outcome.messages != base.messages {
                    let cached = StoredChat {
                        messages: outcome.messages.clone(),
                        timestamp: Some(Utc::now()),
                        ..base
                    };
                    if let Err(e) = self.local.set_messages(project_id, &cached).await {
                        warn!("Could not cache merged log of {}: {}", project_id, e);
                    }
                }
                outcome.messages
            }
            None => merge(&[], &base.messages).messages,
        };

        if messages.is_empty() {
            source = LoadSource::Empty;
        }
        let loaded = match source {
            LoadSource::Server => LoadPhase::ServerOk,
            LoadSource::Local => LoadPhase::LocalFallback,
            LoadSource::Empty => LoadPhase::Empty,
        };
        if !self.publish_phase(generation, loaded) {
            debug!("Discarding stale load of {}", project_id);
            return Ok(None);
        }
        self.registry.initialize_from_store(project_id, &messages);
        drop(write);

        let log = compute_visible_log(
            &messages,
            snapshot.as_ref(),
            rewind_to,
            self.formatter.as_ref(),
        );

        if !self.publish_phase(generation, LoadPhase::Ready) {
            debug!("Discarding stale load of {}", project_id);
            return Ok(None);
        }
        self.emit_status(project_id);
        info!(
            "Opened {} with {} messages ({:?})",
            project_id,
            messages.len(),
            source
        );

        Ok(Some(OpenedChat {
            project_id: project_id.to_string(),
            source,
            log,
            messages,
            snapshot,
            history_stop,
            server_total,
            local_error,
            remote_error,
            status: self.status(project_id),
        }))
    }

    /// Re-open the project with the view ending at `message_id`
    pub async fn rewind(&self, project_id: &str, message_id: &str) -> SyncResult<Option<OpenedChat>> {
        self.open(project_id, Some(message_id)).await
    }

    /// Append new messages locally, then try to deliver them
    ///
    /// Messages without content, flagged `no-store`, or already in the log
    /// are skipped. The local write must succeed; delivery may fail and
    /// leaves the messages pending.
    pub async fn append(&self, project_id: &str, messages: Vec<Message>) -> SyncResult<AppendOutcome> {
        if project_id.is_empty() {
            return Err(SyncError::NoProject);
        }

        let (valid, invalid) = valid_messages(&messages);
        if invalid > 0 {
            debug!("Skipping {} messages without content", invalid);
        }
        let total_valid = valid.len();
        let storable: Vec<Message> = valid.into_iter().filter(|m| !is_no_store(m)).collect();
        let not_stored = total_valid - storable.len();

        let appended: Vec<String>;
        let duplicates: usize;
        {
            let _write = self.write_lock.lock().await;
            let mut chat = self.local.get_messages(project_id).await?.unwrap_or_default();

            let mut known: HashSet<String> = chat.messages.iter().map(|m| m.id.clone()).collect();
            let fresh: Vec<Message> = storable
                .iter()
                .filter(|m| known.insert(m.id.clone()))
                .cloned()
                .collect();
            duplicates = storable.len() - fresh.len();

            let next = max_sequence(&chat.messages) + 1;
            let marked: Vec<Message> = fresh
                .iter()
                .enumerate()
                .map(|(i, m)| add_pending(&m.clone().with_sequence(next + i as u64), None))
                .collect();
            appended = marked.iter().map(|m| m.id.clone()).collect();

            if !marked.is_empty() {
                chat.messages.extend(marked);
                chat.timestamp = Some(Utc::now());
                self.local.set_messages(project_id, &chat).await?;
            }
            // Registered under the lock so a concurrent `open` cannot miss them
            for id in &appended {
                self.registry.mark_pending(project_id, id);
            }
        }

        if !appended.is_empty() {
            debug!("Appended {} messages to {}", appended.len(), project_id);
            self.emit_status(project_id);
        }

        let delivery = self.sync_pending(project_id).await?;

        Ok(AppendOutcome {
            appended,
            invalid,
            not_stored,
            duplicates,
            delivery,
        })
    }

    /// Attempt one delivery of every pending message
    ///
    /// Success clears the pending and error markers of the delivered
    /// messages. Failure records the error and keeps them pending.
    pub async fn sync_pending(&self, project_id: &str) -> SyncResult<DeliveryOutcome> {
        // One delivery at a time; a queued attempt sees what the previous one left
        let _delivery = self.delivery_lock.lock().await;

        let pending: HashSet<String> = self.registry.pending_ids(project_id).into_iter().collect();
        if pending.is_empty() {
            return Ok(DeliveryOutcome::Nothing);
        }
        let Some(remote) = self.signed_in_remote() else {
            debug!("{} pending messages of {} wait for sign-in", pending.len(), project_id);
            return Ok(DeliveryOutcome::Skipped);
        };

        let guard = self.registry.begin_sync(project_id);
        self.emit_status(project_id);

        let chat = self.local.get_messages(project_id).await?.unwrap_or_default();
        let outbound: Vec<Message> = chat
            .messages
            .iter()
            .filter(|m| pending.contains(&m.id))
            .map(Message::for_server)
            .collect();

        if outbound.len() < pending.len() {
            // Left pending; the next open rebuilds the set from the log
            debug!(
                "{} pending ids of {} are not in the local log",
                pending.len() - outbound.len(),
                project_id
            );
        }
        if outbound.is_empty() {
            drop(guard);
            self.emit_status(project_id);
            return Ok(DeliveryOutcome::Nothing);
        }

        info!("Delivering {} messages of {}", outbound.len(), project_id);
        let result = remote.append_messages(project_id, &outbound).await;
        let sent: HashSet<String> = outbound.into_iter().map(|m| m.id).collect();

        // The log may have grown while the request was in flight
        let outcome = {
            let _write = self.write_lock.lock().await;
            let mut chat = self.local.get_messages(project_id).await?.unwrap_or_default();

            let outcome = match &result {
                Ok(()) => {
                    for message in chat.messages.iter_mut().filter(|m| sent.contains(&m.id)) {
                        *message = clear_pending(message);
                    }
                    for id in &sent {
                        self.registry.mark_synced(project_id, id);
                    }
                    self.registry.clear_error(project_id);
                    DeliveryOutcome::Delivered { count: sent.len() }
                }
                Err(e) => {
                    let error = e.to_string();
                    for message in chat.messages.iter_mut().filter(|m| sent.contains(&m.id)) {
                        *message = add_pending(message, Some(&error));
                    }
                    self.registry.set_error(project_id, &error);
                    DeliveryOutcome::Failed {
                        error: e.clone(),
                        pending: self.registry.pending_count(project_id),
                    }
                }
            };

            if let Err(e) = self.local.set_messages(project_id, &chat).await {
                warn!("Could not update sync markers of {}: {}", project_id, e);
            }
            outcome
        };

        drop(guard);
        match &outcome {
            DeliveryOutcome::Delivered { count } => info!("Delivered {} messages of {}", count, project_id),
            DeliveryOutcome::Failed { error, .. } => warn!("Delivery for {} failed: {}", project_id, error),
            _ => {}
        }
        self.emit_status(project_id);
        Ok(outcome)
    }

    /// Current sync status of a project
    pub fn status(&self, project_id: &str) -> SyncStatus {
        let authenticated = self.signed_in_remote().is_some();
        let project = Some(project_id).filter(|p| !p.is_empty());
        self.registry.status(project, authenticated)
    }

    /// Delete a project's log and snapshot from both stores
    pub async fn clear(&self, project_id: &str) -> SyncResult<()> {
        if project_id.is_empty() {
            return Err(SyncError::NoProject);
        }
        if let Some(remote) = self.signed_in_remote() {
            remote.clear_messages(project_id).await?;
        }
        {
            let _write = self.write_lock.lock().await;
            self.local.delete_by_id(project_id).await?;
        }
        self.registry.remove_project(project_id);
        info!("Cleared {}", project_id);
        self.emit_status(project_id);
        Ok(())
    }

    pub async fn take_snapshot(
        &self,
        project_id: &str,
        message_id: &str,
        files: FileTree,
        summary: Option<String>,
    ) -> SyncResult<Snapshot> {
        self.snapshots.take(project_id, message_id, files, summary).await
    }

    /// Write the project's stored snapshot through `materializer`
    pub async fn restore_snapshot(
        &self,
        project_id: &str,
        materializer: &dyn FileTreeMaterializer,
    ) -> SyncResult<RestoreReport> {
        let snapshot = self
            .snapshots
            .load(project_id)
            .await?
            .ok_or_else(|| SyncError::NoSnapshot(project_id.to_string()))?;

        let report = self.snapshots.restore(&snapshot, materializer).await;
        if report.show_results {
            self.emit(SyncEvent::ShowResults(report.clone()));
        } else {
            self.warn_user(format!(
                "{} files of {} could not be restored",
                report.failures.len(),
                project_id
            ));
        }
        Ok(report)
    }

    /// Deliver in the background on a timer, on sign-in and on demand
    pub fn spawn_background_sync(self: &Arc<Self>, project_id: &str) -> BackgroundSync {
        BackgroundSync::spawn(Arc::clone(self), project_id.to_string())
    }
}
