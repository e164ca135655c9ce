//! Project file snapshots
//!
//! A snapshot is the project's file tree as of a given message. Taking one
//! persists it locally first (required) and remotely when signed in (best
//! effort). Restoring one writes the tree back through a
//! [`FileTreeMaterializer`]. The visible chat log is derived from the full
//! log relative to the active snapshot: everything up to the snapshot's
//! message is archived, the rest stays active.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::annotations::is_no_store;
use crate::auth::AuthState;
use crate::error::SyncResult;
use crate::models::{Annotation, FileEntry, FileTree, Message, Role, Snapshot, CHAT_SUMMARY, HIDDEN, NO_STORE};
use crate::remote::{RemoteResult, RemoteStore};
use crate::storage::LocalStore;
use crate::workspace::{FileTreeMaterializer, MaterializeError};

/// Commands a restored project needs to get running
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandActions {
    pub setup: Option<String>,
    pub start: Option<String>,
}

/// Renders the assistant message shown after a snapshot boundary
pub trait RestoreSummaryFormatter: Send + Sync {
    fn format(&self, snapshot: &Snapshot, commands: &CommandActions) -> String;
}

/// Plain-text summary listing the restored files and commands
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRestoreFormatter;

impl RestoreSummaryFormatter for DefaultRestoreFormatter {
    fn format(&self, snapshot: &Snapshot, commands: &CommandActions) -> String {
        let files: Vec<&str> = snapshot
            .files
            .iter()
            .filter(|(_, entry)| !entry.is_folder())
            .map(|(path, _)| path.as_str())
            .collect();

        let mut out = format!("Restored project from snapshot ({} files)", files.len());
        for path in files {
            out.push_str("\n- ");
            out.push_str(path);
        }
        if let Some(setup) = &commands.setup {
            out.push_str(&format!("\n\nSetup: `{}`", setup));
        }
        if let Some(start) = &commands.start {
            let sep = if commands.setup.is_some() { "\n" } else { "\n\n" };
            out.push_str(&format!("{}Start: `{}`", sep, start));
        }
        out
    }
}

/// Scripts tried, in order, for the start command
const START_SCRIPTS: [&str; 3] = ["dev", "start", "preview"];

/// Derive setup/start commands from the tree's top-most `package.json`
pub fn detect_project_commands(files: &FileTree) -> CommandActions {
    let manifest = files
        .iter()
        .filter(|(path, _)| path.as_str() == "package.json" || path.ends_with("/package.json"))
        .min_by_key(|(path, _)| path.matches('/').count());

    let Some((path, FileEntry::File { content, .. })) = manifest else {
        return CommandActions::default();
    };

    let parsed: Value = match serde_json::from_str(content) {
        Ok(value) => value,
        Err(e) => {
            debug!("Ignoring unparsable {}: {}", path, e);
            return CommandActions::default();
        }
    };

    let start = parsed
        .get("scripts")
        .and_then(Value::as_object)
        .and_then(|scripts| START_SCRIPTS.iter().find(|s| scripts.contains_key(**s)))
        .map(|script| format!("npm run {}", script));

    CommandActions {
        setup: Some("npm install".to_string()),
        start,
    }
}

/// One path that could not be restored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreFailure {
    pub path: String,
    pub error: String,
}

/// Result of writing a snapshot's tree back
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub folders_created: usize,
    pub files_written: usize,
    pub already_existed: usize,
    pub failures: Vec<RestoreFailure>,
    /// Whether the results view should be shown
    pub show_results: bool,
}

/// The chat log split around the active snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibleLog {
    /// Frozen messages up to and including the snapshot's message
    pub archived: Vec<Message>,
    /// Editable messages; starts with the two restore messages after a split
    pub active: Vec<Message>,
    /// `chatIndex` of the snapshot the log was split at
    pub restored_from: Option<String>,
}

impl VisibleLog {
    /// Every message that may be written to a store
    pub fn persistable(&self) -> Vec<Message> {
        self.archived
            .iter()
            .chain(&self.active)
            .filter(|m| !is_no_store(m))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.archived.len() + self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archived.is_empty() && self.active.is_empty()
    }
}

/// Split `full_log` around `snapshot`
///
/// A `rewind_to` id present in the log ends the view at that message. The
/// split is suppressed when rewinding to the snapshot's own message or when
/// the snapshot's message is not part of the view.
pub fn compute_visible_log(
    full_log: &[Message],
    snapshot: Option<&Snapshot>,
    rewind_to: Option<&str>,
    formatter: &dyn RestoreSummaryFormatter,
) -> VisibleLog {
    let view = match rewind_to.and_then(|id| full_log.iter().position(|m| m.id == id)) {
        Some(pos) => &full_log[..=pos],
        None => full_log,
    };

    let split = snapshot.and_then(|s| {
        if rewind_to == Some(s.chat_index.as_str()) {
            return None;
        }
        view.iter()
            .position(|m| m.id == s.chat_index)
            .map(|pos| (s, pos))
    });

    let Some((snapshot, pos)) = split else {
        return VisibleLog {
            archived: Vec::new(),
            active: view.to_vec(),
            restored_from: None,
        };
    };

    let commands = detect_project_commands(&snapshot.files);
    let mut active = restore_messages(snapshot, &commands, formatter);
    active.extend_from_slice(&view[pos + 1..]);

    VisibleLog {
        archived: view[..=pos].to_vec(),
        active,
        restored_from: Some(snapshot.chat_index.clone()),
    }
}

/// The hidden restore request and the visible summary that follow a split
fn restore_messages(
    snapshot: &Snapshot,
    commands: &CommandActions,
    formatter: &dyn RestoreSummaryFormatter,
) -> Vec<Message> {
    let marker = Message::with_id(
        format!("restore-marker-{}", snapshot.chat_index),
        Role::User,
        "Restore project from snapshot",
    )
    .with_annotation(Annotation::flag(NO_STORE))
    .with_annotation(Annotation::flag(HIDDEN));

    let mut summary = Message::with_id(
        format!("restore-summary-{}", snapshot.chat_index),
        Role::Assistant,
        formatter.format(snapshot, commands),
    )
    .with_annotation(Annotation::flag(NO_STORE));

    if let Some(text) = &snapshot.summary {
        summary = summary.with_annotation(Annotation::Other(json!({
            "type": CHAT_SUMMARY,
            "summary": text,
            "chatId": snapshot.chat_index,
        })));
    }

    vec![marker, summary]
}

/// Persists and restores project snapshots
pub struct SnapshotManager {
    local: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    auth: Arc<dyn AuthState>,
}

impl SnapshotManager {
    pub fn new(
        local: Arc<dyn LocalStore>,
        remote: Option<Arc<dyn RemoteStore>>,
        auth: Arc<dyn AuthState>,
    ) -> Self {
        Self {
            local,
            remote,
            auth,
        }
    }

    fn signed_in_remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.remote
            .as_ref()
            .filter(|_| self.auth.is_authenticated())
    }

    /// Record the file tree as of `message_id`
    ///
    /// The local write must succeed; a remote failure is only logged.
    pub async fn take(
        &self,
        project_id: &str,
        message_id: &str,
        files: FileTree,
        summary: Option<String>,
    ) -> SyncResult<Snapshot> {
        let mut snapshot = Snapshot::new(message_id, files, summary);
        if let Some(existing) = self.local.get_snapshot(project_id).await? {
            snapshot.created_at = existing.created_at.or(snapshot.created_at);
        }

        self.local.set_snapshot(project_id, &snapshot).await?;
        info!(
            "Took snapshot of {} at {} ({} files)",
            project_id,
            message_id,
            snapshot.file_count()
        );

        if let Some(remote) = self.signed_in_remote() {
            if let Err(e) = remote.set_snapshot(project_id, &snapshot).await {
                warn!("Snapshot of {} kept locally only: {}", project_id, e);
            }
        }

        Ok(snapshot)
    }

    /// Take a snapshot only when the tree differs from the stored one
    pub async fn take_if_changed(
        &self,
        project_id: &str,
        message_id: &str,
        files: FileTree,
        summary: Option<String>,
    ) -> SyncResult<Option<Snapshot>> {
        if let Some(existing) = self.local.get_snapshot(project_id).await? {
            if existing.files == files {
                debug!("File tree of {} unchanged, no snapshot taken", project_id);
                return Ok(None);
            }
        }
        self.take(project_id, message_id, files, summary)
            .await
            .map(Some)
    }

    /// The locally stored snapshot
    pub async fn load(&self, project_id: &str) -> SyncResult<Option<Snapshot>> {
        Ok(self.local.get_snapshot(project_id).await?)
    }

    /// The server's snapshot, `Ok(None)` without a signed-in remote
    pub async fn load_remote(&self, project_id: &str) -> RemoteResult<Option<Snapshot>> {
        match self.signed_in_remote() {
            Some(remote) => remote.get_snapshot(project_id).await,
            None => Ok(None),
        }
    }

    /// Store a snapshot fetched from the server as the local one
    pub async fn adopt(&self, project_id: &str, snapshot: &Snapshot) -> SyncResult<()> {
        self.local.set_snapshot(project_id, snapshot).await?;
        Ok(())
    }

    /// Write the snapshot's tree: folders parents-first, then files
    ///
    /// Existing paths are not failures. Other per-path failures are
    /// collected and never stop the remaining writes.
    pub async fn restore(
        &self,
        snapshot: &Snapshot,
        materializer: &dyn FileTreeMaterializer,
    ) -> RestoreReport {
        let mut report = RestoreReport::default();

        let mut folders: Vec<&str> = snapshot
            .files
            .iter()
            .filter(|(_, entry)| entry.is_folder())
            .map(|(path, _)| path.as_str())
            .collect();
        folders.sort_by_key(|path| (path.trim_matches('/').matches('/').count(), *path));

        for path in folders {
            match materializer.create_folder(path).await {
                Ok(()) => report.folders_created += 1,
                Err(MaterializeError::AlreadyExists(_)) => report.already_existed += 1,
                Err(e) => {
                    warn!("Failed to restore folder {}: {}", path, e);
                    report.failures.push(RestoreFailure {
                        path: path.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        for (path, entry) in &snapshot.files {
            let FileEntry::File { content, .. } = entry else {
                continue;
            };
            match materializer.create_file(path, content).await {
                Ok(()) => report.files_written += 1,
                Err(MaterializeError::AlreadyExists(_)) => report.already_existed += 1,
                Err(e) => {
                    warn!("Failed to restore file {}: {}", path, e);
                    report.failures.push(RestoreFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.show_results = report.failures.is_empty();
        info!(
            "Restored snapshot {}: {} folders, {} files, {} failures",
            snapshot.chat_index,
            report.folders_created,
            report.files_written,
            report.failures.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::is_hidden;
    use crate::auth::AuthHandle;
    use crate::remote::{MemoryRemoteStore, RemoteError};
    use crate::storage::MemoryLocalStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn log(count: usize) -> Vec<Message> {
        (1..=count)
            .map(|i| Message::with_id(format!("m{}", i), Role::User, "x").with_sequence(i as u64))
            .collect()
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    fn tree() -> FileTree {
        let mut files = FileTree::new();
        files.insert("src".to_string(), FileEntry::Folder);
        files.insert("src/app".to_string(), FileEntry::Folder);
        files.insert("src/app/main.ts".to_string(), FileEntry::file("run()"));
        files.insert(
            "package.json".to_string(),
            FileEntry::file(r#"{"scripts":{"build":"vite build","dev":"vite"}}"#),
        );
        files
    }

    #[derive(Default)]
    struct RecordingMaterializer {
        calls: Mutex<Vec<String>>,
        existing: Vec<&'static str>,
        broken: Vec<&'static str>,
    }

    impl RecordingMaterializer {
        fn check(&self, path: &str) -> Result<(), MaterializeError> {
            self.calls.lock().unwrap().push(path.to_string());
            if self.existing.contains(&path) {
                return Err(MaterializeError::AlreadyExists(path.to_string()));
            }
            if self.broken.contains(&path) {
                return Err(MaterializeError::InvalidPath(path.to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl FileTreeMaterializer for RecordingMaterializer {
        async fn create_folder(&self, path: &str) -> Result<(), MaterializeError> {
            self.check(path)
        }

        async fn create_file(&self, path: &str, _content: &str) -> Result<(), MaterializeError> {
            self.check(path)
        }
    }

    fn manager(
        local: Arc<MemoryLocalStore>,
        remote: Arc<MemoryRemoteStore>,
        signed_in: bool,
    ) -> SnapshotManager {
        SnapshotManager::new(local, Some(remote), Arc::new(AuthHandle::new(signed_in)))
    }

    #[test]
    fn test_split_at_snapshot() {
        let full = log(10);
        let snapshot = Snapshot::new("m5", tree(), None);

        let visible = compute_visible_log(&full, Some(&snapshot), None, &DefaultRestoreFormatter);

        assert_eq!(ids(&visible.archived), vec!["m1", "m2", "m3", "m4", "m5"]);
        assert_eq!(visible.active.len(), 7);
        assert_eq!(
            ids(&visible.active[2..]),
            vec!["m6", "m7", "m8", "m9", "m10"]
        );
        assert_eq!(visible.restored_from.as_deref(), Some("m5"));

        let marker = &visible.active[0];
        assert_eq!(marker.role, Role::User);
        assert!(is_hidden(marker));
        assert!(is_no_store(marker));

        let summary = &visible.active[1];
        assert_eq!(summary.role, Role::Assistant);
        assert!(!is_hidden(summary));
        assert!(is_no_store(summary));
        assert!(summary.content.as_text().contains("src/app/main.ts"));
        assert!(summary.content.as_text().contains("npm run dev"));
    }

    #[test]
    fn test_rewind_to_snapshot_message_suppresses_split() {
        let full = log(10);
        let snapshot = Snapshot::new("m5", tree(), None);

        let visible =
            compute_visible_log(&full, Some(&snapshot), Some("m5"), &DefaultRestoreFormatter);

        assert!(visible.archived.is_empty());
        assert_eq!(ids(&visible.active), vec!["m1", "m2", "m3", "m4", "m5"]);
        assert!(visible.restored_from.is_none());
    }

    #[test]
    fn test_rewind_truncates_after_target() {
        let full = log(10);
        let snapshot = Snapshot::new("m3", tree(), None);

        let visible =
            compute_visible_log(&full, Some(&snapshot), Some("m7"), &DefaultRestoreFormatter);

        assert_eq!(ids(&visible.archived), vec!["m1", "m2", "m3"]);
        assert_eq!(ids(&visible.active[2..]), vec!["m4", "m5", "m6", "m7"]);
    }

    #[test]
    fn test_snapshot_outside_view_is_ignored() {
        let full = log(4);
        let snapshot = Snapshot::new("missing", tree(), None);
        let visible = compute_visible_log(&full, Some(&snapshot), None, &DefaultRestoreFormatter);
        assert!(visible.archived.is_empty());
        assert_eq!(visible.active, full);

        let visible = compute_visible_log(&full, None, Some("unknown"), &DefaultRestoreFormatter);
        assert_eq!(visible.len(), 4);
    }

    #[test]
    fn test_summary_annotation_and_persistable() {
        let full = log(6);
        let snapshot = Snapshot::new("m2", tree(), Some("Built a todo app".to_string()));

        let visible = compute_visible_log(&full, Some(&snapshot), None, &DefaultRestoreFormatter);
        assert!(visible.active[1].has_annotation(CHAT_SUMMARY));

        let stored = visible.persistable();
        assert_eq!(ids(&stored), vec!["m1", "m2", "m3", "m4", "m5", "m6"]);
    }

    #[test]
    fn test_custom_formatter() {
        struct Terse;
        impl RestoreSummaryFormatter for Terse {
            fn format(&self, snapshot: &Snapshot, _: &CommandActions) -> String {
                format!("restored {}", snapshot.file_count())
            }
        }

        let visible = compute_visible_log(&log(3), Some(&Snapshot::new("m1", tree(), None)), None, &Terse);
        assert_eq!(visible.active[1].content.as_text(), "restored 2");
    }

    #[test]
    fn test_detect_project_commands() {
        let commands = detect_project_commands(&tree());
        assert_eq!(commands.setup.as_deref(), Some("npm install"));
        assert_eq!(commands.start.as_deref(), Some("npm run dev"));

        let mut files = FileTree::new();
        files.insert("index.html".to_string(), FileEntry::file("<html>"));
        assert_eq!(detect_project_commands(&files), CommandActions::default());

        files.insert("web/package.json".to_string(), FileEntry::file("not json"));
        assert_eq!(detect_project_commands(&files), CommandActions::default());

        files.insert("web/package.json".to_string(), FileEntry::file(r#"{"scripts":{"start":"node ."}}"#));
        assert_eq!(detect_project_commands(&files).start.as_deref(), Some("npm run start"));
    }

    #[tokio::test]
    async fn test_restore_orders_folders_then_files() {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let manager = manager(local, remote, true);
        let materializer = RecordingMaterializer {
            existing: vec!["src"],
            ..Default::default()
        };

        let report = manager
            .restore(&Snapshot::new("m1", tree(), None), &materializer)
            .await;

        let calls = materializer.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["src", "src/app", "package.json", "src/app/main.ts"]);
        assert_eq!(report.folders_created, 1);
        assert_eq!(report.already_existed, 1);
        assert_eq!(report.files_written, 2);
        assert!(report.show_results);
    }

    #[tokio::test]
    async fn test_restore_failure_does_not_abort() {
        let manager = manager(
            Arc::new(MemoryLocalStore::new()),
            Arc::new(MemoryRemoteStore::new()),
            true,
        );
        let materializer = RecordingMaterializer {
            broken: vec!["package.json"],
            ..Default::default()
        };

        let report = manager
            .restore(&Snapshot::new("m1", tree(), None), &materializer)
            .await;

        assert_eq!(report.files_written, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, "package.json");
        assert!(!report.show_results);
    }

    #[tokio::test]
    async fn test_take_persists_both_stores() {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let manager = manager(local.clone(), remote.clone(), true);

        let snapshot = manager.take("p1", "m3", tree(), None).await.unwrap();
        assert_eq!(snapshot.chat_index, "m3");
        assert_eq!(manager.load("p1").await.unwrap(), Some(snapshot.clone()));
        assert_eq!(remote.snapshot("p1"), Some(snapshot));
    }

    #[tokio::test]
    async fn test_take_survives_remote_failure() {
        let local = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.fail_next(RemoteError::Timeout);
        let manager = manager(local, remote.clone(), true);

        manager.take("p1", "m3", tree(), None).await.unwrap();
        assert!(manager.load("p1").await.unwrap().is_some());
        assert!(remote.snapshot("p1").is_none());
    }

    #[tokio::test]
    async fn test_take_signed_out_is_local_only() {
        let remote = Arc::new(MemoryRemoteStore::new());
        let manager = manager(Arc::new(MemoryLocalStore::new()), remote.clone(), false);

        manager.take("p1", "m1", tree(), None).await.unwrap();
        assert!(remote.snapshot("p1").is_none());
        assert_eq!(manager.load_remote("p1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_local_failure_is_error() {
        let local = Arc::new(MemoryLocalStore::new());
        local.fail_next(1);
        let manager = manager(local, Arc::new(MemoryRemoteStore::new()), true);

        assert!(manager.take("p1", "m1", tree(), None).await.is_err());
    }

    #[tokio::test]
    async fn test_take_if_changed() {
        let manager = manager(
            Arc::new(MemoryLocalStore::new()),
            Arc::new(MemoryRemoteStore::new()),
            false,
        );

        assert!(manager.take_if_changed("p1", "m1", tree(), None).await.unwrap().is_some());
        assert!(manager.take_if_changed("p1", "m2", tree(), None).await.unwrap().is_none());

        let mut changed = tree();
        changed.insert("README.md".to_string(), FileEntry::file("# app"));
        let taken = manager.take_if_changed("p1", "m3", changed, None).await.unwrap();
        assert_eq!(taken.unwrap().chat_index, "m3");
    }
}
