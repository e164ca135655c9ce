//! Background delivery task
//!
//! Pending messages are delivered once after a fixed delay, again whenever
//! the user signs in, and whenever `retry()` is called. With automatic retry
//! enabled, a failed attempt also schedules capped exponential backoff
//! retries until one succeeds or the attempt budget is spent.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::orchestrator::{ChatSync, DeliveryOutcome};

/// Commands to the background task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncCommand {
    /// Attempt delivery now
    Retry,
    /// Stop the task
    Shutdown,
}

/// Handle to a running background delivery task
pub struct BackgroundSync {
    command_tx: mpsc::Sender<SyncCommand>,
    task: JoinHandle<()>,
}

impl BackgroundSync {
    pub(crate) fn spawn(sync: Arc<ChatSync>, project_id: String) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        let task = tokio::spawn(background_sync_task(sync, project_id, command_rx));
        Self { command_tx, task }
    }

    /// Ask for an immediate delivery attempt
    ///
    /// Returns false when the task has stopped. Requests arriving while an
    /// attempt is queued are coalesced.
    pub fn retry(&self) -> bool {
        match self.command_tx.try_send(SyncCommand::Retry) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stop the task, cancelling any scheduled retry
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(SyncCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("Background sync task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Deliver pending messages if there are any
async fn attempt(sync: &ChatSync, project_id: &str) -> Option<DeliveryOutcome> {
    if sync.registry().pending_count(project_id) == 0 {
        debug!("Nothing pending for {}", project_id);
        return None;
    }
    match sync.sync_pending(project_id).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!("Background delivery for {} failed: {}", project_id, e);
            None
        }
    }
}

async fn background_sync_task(
    sync: Arc<ChatSync>,
    project_id: String,
    mut command_rx: mpsc::Receiver<SyncCommand>,
) {
    let options = *sync.options();
    let mut auth_rx = sync.auth().subscribe();
    auth_rx.borrow_and_update();
    let mut auth_open = true;

    let initial = tokio::time::sleep(options.background_delay);
    tokio::pin!(initial);
    let mut initial_done = false;

    // Automatic retry schedule: next deadline and retries used so far
    let mut retry_at: Option<Instant> = None;
    let mut retries: u32 = 0;

    debug!("Background sync started for {}", project_id);

    loop {
        let outcome = tokio::select! {
            _ = &mut initial, if !initial_done => {
                initial_done = true;
                attempt(&sync, &project_id).await
            }
            changed = auth_rx.changed(), if auth_open => {
                if changed.is_err() {
                    auth_open = false;
                    continue;
                }
                if !*auth_rx.borrow_and_update() {
                    continue;
                }
                info!("Signed in, delivering pending messages of {}", project_id);
                retries = 0;
                attempt(&sync, &project_id).await
            }
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                retry_at = None;
                attempt(&sync, &project_id).await
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(SyncCommand::Retry) => {
                        retries = 0;
                        attempt(&sync, &project_id).await
                    }
                    Some(SyncCommand::Shutdown) | None => break,
                }
            }
        };

        match outcome {
            Some(DeliveryOutcome::Failed { error, .. }) if options.auto_retry => {
                match options.retry.next_delay(retries, &error) {
                    Some(delay) => {
                        debug!("Retrying {} in {:?}", project_id, delay);
                        retry_at = Some(Instant::now() + delay);
                        retries += 1;
                    }
                    None => {
                        warn!(
                            "Giving up automatic delivery for {} after {} retries",
                            project_id, retries
                        );
                        retry_at = None;
                    }
                }
            }
            Some(DeliveryOutcome::Failed { .. }) => {}
            Some(_) | None => {
                retry_at = None;
                retries = 0;
            }
        }
    }

    debug!("Background sync stopped for {}", project_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::auth::AuthHandle;
    use crate::models::{Message, Role};
    use crate::remote::{MemoryRemoteStore, RemoteError, RemoteStore};
    use crate::storage::MemoryLocalStore;
    use crate::sync::{DeliveryOutcome, RetryPolicy, SyncOptions};

    fn options(delay_ms: u64, auto_retry: bool) -> SyncOptions {
        SyncOptions {
            background_delay: Duration::from_millis(delay_ms),
            auto_retry,
            retry: RetryPolicy {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
                max_attempts: 3,
            },
            ..SyncOptions::default()
        }
    }

    fn setup(signed_in: bool, options: SyncOptions) -> (Arc<ChatSync>, Arc<MemoryRemoteStore>, Arc<AuthHandle>) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let auth = Arc::new(AuthHandle::new(signed_in));
        let sync = ChatSync::new(
            Arc::new(MemoryLocalStore::new()),
            Some(remote.clone() as Arc<dyn RemoteStore>),
            auth.clone(),
            options,
        );
        (Arc::new(sync), remote, auth)
    }

    /// Poll until the server holds `count` messages or a second passes
    async fn wait_for_delivery(remote: &MemoryRemoteStore, count: usize) -> bool {
        for _ in 0..100 {
            if remote.messages("p1").len() == count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_delivers_after_initial_delay() {
        let (sync, remote, _auth) = setup(true, options(20, false));
        remote.set_offline(true);
        sync.append("p1", vec![Message::with_id("a", Role::User, "hi")])
            .await
            .unwrap();
        remote.set_offline(false);

        let background = sync.spawn_background_sync("p1");
        assert!(wait_for_delivery(&remote, 1).await);
        assert_eq!(sync.registry().pending_count("p1"), 0);
        background.shutdown().await;
    }

    #[tokio::test]
    async fn test_sign_in_triggers_delivery() {
        let (sync, remote, auth) = setup(false, options(60_000, false));
        sync.append("p1", vec![Message::with_id("a", Role::User, "hi")])
            .await
            .unwrap();

        let background = sync.spawn_background_sync("p1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(remote.messages("p1").is_empty());

        auth.set_authenticated(true);
        assert!(wait_for_delivery(&remote, 1).await);
        background.shutdown().await;
    }

    #[tokio::test]
    async fn test_explicit_retry() {
        let (sync, remote, _auth) = setup(true, options(60_000, false));
        remote.set_offline(true);
        sync.append("p1", vec![Message::with_id("a", Role::User, "hi")])
            .await
            .unwrap();

        let background = sync.spawn_background_sync("p1");
        remote.set_offline(false);
        assert!(background.retry());
        assert!(wait_for_delivery(&remote, 1).await);

        background.shutdown().await;
    }

    #[tokio::test]
    async fn test_timer_retry_and_manual_delivery_overlap() {
        let (sync, remote, _auth) = setup(true, options(0, false));
        remote.set_offline(true);
        sync.append(
            "p1",
            vec![
                Message::with_id("a", Role::User, "hi"),
                Message::with_id("b", Role::User, "there"),
            ],
        )
        .await
        .unwrap();
        remote.set_offline(false);
        remote.set_latency(Some(Duration::from_millis(20)));

        let background = sync.spawn_background_sync("p1");
        assert!(background.retry());
        let manual = sync.sync_pending("p1").await.unwrap();

        assert!(matches!(
            manual,
            DeliveryOutcome::Delivered { count: 2 } | DeliveryOutcome::Nothing
        ));
        assert!(wait_for_delivery(&remote, 2).await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(remote.append_calls(), 1);
        assert_eq!(sync.registry().pending_count("p1"), 0);
        assert!(sync.status("p1").last_error.is_none());
        background.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_automatic_retry_by_default() {
        let (sync, remote, _auth) = setup(true, options(0, false));
        remote.set_offline(true);
        sync.append("p1", vec![Message::with_id("a", Role::User, "hi")])
            .await
            .unwrap();

        let background = sync.spawn_background_sync("p1");
        tokio::time::sleep(Duration::from_millis(30)).await;
        remote.set_offline(false);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(remote.messages("p1").is_empty());
        assert_eq!(sync.registry().pending_count("p1"), 1);
        background.shutdown().await;
    }

    #[tokio::test]
    async fn test_auto_retry_with_backoff() {
        let (sync, remote, _auth) = setup(true, options(0, true));
        remote.set_offline(true);
        sync.append("p1", vec![Message::with_id("a", Role::User, "hi")])
            .await
            .unwrap();
        remote.set_offline(false);
        remote.fail_next(RemoteError::Timeout);

        let background = sync.spawn_background_sync("p1");
        assert!(wait_for_delivery(&remote, 1).await);
        background.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let (sync, _remote, _auth) = setup(true, options(60_000, true));
        let background = sync.spawn_background_sync("p1");
        assert!(!background.is_finished());
        background.shutdown().await;
    }
}
