//! In-memory remote store
//!
//! Behaves like the real server: it numbers appended messages itself,
//! ignores duplicate ids and pages the log in sequence order. Faults can be
//! injected to exercise the offline, rate-limit and retry paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::error::{RemoteError, RemoteResult};
use super::{Page, RemoteStore};
use crate::models::{Message, Snapshot};
use crate::ordering::{max_sequence, sort_by_sequence};

#[derive(Default)]
struct ServerState {
    logs: HashMap<String, Vec<Message>>,
    snapshots: HashMap<String, Snapshot>,
    /// Errors returned by the next calls, in order
    queued_errors: Vec<RemoteError>,
    /// Page requests served before answering with a rate limit
    rate_limit_after: Option<usize>,
    latency: Option<Duration>,
}

/// Remote store kept in process memory
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<ServerState>,
    offline: AtomicBool,
    page_calls: AtomicUsize,
    append_calls: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a project's server log, keeping the given sequence numbers
    pub fn seed(&self, project_id: &str, messages: Vec<Message>) {
        let mut messages = messages;
        sort_by_sequence(&mut messages);
        self.lock().logs.insert(project_id.to_string(), messages);
    }

    /// Current server log of a project
    pub fn messages(&self, project_id: &str) -> Vec<Message> {
        self.lock().logs.get(project_id).cloned().unwrap_or_default()
    }

    pub fn snapshot(&self, project_id: &str) -> Option<Snapshot> {
        self.lock().snapshots.get(project_id).cloned()
    }

    /// Fail every call with `RemoteError::Offline` while set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next call with `error`
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().queued_errors.push(error);
    }

    /// Serve `pages` page requests, then answer with a rate limit
    pub fn set_rate_limited_after(&self, pages: Option<usize>) {
        self.lock().rate_limit_after = pages;
    }

    /// Delay every call
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ServerState> {
        // A panicking test thread must not wedge the fake server
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Common preamble of every call: latency, offline flag, queued errors
    async fn enter(&self) -> RemoteResult<()> {
        let latency = self.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Offline);
        }
        let mut state = self.lock();
        if !state.queued_errors.is_empty() {
            return Err(state.queued_errors.remove(0));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get_messages_page(
        &self,
        project_id: &str,
        offset: usize,
        limit: usize,
    ) -> RemoteResult<Page> {
        self.enter().await?;
        let served = self.page_calls.fetch_add(1, Ordering::SeqCst);

        let state = self.lock();
        if state.rate_limit_after.is_some_and(|limit| served >= limit) {
            return Err(RemoteError::RateLimited { retry_after: None });
        }

        let log = state.logs.get(project_id).map(Vec::as_slice).unwrap_or(&[]);
        let messages = log.iter().skip(offset).take(limit).cloned().collect();
        Ok(Page {
            messages,
            total: log.len(),
        })
    }

    async fn append_messages(&self, project_id: &str, messages: &[Message]) -> RemoteResult<()> {
        self.enter().await?;
        self.append_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.lock();
        let log = state.logs.entry(project_id.to_string()).or_default();
        let mut next = max_sequence(log) + 1;
        for message in messages {
            if log.iter().any(|m| m.id == message.id) {
                continue;
            }
            let mut stored = message.clone();
            stored.sequence_num = Some(next);
            next += 1;
            log.push(stored);
        }
        Ok(())
    }

    async fn clear_messages(&self, project_id: &str) -> RemoteResult<()> {
        self.enter().await?;
        self.lock().logs.remove(project_id);
        Ok(())
    }

    async fn get_snapshot(&self, project_id: &str) -> RemoteResult<Option<Snapshot>> {
        self.enter().await?;
        Ok(self.lock().snapshots.get(project_id).cloned())
    }

    async fn set_snapshot(&self, project_id: &str, snapshot: &Snapshot) -> RemoteResult<()> {
        self.enter().await?;
        self.lock()
            .snapshots
            .insert(project_id.to_string(), snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[tokio::test]
    async fn test_append_is_idempotent() {
        let remote = MemoryRemoteStore::new();
        let batch = vec![
            Message::with_id("m1", Role::User, "a"),
            Message::with_id("m2", Role::Assistant, "b"),
        ];

        remote.append_messages("p1", &batch).await.unwrap();
        remote.append_messages("p1", &batch).await.unwrap();

        let log = remote.messages("p1");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].sequence_num, Some(1));
        assert_eq!(log[1].sequence_num, Some(2));
    }

    #[tokio::test]
    async fn test_paging() {
        let remote = MemoryRemoteStore::new();
        let messages: Vec<Message> = (1..=5)
            .map(|i| Message::with_id(format!("m{}", i), Role::User, "x").with_sequence(i))
            .collect();
        remote.seed("p1", messages);

        let page = remote.get_messages_page("p1", 3, 10).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[0].id, "m4");
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let remote = MemoryRemoteStore::new();
        remote.fail_next(RemoteError::Timeout);
        assert_eq!(
            remote.get_snapshot("p1").await.unwrap_err(),
            RemoteError::Timeout
        );
        assert!(remote.get_snapshot("p1").await.is_ok());

        remote.set_offline(true);
        assert_eq!(
            remote.clear_messages("p1").await.unwrap_err(),
            RemoteError::Offline
        );
    }

    #[tokio::test]
    async fn test_rate_limit_after() {
        let remote = MemoryRemoteStore::new();
        remote.set_rate_limited_after(Some(1));
        assert!(remote.get_messages_page("p1", 0, 10).await.is_ok());
        assert!(remote
            .get_messages_page("p1", 10, 10)
            .await
            .unwrap_err()
            .is_rate_limited());
    }
}
