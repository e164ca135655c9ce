//! In-memory local store
//!
//! Volatile store used for embedding and tests. `fail_next` injects a
//! single failure into the next operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::error::{StorageError, StorageResult};
use super::LocalStore;
use crate::models::{Snapshot, StoredChat};

#[derive(Default)]
struct Records {
    chats: HashMap<String, StoredChat>,
    snapshots: HashMap<String, Snapshot>,
}

/// Local store kept in process memory
#[derive(Default)]
pub struct MemoryLocalStore {
    records: Mutex<Records>,
    failures: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` operations fail
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check(&self) -> StorageResult<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut Records) -> T) -> StorageResult<T> {
        self.check()?;
        let mut records = self
            .records
            .lock()
            .map_err(|_| StorageError::Unavailable("record lock poisoned".into()))?;
        Ok(f(&mut records))
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get_messages(&self, project_id: &str) -> StorageResult<Option<StoredChat>> {
        self.with_records(|r| r.chats.get(project_id).cloned())
    }

    async fn set_messages(&self, project_id: &str, chat: &StoredChat) -> StorageResult<()> {
        self.with_records(|r| {
            r.chats.insert(project_id.to_string(), chat.clone());
        })?;
        self.record_write();
        Ok(())
    }

    async fn get_snapshot(&self, project_id: &str) -> StorageResult<Option<Snapshot>> {
        self.with_records(|r| r.snapshots.get(project_id).cloned())
    }

    async fn set_snapshot(&self, project_id: &str, snapshot: &Snapshot) -> StorageResult<()> {
        self.with_records(|r| {
            r.snapshots.insert(project_id.to_string(), snapshot.clone());
        })?;
        self.record_write();
        Ok(())
    }

    async fn delete_by_id(&self, project_id: &str) -> StorageResult<()> {
        self.with_records(|r| {
            r.chats.remove(project_id);
            r.snapshots.remove(project_id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, Role};

    #[tokio::test]
    async fn test_round_trip() {
        let store = MemoryLocalStore::new();
        let chat = StoredChat::new(vec![Message::with_id("m1", Role::User, "hi")]);
        store.set_messages("p1", &chat).await.unwrap();

        assert_eq!(store.get_messages("p1").await.unwrap(), Some(chat));
        assert_eq!(store.write_count(), 1);
        assert!(store.get_messages("p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_next() {
        let store = MemoryLocalStore::new();
        store.fail_next(1);

        assert!(store.get_messages("p1").await.is_err());
        assert!(store.get_messages("p1").await.is_ok());
    }
}
