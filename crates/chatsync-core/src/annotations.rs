//! Pending and error markers carried alongside a message
//!
//! The markers are client bookkeeping: they live in the local log so a
//! restart knows what still has to be delivered, and are stripped before
//! anything is sent upstream.

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use crate::models::{Annotation, Message, SyncMarker, HIDDEN, NO_STORE, PENDING_SYNC, SYNC_ERROR};

/// Discriminators that never leave the client
pub const LOCAL_ONLY_KINDS: [&str; 2] = [PENDING_SYNC, SYNC_ERROR];

/// Field names that have carried the annotation list over time
const ANNOTATION_FIELDS: [&str; 2] = ["annotations", "messageAnnotations"];

/// Read the annotation list from a raw message record
///
/// Either field name is accepted. Entries that cannot be decoded are kept as
/// opaque payloads.
pub fn extract(raw: &Value) -> Vec<Annotation> {
    let Some(list) = ANNOTATION_FIELDS
        .iter()
        .find_map(|field| raw.get(*field).and_then(Value::as_array))
    else {
        return Vec::new();
    };

    list.iter()
        .map(|entry| {
            serde_json::from_value(entry.clone()).unwrap_or_else(|e| {
                debug!("Keeping undecodable annotation as opaque payload: {}", e);
                Annotation::Other(entry.clone())
            })
        })
        .collect()
}

fn is_local_only(annotation: &Annotation) -> bool {
    annotation
        .kind()
        .is_some_and(|kind| LOCAL_ONLY_KINDS.contains(&kind))
}

/// Drop client bookkeeping before a message goes to the server
pub fn normalize_for_server(annotations: &[Annotation]) -> Vec<Annotation> {
    annotations
        .iter()
        .filter(|a| !is_local_only(a))
        .cloned()
        .collect()
}

/// Copy of `message` marked as awaiting delivery, with an error marker when given
pub fn add_pending(message: &Message, error: Option<&str>) -> Message {
    let mut marked = clear_pending(message);
    let now = Utc::now();

    marked
        .annotations
        .push(Annotation::Sync(SyncMarker::PendingSync {
            queued_at: Some(now),
        }));
    if let Some(error) = error {
        marked.annotations.push(Annotation::Sync(SyncMarker::SyncError {
            error: error.to_string(),
            failed_at: Some(now),
        }));
    }

    marked
}

/// Copy of `message` without pending or error markers
pub fn clear_pending(message: &Message) -> Message {
    let mut cleared = message.clone();
    cleared.annotations.retain(|a| !is_local_only(a));
    cleared
}

pub fn is_pending(message: &Message) -> bool {
    message.has_annotation(PENDING_SYNC)
}

/// Error text of the delivery failure marker, if any
pub fn sync_error_of(message: &Message) -> Option<&str> {
    message.annotations.iter().find_map(|a| match a {
        Annotation::Sync(SyncMarker::SyncError { error, .. }) => Some(error.as_str()),
        Annotation::Other(value) if a.kind() == Some(SYNC_ERROR) => {
            value.get("error").and_then(Value::as_str)
        }
        _ => None,
    })
}

pub fn is_no_store(message: &Message) -> bool {
    message.has_annotation(NO_STORE)
}

pub fn is_hidden(message: &Message) -> bool {
    message.has_annotation(HIDDEN)
}

impl Message {
    /// Copy suitable for the remote store
    pub fn for_server(&self) -> Message {
        let mut outbound = self.clone();
        outbound.annotations = normalize_for_server(&self.annotations);
        outbound
    }
}
