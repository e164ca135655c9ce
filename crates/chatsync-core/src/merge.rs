//! Reconciling a server log with a locally cached log
//!
//! The server is authoritative for every id it knows. Entries only the
//! client has are kept and numbered after the server's highest sequence
//! number, so they always sort after confirmed history.

use std::collections::HashSet;

use tracing::debug;

use crate::models::Message;
use crate::ordering::{assign_sequence_numbers, max_sequence, sort_by_sequence};

/// Result of merging two logs
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Canonical, fully sequenced log
    pub messages: Vec<Message>,
    /// Valid server messages taken
    pub server_count: usize,
    /// Local messages the server does not have yet
    pub local_only_count: usize,
    /// Valid local messages already known to the server
    pub duplicates_removed: usize,
}

/// Drop content-less entries, returning the survivors and how many were dropped
pub fn valid_messages(messages: &[Message]) -> (Vec<Message>, usize) {
    let valid: Vec<Message> = messages
        .iter()
        .filter(|m| !m.id.is_empty() && !m.content.is_empty())
        .cloned()
        .collect();
    let dropped = messages.len() - valid.len();
    (valid, dropped)
}

/// Merge a server log and a local log into one canonical log
pub fn merge(server: &[Message], local: &[Message]) -> MergeOutcome {
    let (mut server_valid, server_dropped) = valid_messages(server);
    let (local_valid, local_dropped) = valid_messages(local);
    if server_dropped + local_dropped > 0 {
        debug!(
            "Dropped {} server and {} local messages with empty content",
            server_dropped, local_dropped
        );
    }

    let mut seen: HashSet<String> = HashSet::with_capacity(server_valid.len());
    server_valid.retain(|m| seen.insert(m.id.clone()));

    let max_server_seq = max_sequence(&server_valid);
    // Unsequenced server entries still rank before anything local
    let server_assigned = assign_sequence_numbers(&mut server_valid);
    let next_seq = max_server_seq + server_assigned as u64 + 1;

    let valid_local_count = local_valid.len();
    let mut local_only: Vec<Message> = Vec::new();
    for message in local_valid {
        if seen.insert(message.id.clone()) {
            local_only.push(message);
        }
    }
    for (i, message) in local_only.iter_mut().enumerate() {
        message.sequence_num = Some(next_seq + i as u64);
    }

    let server_count = server_valid.len();
    let local_only_count = local_only.len();

    let mut messages = server_valid;
    messages.extend(local_only);
    sort_by_sequence(&mut messages);

    MergeOutcome {
        messages,
        server_count,
        local_only_count,
        duplicates_removed: valid_local_count - local_only_count,
    }
}
