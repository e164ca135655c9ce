//! Data models for chatsync
//!
//! Defines the core data structures: Message, Annotation, Snapshot and the
//! file tree a snapshot captures. Field names follow the JSON records the
//! local and remote stores exchange.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Annotation flag: the message must never be written to either store
pub const NO_STORE: &str = "no-store";
/// Annotation flag: the message is kept in the log but not rendered
pub const HIDDEN: &str = "hidden";
/// Discriminator of the pending delivery marker
pub const PENDING_SYNC: &str = "pending-sync";
/// Discriminator of the delivery failure marker
pub const SYNC_ERROR: &str = "sync-error";
/// Discriminator of the snapshot summary payload
pub const CHAT_SUMMARY: &str = "chatSummary";

/// Author of a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One part of a structured message body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        image: String,
        #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

/// Message body: plain text or a list of parts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Content-less bodies are partial writes, not user data
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.trim().is_empty(),
            MessageContent::Parts(parts) => parts.iter().all(|part| match part {
                ContentPart::Text { text } => text.trim().is_empty(),
                ContentPart::Image { image, .. } => image.is_empty(),
            }),
        }
    }

    /// Plain-text rendering (image parts are skipped)
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

/// Client bookkeeping markers, discriminated by `type`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncMarker {
    PendingSync {
        #[serde(default, rename = "queuedAt", skip_serializing_if = "Option::is_none")]
        queued_at: Option<DateTime<Utc>>,
    },
    SyncError {
        #[serde(default)]
        error: String,
        #[serde(default, rename = "failedAt", skip_serializing_if = "Option::is_none")]
        failed_at: Option<DateTime<Utc>>,
    },
}

/// A marker attached to a message
///
/// Annotations are opaque to the engine except for their discriminator:
/// the `type` field of an object, or the string itself for bare flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Annotation {
    Sync(SyncMarker),
    Flag(String),
    Other(serde_json::Value),
}

impl Annotation {
    /// Bare string flag such as `no-store`
    pub fn flag(name: impl Into<String>) -> Self {
        Annotation::Flag(name.into())
    }

    /// Discriminator used to classify the annotation
    pub fn kind(&self) -> Option<&str> {
        match self {
            Annotation::Sync(SyncMarker::PendingSync { .. }) => Some(PENDING_SYNC),
            Annotation::Sync(SyncMarker::SyncError { .. }) => Some(SYNC_ERROR),
            Annotation::Flag(name) => Some(name.as_str()),
            Annotation::Other(value) => value.get("type").and_then(|t| t.as_str()),
        }
    }
}

/// A single entry of a project's conversation log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Globally unique, author-assigned identifier
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, alias = "created_at", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        alias = "messageAnnotations",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub annotations: Vec<Annotation>,
    /// Position in the project's total order; provisional until the server confirms it
    #[serde(
        default,
        rename = "sequence_num",
        alias = "sequenceNum",
        skip_serializing_if = "Option::is_none"
    )]
    pub sequence_num: Option<u64>,
}

impl Message {
    /// Create a new message with a random id, stamped now
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), role, content)
    }

    /// Create a message with a specific id (for loading from storage)
    pub fn with_id(id: impl Into<String>, role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            created_at: Some(Utc::now()),
            annotations: Vec::new(),
            sequence_num: None,
        }
    }

    /// Set the sequence number (builder style)
    pub fn with_sequence(mut self, sequence_num: u64) -> Self {
        self.sequence_num = Some(sequence_num);
        self
    }

    /// Add an annotation (builder style)
    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn has_annotation(&self, kind: &str) -> bool {
        self.annotations.iter().any(|a| a.kind() == Some(kind))
    }
}

/// One node of a project file tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileEntry {
    File {
        content: String,
        #[serde(default, rename = "isBinary")]
        is_binary: bool,
    },
    Folder,
}

impl FileEntry {
    pub fn file(content: impl Into<String>) -> Self {
        FileEntry::File {
            content: content.into(),
            is_binary: false,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, FileEntry::Folder)
    }
}

/// Project file state keyed by path
pub type FileTree = BTreeMap<String, FileEntry>;

/// The project file state as of a given message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    /// Id of the message this checkpoint belongs to
    #[serde(rename = "chatIndex")]
    pub chat_index: String,
    pub files: FileTree,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Create a snapshot stamped now
    pub fn new(chat_index: impl Into<String>, files: FileTree, summary: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            chat_index: chat_index.into(),
            files,
            summary,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.values().filter(|e| !e.is_folder()).count()
    }
}

/// A project's locally cached chat record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredChat {
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl StoredChat {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }
}
