//! Paginated history loading
//!
//! Long conversations are fetched from the remote store a page at a time.
//! The number of pages retained client-side is capped; past the ceiling the
//! loader stops asking the server and reports the policy boundary instead.
//! A rate-limited server ends loading early with a partial, non-fatal result.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::HistoryConfig;
use crate::models::Message;
use crate::ordering::sort_by_sequence;
use crate::remote::{Page, RemoteResult, RemoteStore};

/// Messages requested per page
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Pages retained client-side (1000 messages at the default page size)
pub const DEFAULT_MAX_PAGES: usize = 20;

/// Incremental progress of a full history load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryProgress {
    pub loaded: usize,
    pub total: usize,
    pub page: usize,
    pub is_complete: bool,
    pub is_rate_limited: bool,
}

/// Why a full history load stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every message the server has was retrieved
    Complete,
    /// The page ceiling was reached; older history stays on the server
    PageLimit,
    /// The server rate-limited us; the result is partial
    RateLimited,
}

/// Result of a full history load
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryLoad {
    pub messages: Vec<Message>,
    pub total: usize,
    pub stop: StopReason,
}

/// Result of fetching one more page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// A page was fetched; `appended` may be 0 for an empty page
    Loaded { appended: usize, total: usize },
    /// Nothing left on the server
    Exhausted,
    /// The page ceiling is reached; no request was made
    CeilingReached,
    /// The server refused with a rate limit
    RateLimited,
}

/// Page-by-page reader over a project's server log
pub struct HistoryLoader {
    remote: Arc<dyn RemoteStore>,
    config: HistoryConfig,
}

impl HistoryLoader {
    pub fn new(remote: Arc<dyn RemoteStore>, config: HistoryConfig) -> Self {
        Self { remote, config }
    }

    pub fn config(&self) -> HistoryConfig {
        self.config
    }

    /// Fetch one page, normalized into sequence order
    pub async fn load_page(
        &self,
        project_id: &str,
        offset: usize,
        page_size: usize,
    ) -> RemoteResult<Page> {
        let mut page = self
            .remote
            .get_messages_page(project_id, offset, page_size)
            .await?;
        sort_by_sequence(&mut page.messages);
        Ok(page)
    }

    /// Start an incremental cursor at the beginning of the log
    pub fn cursor(&self, project_id: &str) -> HistoryCursor {
        HistoryCursor {
            remote: Arc::clone(&self.remote),
            project_id: project_id.to_string(),
            config: self.config,
            messages: Vec::new(),
            seen: HashSet::new(),
            next_offset: 0,
            known_total: None,
            pages_loaded: 0,
            drained: false,
        }
    }

    /// Fetch pages until complete, the ceiling, or a rate limit
    ///
    /// `on_progress` is called after every step. A failure other than a
    /// rate limit is returned so the caller can fall back to local data.
    pub async fn load_all<F>(&self, project_id: &str, mut on_progress: F) -> RemoteResult<HistoryLoad>
    where
        F: FnMut(HistoryProgress) + Send,
    {
        let mut cursor = self.cursor(project_id);

        let stop = loop {
            let outcome = cursor.load_next().await?;
            let stop = match outcome {
                // A page of already-seen ids still advances the offset
                PageOutcome::Loaded { .. } if !cursor.is_drained() && !cursor.is_complete() => None,
                PageOutcome::Loaded { .. } | PageOutcome::Exhausted => Some(StopReason::Complete),
                PageOutcome::CeilingReached => Some(StopReason::PageLimit),
                PageOutcome::RateLimited => Some(StopReason::RateLimited),
            };

            on_progress(HistoryProgress {
                loaded: cursor.loaded(),
                total: cursor.total(),
                page: cursor.pages_loaded(),
                is_complete: stop == Some(StopReason::Complete),
                is_rate_limited: stop == Some(StopReason::RateLimited),
            });

            if let Some(stop) = stop {
                break stop;
            }
        };

        match stop {
            StopReason::Complete => debug!(
                "Loaded full history of {} ({} messages)",
                project_id,
                cursor.loaded()
            ),
            StopReason::PageLimit => info!(
                "History of {} capped at {} of {} messages",
                project_id,
                cursor.loaded(),
                cursor.total()
            ),
            StopReason::RateLimited => warn!(
                "History of {} rate limited after {} messages",
                project_id,
                cursor.loaded()
            ),
        }

        let total = cursor.total();
        Ok(HistoryLoad {
            messages: cursor.into_messages(),
            total,
            stop,
        })
    }
}

/// Incremental "load older messages" state for one project
pub struct HistoryCursor {
    remote: Arc<dyn RemoteStore>,
    project_id: String,
    config: HistoryConfig,
    messages: Vec<Message>,
    seen: HashSet<String>,
    next_offset: usize,
    known_total: Option<usize>,
    pages_loaded: usize,
    /// Set once the server answered with an empty page
    drained: bool,
}

impl HistoryCursor {
    /// Fetch the next page unless a policy boundary is reached
    pub async fn load_next(&mut self) -> RemoteResult<PageOutcome> {
        if self.pages_loaded >= self.config.max_pages {
            debug!(
                "Page ceiling of {} reached for {}",
                self.config.max_pages, self.project_id
            );
            return Ok(PageOutcome::CeilingReached);
        }
        if self.drained || self.is_complete() {
            return Ok(PageOutcome::Exhausted);
        }

        let result = self
            .remote
            .get_messages_page(&self.project_id, self.next_offset, self.config.page_size)
            .await;
        let mut page = match result {
            Ok(page) => page,
            Err(e) if e.is_rate_limited() => return Ok(PageOutcome::RateLimited),
            Err(e) => return Err(e),
        };

        self.known_total = Some(page.total);
        self.pages_loaded += 1;

        if page.messages.is_empty() {
            self.drained = true;
            return Ok(PageOutcome::Loaded {
                appended: 0,
                total: page.total,
            });
        }

        self.next_offset += page.messages.len();
        sort_by_sequence(&mut page.messages);

        let before = self.messages.len();
        for message in page.messages {
            if self.seen.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }
        sort_by_sequence(&mut self.messages);

        Ok(PageOutcome::Loaded {
            appended: self.messages.len() - before,
            total: page.total,
        })
    }

    /// Whether every message the server reported has been requested
    pub fn is_complete(&self) -> bool {
        self.known_total
            .is_some_and(|total| self.next_offset >= total)
    }

    /// Whether the server answered with an empty page
    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn loaded(&self) -> usize {
        self.messages.len()
    }

    /// Server-reported total, or what has been loaded when unknown
    pub fn total(&self) -> usize {
        self.known_total.unwrap_or(self.messages.len())
    }

    pub fn known_total(&self) -> Option<usize> {
        self.known_total
    }

    pub fn pages_loaded(&self) -> usize {
        self.pages_loaded
    }
}
