//! Command handlers

pub mod chat;
pub mod config;
pub mod snapshot;
pub mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;

use chatsync_core::remote::RemoteStore;
use chatsync_core::sync::{OpenedChat, SyncEvent, SyncOptions};
use chatsync_core::{AuthHandle, ChatSync, Config, HttpRemoteStore, SqliteLocalStore};

use crate::output::Output;

/// An engine wired from configuration, with its event stream
pub struct Engine {
    pub sync: Arc<ChatSync>,
    events: mpsc::UnboundedReceiver<SyncEvent>,
}

impl Engine {
    /// Open the local database and, when enabled, the remote store
    pub fn from_config(config: &Config) -> Result<Self> {
        let local = SqliteLocalStore::open(&config.sqlite_path())
            .with_context(|| format!("Failed to open database {:?}", config.sqlite_path()))?;

        let remote: Option<Arc<dyn RemoteStore>> = match (&config.remote_url, config.sync_enabled) {
            (Some(url), true) => Some(Arc::new(
                HttpRemoteStore::new(url, config.remote_token.clone())
                    .context("Invalid remote configuration")?,
            )),
            _ => None,
        };
        let auth = Arc::new(AuthHandle::new(config.remote_enabled()));

        let sync = Arc::new(ChatSync::new(
            Arc::new(local),
            remote,
            auth,
            SyncOptions::from(config),
        ));
        let events = sync
            .take_events()
            .context("Event stream already taken")?;

        Ok(Self { sync, events })
    }

    /// Open a project, reporting warnings raised while loading
    pub async fn open(
        &mut self,
        project_id: &str,
        rewind_to: Option<&str>,
        output: &Output,
    ) -> Result<OpenedChat> {
        let opened = self
            .sync
            .open(project_id, rewind_to)
            .await?
            .context("Project load was superseded")?;
        self.report_events(output);
        Ok(opened)
    }

    /// Print queued warnings; other events only matter to interactive front-ends
    pub fn report_events(&mut self, output: &Output) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SyncEvent::Warning(message) => output.warning(&message),
                SyncEvent::HistoryProgress(progress) => {
                    tracing::debug!("History page {}: {}/{}", progress.page, progress.loaded, progress.total);
                }
                _ => {}
            }
        }
    }
}
