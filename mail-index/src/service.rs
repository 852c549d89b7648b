//! Caller-facing search service
//!
//! Wraps the indexer process and the progress tracker behind the four
//! operations a mail client needs. All methods are cheap for the caller's
//! runtime: indexing happens on the worker thread.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::crypto::{Decryptor, KeyMaterial};
use crate::error::{IndexError, Result};
use crate::progress::{ProgressState, ProgressTracker};
use crate::remote::MailboxSource;
use crate::store::{IndexStore, StoreProvider};
use crate::sync::SyncSettings;
use crate::types::SearchFilters;
use crate::worker::IndexerProcess;

struct TrackedProgress {
    store: Arc<dyn IndexStore>,
    tracker: ProgressTracker,
}

pub struct MailSearch {
    process: IndexerProcess,
    remote: Arc<dyn MailboxSource>,
    poll_interval: Duration,
    progress: Mutex<Option<TrackedProgress>>,
}

impl MailSearch {
    pub fn new(
        provider: Arc<dyn StoreProvider>,
        remote: Arc<dyn MailboxSource>,
        decryptor: Arc<dyn Decryptor>,
        config: &Config,
    ) -> Self {
        Self::with_settings(
            provider,
            remote,
            decryptor,
            config.sync_settings(),
            config.poll_interval(),
        )
    }

    pub fn with_settings(
        provider: Arc<dyn StoreProvider>,
        remote: Arc<dyn MailboxSource>,
        decryptor: Arc<dyn Decryptor>,
        settings: SyncSettings,
        poll_interval: Duration,
    ) -> Self {
        Self {
            process: IndexerProcess::new(provider, remote.clone(), decryptor, settings),
            remote,
            poll_interval,
            progress: Mutex::new(None),
        }
    }

    /// Start (or keep) background indexing for `user_id`
    pub async fn start_indexing(&self, user_id: &str, keys: KeyMaterial) -> Result<()> {
        self.process.start(user_id, keys).await?;

        let Some(active) = self.process.active().await else {
            debug!("Indexer for {} was stopped before it became active", user_id);
            return Ok(());
        };

        let mut progress = self.progress.lock().await;
        let current = progress
            .as_ref()
            .is_some_and(|tracked| Arc::ptr_eq(&tracked.store, &active.store));
        if !current {
            *progress = Some(TrackedProgress {
                tracker: ProgressTracker::spawn(
                    active.store.clone(),
                    self.remote.clone(),
                    self.poll_interval,
                ),
                store: active.store,
            });
        }
        Ok(())
    }

    pub async fn stop_indexing(&self) -> Result<()> {
        self.progress.lock().await.take();
        self.process.stop().await
    }

    /// Ids of indexed messages matching `query` and `filters`
    pub async fn search(&self, query: &str, filters: &SearchFilters) -> Result<Vec<String>> {
        let active = self.process.active().await.ok_or(IndexError::NotRunning)?;
        active.store.query(query, filters).await
    }

    pub async fn progress(&self) -> ProgressState {
        match &*self.progress.lock().await {
            Some(tracked) => tracked.tracker.current(),
            None => ProgressState::Unavailable(IndexError::NotRunning.to_string()),
        }
    }

    /// User currently being indexed
    pub async fn active_user(&self) -> Option<String> {
        self.process.active().await.map(|active| active.user_id)
    }
}
