//! Indexing progress tracker
//!
//! Polls the store's saved coverage and asks the remote how many threads
//! that range covers. Polling ends once the index is complete or on the
//! first error; the last state stays readable.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::remote::{IndexableCount, MailboxSource};
use crate::store::IndexStore;

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub num_indexable_threads: u64,
    pub num_threads_indexed: u64,
    pub is_index_complete: bool,
    /// 0..=100, never decreases within one tracker
    pub percent: u8,
}

impl ProgressSnapshot {
    fn from_count(count: IndexableCount, floor: u8) -> Self {
        let percent = if count.is_index_complete {
            100
        } else if count.num_indexable_threads == 0 {
            0
        } else {
            // Capped below 100 until the remote reports completion
            let ratio = count.num_threads_indexed.saturating_mul(100) / count.num_indexable_threads;
            ratio.min(99) as u8
        };

        Self {
            num_indexable_threads: count.num_indexable_threads,
            num_threads_indexed: count.num_threads_indexed,
            is_index_complete: count.is_index_complete,
            percent: percent.max(floor),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressState {
    /// Nothing indexed yet
    Waiting,
    Indexing(ProgressSnapshot),
    Complete(ProgressSnapshot),
    /// Progress could not be computed; polling has stopped
    Unavailable(String),
}

impl ProgressState {
    /// Terminal states end polling
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressState::Complete(_) | ProgressState::Unavailable(_))
    }

    pub fn snapshot(&self) -> Option<ProgressSnapshot> {
        match self {
            ProgressState::Indexing(snapshot) | ProgressState::Complete(snapshot) => Some(*snapshot),
            _ => None,
        }
    }
}

/// Background poller publishing [`ProgressState`]
pub struct ProgressTracker {
    state: watch::Receiver<ProgressState>,
    handle: JoinHandle<()>,
}

impl ProgressTracker {
    /// Start polling on the current runtime
    pub fn spawn(
        store: Arc<dyn IndexStore>,
        remote: Arc<dyn MailboxSource>,
        interval: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(ProgressState::Waiting);

        let handle = tokio::spawn(async move {
            debug!("Starting progress polling every {:?}", interval);
            let mut floor = 0u8;

            loop {
                let state = match poll(store.as_ref(), remote.as_ref(), floor).await {
                    Ok(state) => state,
                    Err(e) => {
                        warn!("Index progress unavailable: {}", e);
                        ProgressState::Unavailable(e.to_string())
                    }
                };

                if let Some(snapshot) = state.snapshot() {
                    floor = snapshot.percent;
                }
                let terminal = state.is_terminal();
                tx.send_replace(state);

                if terminal {
                    info!("Progress polling finished");
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });

        Self { state: rx, handle }
    }

    /// Most recently published state
    pub fn current(&self) -> ProgressState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressState> {
        self.state.clone()
    }

    /// Whether polling has ended
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn poll(store: &dyn IndexStore, remote: &dyn MailboxSource, floor: u8) -> Result<ProgressState> {
    let metadata = store.metadata().await?;
    let (Some(oldest), Some(newest)) = (
        metadata.oldest_indexed_timestamp,
        metadata.newest_indexed_timestamp,
    ) else {
        return Ok(ProgressState::Waiting);
    };

    let mut count = remote.indexable_count(oldest, newest).await?;
    if metadata.is_resuming() {
        // Ties at a boundary with a pending cursor walk are not indexed yet
        count.is_index_complete = false;
    }
    let snapshot = ProgressSnapshot::from_count(count, floor);
    if snapshot.is_index_complete {
        Ok(ProgressState::Complete(snapshot))
    } else {
        Ok(ProgressState::Indexing(snapshot))
    }
}
