//! In-memory mailbox source
//!
//! Serves a fixed set of threads with the same paging contract as the remote
//! API. Used by the operator binary (mailbox dumps) and by tests, which can
//! inspect the request log and inject failures.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::debug;

use super::types::*;
use super::MailboxSource;
use crate::error::{IndexError, Result};

/// A page request as received by [`StaticMailboxSource`]
#[derive(Debug, Clone)]
pub struct FetchRecord {
    pub request: PageRequest,
    pub at: Instant,
}

pub struct StaticMailboxSource {
    threads: RwLock<Vec<ThreadBundle>>,
    count_field: TimestampField,
    requests: Mutex<Vec<FetchRecord>>,
    fetch_calls: AtomicUsize,
    fail_fetches_from: Mutex<Option<usize>>,
    fail_counts: AtomicBool,
}

impl StaticMailboxSource {
    pub fn new(threads: Vec<ThreadBundle>) -> Self {
        Self {
            threads: RwLock::new(threads),
            count_field: TimestampField::default(),
            requests: Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            fail_fetches_from: Mutex::new(None),
            fail_counts: AtomicBool::new(false),
        }
    }

    /// Load a JSON array of [`ThreadBundle`]s
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let threads: Vec<ThreadBundle> = serde_json::from_str(&content)?;
        Ok(Self::new(threads))
    }

    /// Timestamp used by [`MailboxSource::indexable_count`]
    pub fn with_count_field(mut self, field: TimestampField) -> Self {
        self.count_field = field;
        self
    }

    /// Add a thread, as if new mail arrived
    pub async fn insert(&self, thread: ThreadBundle) {
        let mut threads = self.threads.write().await;
        threads.retain(|t| t.thread_id != thread.thread_id);
        threads.push(thread);
    }

    /// Every page request received so far
    pub async fn requests(&self) -> Vec<FetchRecord> {
        self.requests.lock().await.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Fail every fetch once `successful` more fetches have been served
    pub async fn fail_fetches_after(&self, successful: usize) {
        let mut fail_from = self.fail_fetches_from.lock().await;
        *fail_from = Some(self.fetch_count() + successful);
    }

    pub async fn clear_failures(&self) {
        *self.fail_fetches_from.lock().await = None;
        self.fail_counts.store(false, Ordering::SeqCst);
    }

    /// Make every [`MailboxSource::indexable_count`] call fail
    pub fn fail_counts(&self, fail: bool) {
        self.fail_counts.store(fail, Ordering::SeqCst);
    }

    fn encode_cursor(thread: &ThreadBundle, field: TimestampField) -> String {
        format!("{}:{}", thread.timestamp(field), thread.thread_id)
    }

    fn decode_cursor(cursor: &str) -> Result<(i64, String)> {
        let (timestamp, thread_id) = cursor
            .split_once(':')
            .ok_or_else(|| IndexError::Remote(format!("Malformed cursor: {}", cursor)))?;
        let timestamp = timestamp
            .parse::<i64>()
            .map_err(|e| IndexError::Remote(format!("Malformed cursor {}: {}", cursor, e)))?;
        Ok((timestamp, thread_id.to_string()))
    }
}

#[async_trait]
impl MailboxSource for StaticMailboxSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<ThreadPage> {
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(FetchRecord {
            request: request.clone(),
            at: Instant::now(),
        });

        if let Some(fail_from) = *self.fail_fetches_from.lock().await {
            if call >= fail_from {
                return Err(IndexError::Remote("Simulated fetch failure".to_string()));
            }
        }

        let field = request.order.field;
        let direction = request.order.direction;
        let after_cursor = request
            .cursor
            .as_deref()
            .map(Self::decode_cursor)
            .transpose()?;

        let threads = self.threads.read().await;
        let mut candidates: Vec<&ThreadBundle> = threads
            .iter()
            .filter(|thread| {
                let timestamp = thread.timestamp(field);
                match (request.cutoff, direction) {
                    (Some(cutoff), SortDirection::Desc) => timestamp < cutoff,
                    (Some(cutoff), SortDirection::Asc) => timestamp > cutoff,
                    (None, _) => true,
                }
            })
            .filter(|thread| {
                let Some((cursor_ts, cursor_id)) = &after_cursor else {
                    return true;
                };
                let key = (thread.timestamp(field), thread.thread_id.as_str());
                let cursor_key = (*cursor_ts, cursor_id.as_str());
                match direction {
                    SortDirection::Desc => key < cursor_key,
                    SortDirection::Asc => key > cursor_key,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            let a_key = (a.timestamp(field), a.thread_id.as_str());
            let b_key = (b.timestamp(field), b.thread_id.as_str());
            match direction {
                SortDirection::Asc => a_key.cmp(&b_key),
                SortDirection::Desc => b_key.cmp(&a_key),
            }
        });

        let has_next_page = candidates.len() > request.page_size;
        let page: Vec<ThreadBundle> = candidates
            .into_iter()
            .take(request.page_size)
            .cloned()
            .collect();
        let next_cursor = if has_next_page {
            page.last().map(|thread| Self::encode_cursor(thread, field))
        } else {
            None
        };

        debug!(
            "Serving {} threads ({}, cutoff {:?}, cursor {:?})",
            page.len(),
            direction,
            request.cutoff,
            request.cursor
        );

        Ok(ThreadPage {
            threads: page,
            has_next_page,
            next_cursor,
        })
    }

    async fn indexable_count(&self, oldest: i64, newest: i64) -> Result<IndexableCount> {
        if self.fail_counts.load(Ordering::SeqCst) {
            return Err(IndexError::Remote("Simulated count failure".to_string()));
        }

        let threads = self.threads.read().await;
        let num_indexable_threads = threads.len() as u64;
        let num_threads_indexed = threads
            .iter()
            .filter(|thread| {
                let timestamp = thread.timestamp(self.count_field);
                oldest <= timestamp && timestamp <= newest
            })
            .count() as u64;

        Ok(IndexableCount {
            num_indexable_threads,
            num_threads_indexed,
            is_index_complete: num_threads_indexed == num_indexable_threads,
        })
    }
}
