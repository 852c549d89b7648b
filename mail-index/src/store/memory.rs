//! In-memory index store
//!
//! Keeps a committed snapshot plus a log of staged changes. `reopen` builds a
//! fresh store from the committed snapshot only, which is what a restarted
//! process would find on disk.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use super::{IndexStore, StoreProvider};
use crate::error::{IndexError, Result};
use crate::types::{IndexMetadata, MetadataUpdate, SearchDocument, SearchFilters};

#[derive(Debug, Clone, Default)]
struct Snapshot {
    documents: HashMap<String, SearchDocument>,
    metadata: IndexMetadata,
}

#[derive(Debug, Default)]
struct Pending {
    /// `None` marks a removal
    documents: HashMap<String, Option<SearchDocument>>,
    metadata: Option<IndexMetadata>,
}

pub struct MemoryIndexStore {
    committed: RwLock<Snapshot>,
    pending: Mutex<Pending>,
    terminated: AtomicBool,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot::default())
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            committed: RwLock::new(snapshot),
            pending: Mutex::new(Pending::default()),
            terminated: AtomicBool::new(false),
        }
    }

    /// A fresh store holding only what has been saved
    pub async fn reopen(&self) -> Self {
        let snapshot = self.committed.read().await.clone();
        Self::from_snapshot(snapshot)
    }

    /// Saved documents, ordered by id
    pub async fn documents(&self) -> Vec<SearchDocument> {
        let committed = self.committed.read().await;
        let mut documents: Vec<SearchDocument> = committed.documents.values().cloned().collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));
        documents
    }

    fn ensure_open(&self) -> Result<()> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(IndexError::Terminated);
        }
        Ok(())
    }

    fn query_terms(text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|term| {
                term.trim_matches(|c: char| !c.is_alphanumeric())
                    .to_lowercase()
            })
            .filter(|term| !term.is_empty())
            .collect()
    }
}

impl Default for MemoryIndexStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn add(&self, doc: SearchDocument) -> Result<()> {
        self.ensure_open()?;
        let mut pending = self.pending.lock().await;
        pending.documents.insert(doc.id.clone(), Some(doc));
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let mut pending = self.pending.lock().await;
        pending.documents.insert(id.to_string(), None);
        Ok(())
    }

    async fn query(&self, text: &str, filters: &SearchFilters) -> Result<Vec<String>> {
        self.ensure_open()?;
        let terms = Self::query_terms(text);
        let committed = self.committed.read().await;

        let mut matches: Vec<&SearchDocument> = committed
            .documents
            .values()
            .filter(|doc| filters.matches(doc))
            .filter(|doc| {
                if terms.is_empty() {
                    return true;
                }
                let haystack = doc.search_text();
                terms.iter().all(|term| haystack.contains(term.as_str()))
            })
            .collect();

        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));

        Ok(matches
            .into_iter()
            .take(filters.limit())
            .map(|doc| doc.id.clone())
            .collect())
    }

    async fn metadata(&self) -> Result<IndexMetadata> {
        self.ensure_open()?;
        Ok(self.committed.read().await.metadata.clone())
    }

    async fn set_metadata(&self, update: MetadataUpdate) -> Result<()> {
        self.ensure_open()?;
        let mut pending = self.pending.lock().await;
        let mut metadata = match pending.metadata.take() {
            Some(metadata) => metadata,
            None => self.committed.read().await.metadata.clone(),
        };
        metadata.apply(update);
        pending.metadata = Some(metadata);
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        self.ensure_open()?;
        let mut pending = self.pending.lock().await;
        let mut committed = self.committed.write().await;

        let changes = pending.documents.len();
        for (id, doc) in pending.documents.drain() {
            match doc {
                Some(doc) => {
                    committed.documents.insert(id, doc);
                }
                None => {
                    committed.documents.remove(&id);
                }
            }
        }
        if let Some(metadata) = pending.metadata.take() {
            committed.metadata = metadata;
        }

        debug!(
            "Saved {} document changes ({} documents total)",
            changes,
            committed.documents.len()
        );
        Ok(())
    }

    async fn discard(&self) -> Result<()> {
        self.ensure_open()?;
        let mut pending = self.pending.lock().await;
        debug!("Discarding {} staged document changes", pending.documents.len());
        *pending = Pending::default();
        Ok(())
    }

    async fn terminate(&self) -> Result<()> {
        self.terminated.store(true, Ordering::SeqCst);
        let mut pending = self.pending.lock().await;
        *pending = Pending::default();
        Ok(())
    }

    async fn document_count(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.committed.read().await.documents.len() as u64)
    }
}

/// Per-user in-memory stores that survive a worker restart
///
/// Each `open` hands out a store rebuilt from the previous store's saved
/// state, mirroring a reload that reopens the on-disk index.
pub struct MemoryStoreProvider {
    stores: Mutex<HashMap<String, Arc<MemoryIndexStore>>>,
    open_delay: Option<Duration>,
}

impl MemoryStoreProvider {
    pub fn new() -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            open_delay: None,
        }
    }

    /// Delay every `open`, e.g. to exercise stop-during-start
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// The store most recently opened for `user_id`
    pub async fn store(&self, user_id: &str) -> Option<Arc<MemoryIndexStore>> {
        self.stores.lock().await.get(user_id).cloned()
    }
}

impl Default for MemoryStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreProvider for MemoryStoreProvider {
    async fn open(&self, user_id: &str) -> Result<Arc<dyn IndexStore>> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        let mut stores = self.stores.lock().await;
        let store = match stores.get(user_id) {
            Some(previous) => Arc::new(previous.reopen().await),
            None => Arc::new(MemoryIndexStore::new()),
        };
        stores.insert(user_id.to_string(), store.clone());
        Ok(store)
    }
}
