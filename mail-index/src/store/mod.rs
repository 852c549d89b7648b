//! Local index store
//!
//! Mutations are staged until [`IndexStore::save`]; queries and metadata
//! reads only see saved state, so a reader never observes a half-written
//! page.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{IndexMetadata, MetadataUpdate, SearchDocument, SearchFilters};

pub mod durable;
pub mod memory;

pub use durable::{TantivyIndexStore, TantivyStoreProvider};
pub use memory::{MemoryIndexStore, MemoryStoreProvider};

/// Keyed document store with persisted coverage metadata
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Insert or replace the document with `doc.id`
    async fn add(&self, doc: SearchDocument) -> Result<()>;

    /// Remove a document by id (no-op if absent)
    async fn remove(&self, id: &str) -> Result<()>;

    /// Ids of saved documents matching the text query and filters
    async fn query(&self, text: &str, filters: &SearchFilters) -> Result<Vec<String>>;

    /// Saved coverage metadata
    async fn metadata(&self) -> Result<IndexMetadata>;

    /// Stage a partial metadata update
    async fn set_metadata(&self, update: MetadataUpdate) -> Result<()>;

    /// Flush staged documents and metadata to durable storage
    async fn save(&self) -> Result<()>;

    /// Drop staged documents and metadata, keeping the last saved state
    async fn discard(&self) -> Result<()>;

    /// Release resources; staged changes are discarded
    async fn terminate(&self) -> Result<()>;

    /// Number of saved documents
    async fn document_count(&self) -> Result<u64>;
}

/// Opens the store that belongs to a user
#[async_trait]
pub trait StoreProvider: Send + Sync {
    async fn open(&self, user_id: &str) -> Result<Arc<dyn IndexStore>>;
}
