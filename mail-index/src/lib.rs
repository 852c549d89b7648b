//! mail-index: client-side search index for end-to-end encrypted mail
//!
//! A background worker incrementally pulls the user's threads from the
//! remote mailbox, decrypts them locally and writes one search document per
//! message into a per-user index. The index grows in both directions from
//! its saved coverage boundaries, so it survives restarts and user switches
//! without ever holding the whole mailbox in memory.
//!
//! # Example
//!
//! ```no_run
//! use mail_index::config::Config;
//! use mail_index::crypto::{AeadDecryptor, KeyMaterial};
//! use mail_index::remote::StaticMailboxSource;
//! use mail_index::store::TantivyStoreProvider;
//! use mail_index::{MailSearch, SearchFilters};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> mail_index::Result<()> {
//!     let config = Config::default();
//!     let remote = Arc::new(StaticMailboxSource::from_json_file("mailbox.json".as_ref())?);
//!     let search = MailSearch::new(
//!         Arc::new(TantivyStoreProvider::new(&config.storage.index_root)),
//!         remote,
//!         Arc::new(AeadDecryptor::new()),
//!         &config,
//!     );
//!
//!     search
//!         .start_indexing("alice@example.com", KeyMaterial::from_base64("...")?)
//!         .await?;
//!     let ids = search.search("quarterly report", &SearchFilters::default()).await?;
//!     println!("{:?}", ids);
//!     search.stop_indexing().await
//! }
//! ```
//!
//! # Modules
//!
//! - [`adapter`]: Thread bundles to search documents
//! - [`content`]: Body and attachment text extraction
//! - [`crypto`]: Decryption capability
//! - [`store`]: Index stores (in-memory and Tantivy)
//! - [`remote`]: Remote mailbox source
//! - [`sync`]: Bidirectional sync engine
//! - [`worker`]: Isolated indexer process
//! - [`progress`]: Progress tracker
//! - [`service`]: Caller-facing facade

pub mod adapter;
pub mod config;
pub mod content;
pub mod crypto;
pub mod error;
pub mod progress;
pub mod remote;
pub mod service;
pub mod store;
pub mod sync;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use error::{IndexError, Result};
pub use progress::{ProgressSnapshot, ProgressState};
pub use service::MailSearch;
pub use types::{
    AddressObject, AttachmentMetadata, IndexMetadata, ResumePoint, SearchDocument, SearchFilters,
};
