//! Remote mailbox source
//!
//! The remote API is consumed through [`MailboxSource`]; its wire format is
//! not part of this crate.

use async_trait::async_trait;

use crate::error::Result;

pub mod fixture;
pub mod types;

pub use fixture::StaticMailboxSource;
pub use types::*;

/// Paginated, direction- and cutoff-aware access to the user's threads
#[async_trait]
pub trait MailboxSource: Send + Sync {
    /// Fetch one page of threads ordered by `request.order`
    ///
    /// Every returned thread lies strictly beyond `request.cutoff` in the
    /// requested direction. When `request.cursor` is set the page continues
    /// right after the item the cursor was issued for.
    async fn fetch_page(&self, request: &PageRequest) -> Result<ThreadPage>;

    /// Count indexable threads and how many fall inside `[oldest, newest]`
    async fn indexable_count(&self, oldest: i64, newest: i64) -> Result<IndexableCount>;
}
