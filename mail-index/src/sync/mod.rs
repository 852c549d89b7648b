//! Bidirectional sync engine
//!
//! A cycle runs two passes. The desc pass walks from the oldest indexed
//! timestamp towards older mail, the asc pass from the newest indexed
//! timestamp towards newer mail. Every page is decrypted, written and saved
//! together with the widened coverage boundary before the next one is
//! requested, so an interrupted pass resumes from persisted metadata.
//!
//! In cursor mode the next page's cursor is saved with the page as the
//! pass's resume point. A restarted pass continues the walk from it instead
//! of re-applying the strict cutoff, which would skip the rest of a group of
//! threads sharing the boundary timestamp.

use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::decrypt_thread;
use crate::crypto::{Decryptor, KeyMaterial};
use crate::error::{IndexError, Result};
use crate::remote::{MailboxSource, PageRequest, SortDirection, ThreadOrder, ThreadPage};
use crate::store::IndexStore;
use crate::types::ResumePoint;

pub mod types;

pub use types::*;

enum PassEnd {
    Completed,
    Stopped,
}

pub struct SyncEngine {
    store: Arc<dyn IndexStore>,
    remote: Arc<dyn MailboxSource>,
    decryptor: Arc<dyn Decryptor>,
    keys: KeyMaterial,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn IndexStore>,
        remote: Arc<dyn MailboxSource>,
        decryptor: Arc<dyn Decryptor>,
        keys: KeyMaterial,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            remote,
            decryptor,
            keys,
            settings,
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run the desc pass to completion, then the asc pass
    ///
    /// A failed pass does not prevent the other one from running.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let desc = self.run_pass(SortDirection::Desc, cancel).await;
        let asc = self.run_pass(SortDirection::Asc, cancel).await;

        info!(
            "Sync cycle finished: {} documents ({:?} / {:?})",
            desc.documents + asc.documents,
            desc.outcome,
            asc.outcome
        );
        CycleReport { desc, asc }
    }

    /// Run one pass in `direction`
    pub async fn run_pass(&self, direction: SortDirection, cancel: &CancellationToken) -> PassReport {
        let mut report = PassReport::new(direction);

        match self.drive_pass(direction, cancel, &mut report).await {
            Ok(PassEnd::Completed) => {
                debug!(
                    "Pass {} completed: {} pages, {} documents",
                    direction, report.pages, report.documents
                );
                report.outcome = PassOutcome::Completed;
            }
            Ok(PassEnd::Stopped) => {
                info!("Pass {} stopped after {} pages", direction, report.pages);
                report.outcome = PassOutcome::Stopped;
            }
            Err(e) => {
                warn!("Pass {} aborted after {} pages: {}", direction, report.pages, e);
                // A failed page may have been staged in part
                if let Err(discard_error) = self.store.discard().await {
                    warn!("Failed to discard staged {} page: {}", direction, discard_error);
                }
                report.outcome = PassOutcome::Failed(e.to_string());
            }
        }

        report
    }

    /// Run cycles until `cancel` fires, sleeping `cycle_delay` in between
    pub async fn run_forever(&self, cancel: &CancellationToken) {
        info!(
            "Starting sync loop (ordering {:?}, page size {})",
            self.settings.ordering, self.settings.page_size
        );

        loop {
            self.run_cycle(cancel).await;
            if cancel.is_cancelled() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.settings.cycle_delay) => {}
            }
        }

        info!("Sync loop stopped");
    }

    async fn drive_pass(
        &self,
        direction: SortDirection,
        cancel: &CancellationToken,
        report: &mut PassReport,
    ) -> Result<PassEnd> {
        let mut metadata = self.store.metadata().await?;
        let (mut cutoff, mut cursor) = match metadata.resume_point(direction) {
            Some(point) if self.settings.cursor_continuation => {
                info!("Resuming {} pass from saved cursor", direction);
                (point.cutoff, Some(point.cursor.clone()))
            }
            _ => (metadata.boundary(direction), None),
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(PassEnd::Stopped);
            }

            let request = PageRequest {
                order: ThreadOrder {
                    field: self.settings.ordering,
                    direction,
                },
                cutoff,
                cursor: cursor.clone(),
                page_size: self.settings.page_size,
            };
            let page = self.remote.fetch_page(&request).await?;

            let Some((low, high)) = page_bounds(&page, &request) else {
                if metadata.resume_point(direction).is_some() {
                    metadata.set_resume_point(direction, None);
                    self.store.set_metadata(metadata.clone().into()).await?;
                    self.store.save().await?;
                }
                return Ok(PassEnd::Completed);
            };
            if request.cursor.is_none() {
                check_beyond_cutoff(direction, cutoff, low, high)?;
            }

            for thread in &page.threads {
                let decrypted =
                    decrypt_thread(thread, self.decryptor.as_ref(), &self.keys, self.settings.ordering);
                report.skipped += decrypted.skipped.len();
                for doc in decrypted.documents {
                    self.store.add(doc).await?;
                    report.documents += 1;
                }
            }

            let next_cursor = match page.next_cursor {
                Some(next) if page.has_next_page && self.settings.cursor_continuation => Some(next),
                _ => None,
            };
            metadata = metadata.widened(low, high);
            metadata.set_resume_point(
                direction,
                next_cursor.clone().map(|cursor| ResumePoint { cutoff, cursor }),
            );
            self.store.set_metadata(metadata.clone().into()).await?;
            self.store.save().await?;
            report.pages += 1;

            debug!(
                "Saved {} page {} ({} threads, {}..{})",
                direction,
                report.pages,
                page.threads.len(),
                low,
                high
            );

            if !page.has_next_page {
                return Ok(PassEnd::Completed);
            }

            match next_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    let edge = match direction {
                        SortDirection::Desc => low,
                        SortDirection::Asc => high,
                    };
                    if self.settings.cursor_continuation {
                        debug!("No cursor on {} page, continuing from edge {}", direction, edge);
                    }
                    cutoff = Some(edge);
                    cursor = None;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(PassEnd::Stopped),
                _ = sleep(self.settings.page_delay) => {}
            }
        }
    }
}

/// Lowest and highest ordering timestamp on a page
fn page_bounds(page: &ThreadPage, request: &PageRequest) -> Option<(i64, i64)> {
    let field = request.order.field;
    let mut timestamps = page.threads.iter().map(|thread| thread.timestamp(field));
    let first = timestamps.next()?;
    Some(timestamps.fold((first, first), |(low, high), ts| (low.min(ts), high.max(ts))))
}

/// A cutoff page must lie strictly beyond its cutoff, otherwise the pass
/// would request it again forever
fn check_beyond_cutoff(
    direction: SortDirection,
    cutoff: Option<i64>,
    low: i64,
    high: i64,
) -> Result<()> {
    let Some(cutoff) = cutoff else {
        return Ok(());
    };
    let advanced = match direction {
        SortDirection::Desc => high < cutoff,
        SortDirection::Asc => low > cutoff,
    };
    if advanced {
        Ok(())
    } else {
        Err(IndexError::Protocol(format!(
            "{} page {}..{} does not advance past cutoff {}",
            direction, low, high, cutoff
        )))
    }
}
