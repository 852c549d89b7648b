use std::time::Duration;

use crate::remote::{SortDirection, TimestampField};

/// Threads requested per page on desktop runtimes
pub const DESKTOP_PAGE_SIZE: usize = 50;
/// Pause between pages on desktop runtimes
pub const DESKTOP_PAGE_DELAY: Duration = Duration::from_millis(100);
/// Threads requested per page on constrained (mobile/battery) runtimes
pub const CONSTRAINED_PAGE_SIZE: usize = 10;
/// Pause between pages on constrained runtimes
pub const CONSTRAINED_PAGE_DELAY: Duration = Duration::from_millis(1000);
/// Pause between two sync cycles
pub const DEFAULT_CYCLE_DELAY: Duration = Duration::from_secs(300);

/// Engine settings, fixed for one indexing session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Thread timestamp ordering the whole index
    pub ordering: TimestampField,
    /// Continue a pass with the server cursor instead of the page edge
    pub cursor_continuation: bool,
    pub page_size: usize,
    /// Yield between two pages of a pass
    pub page_delay: Duration,
    /// Sleep between two cycles
    pub cycle_delay: Duration,
}

impl SyncSettings {
    /// Desktop settings for `ordering`
    ///
    /// Cursor continuation defaults to on for `ThreadContent` and off for
    /// `LastEmail`.
    pub fn for_ordering(ordering: TimestampField) -> Self {
        Self {
            ordering,
            cursor_continuation: matches!(ordering, TimestampField::ThreadContent),
            page_size: DESKTOP_PAGE_SIZE,
            page_delay: DESKTOP_PAGE_DELAY,
            cycle_delay: DEFAULT_CYCLE_DELAY,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::for_ordering(TimestampField::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The remote has nothing further in this direction
    Completed,
    /// Cancelled between pages
    Stopped,
    /// Aborted by a remote or store error; saved pages stay valid
    Failed(String),
}

/// Summary of one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub direction: SortDirection,
    /// Pages fetched and saved
    pub pages: usize,
    /// Documents written
    pub documents: usize,
    /// Emails skipped because they failed to decrypt
    pub skipped: usize,
    pub outcome: PassOutcome,
}

impl PassReport {
    pub fn new(direction: SortDirection) -> Self {
        Self {
            direction,
            pages: 0,
            documents: 0,
            skipped: 0,
            outcome: PassOutcome::Completed,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.outcome == PassOutcome::Completed
    }
}

/// Summary of one cycle: the desc pass followed by the asc pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub desc: PassReport,
    pub asc: PassReport,
}

impl CycleReport {
    pub fn documents(&self) -> usize {
        self.desc.documents + self.asc.documents
    }

    pub fn is_completed(&self) -> bool {
        self.desc.is_completed() && self.asc.is_completed()
    }

    pub fn is_stopped(&self) -> bool {
        self.desc.outcome == PassOutcome::Stopped || self.asc.outcome == PassOutcome::Stopped
    }
}
