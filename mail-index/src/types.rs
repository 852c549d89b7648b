//! Index document and metadata types

use serde::{Deserialize, Serialize};

use crate::remote::SortDirection;

/// Mail address with its resolved display name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressObject {
    /// Display name, if one was resolved
    #[serde(default)]
    pub name: Option<String>,
    /// Mail address
    pub address: String,
}

impl AddressObject {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    pub fn named(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    /// Name and address joined for full-text indexing
    pub fn search_text(&self) -> String {
        match &self.name {
            Some(name) => format!("{} {}", name, self.address),
            None => self.address.clone(),
        }
    }
}

/// Decrypted attachment metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    pub id: String,
    pub filename: String,
    pub content_type: String,
}

/// One indexed message
///
/// Labels and read state are copied from the owning thread when the message
/// is indexed and are not re-synced afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDocument {
    /// Message identity, unique within an index
    pub id: String,
    /// Owning thread
    pub thread_id: String,
    /// Plain text body with quoted history, links and images removed
    pub content: String,
    pub subject: String,
    pub to: Vec<AddressObject>,
    pub cc: Vec<AddressObject>,
    pub bcc: Vec<AddressObject>,
    pub from: AddressObject,
    pub system_labels: Vec<String>,
    pub user_labels: Vec<String>,
    pub read: bool,
    /// Epoch milliseconds of the thread timestamp selected for this index
    pub updated_at: i64,
    pub attachments: Vec<AttachmentMetadata>,
}

impl SearchDocument {
    /// Every searchable text field, lowercased and joined
    pub fn search_text(&self) -> String {
        let mut parts = vec![self.subject.clone(), self.content.clone(), self.from.search_text()];
        parts.extend(
            self.to
                .iter()
                .chain(self.cc.iter())
                .chain(self.bcc.iter())
                .map(AddressObject::search_text),
        );
        parts.extend(self.attachments.iter().map(|a| a.filename.clone()));
        parts.join("\n").to_lowercase()
    }
}

/// Where an interrupted cursor walk picks up again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    /// Cutoff the walk was started with
    pub cutoff: Option<i64>,
    /// Server cursor for the next page
    pub cursor: String,
}

/// Timestamp range the index has fully scanned
///
/// Both bounds are `None` while the index is empty. While a pass has a
/// resume point, threads sharing the boundary timestamp on that side may
/// still be unfetched; the walk continues from the point before anything
/// else happens in that direction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub oldest_indexed_timestamp: Option<i64>,
    pub newest_indexed_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc_resume: Option<ResumePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asc_resume: Option<ResumePoint>,
}

impl IndexMetadata {
    /// True when no range has been scanned yet
    pub fn is_empty(&self) -> bool {
        self.oldest_indexed_timestamp.is_none() && self.newest_indexed_timestamp.is_none()
    }

    /// Whether `timestamp` lies inside the covered range
    pub fn covers(&self, timestamp: i64) -> bool {
        match (self.oldest_indexed_timestamp, self.newest_indexed_timestamp) {
            (Some(oldest), Some(newest)) => oldest <= timestamp && timestamp <= newest,
            _ => false,
        }
    }

    /// Coverage bound a pass in `direction` starts from
    pub fn boundary(&self, direction: SortDirection) -> Option<i64> {
        match direction {
            SortDirection::Desc => self.oldest_indexed_timestamp,
            SortDirection::Asc => self.newest_indexed_timestamp,
        }
    }

    pub fn resume_point(&self, direction: SortDirection) -> Option<&ResumePoint> {
        match direction {
            SortDirection::Desc => self.desc_resume.as_ref(),
            SortDirection::Asc => self.asc_resume.as_ref(),
        }
    }

    pub fn set_resume_point(&mut self, direction: SortDirection, point: Option<ResumePoint>) {
        match direction {
            SortDirection::Desc => self.desc_resume = point,
            SortDirection::Asc => self.asc_resume = point,
        }
    }

    /// True while either pass has an unfinished cursor walk
    pub fn is_resuming(&self) -> bool {
        self.desc_resume.is_some() || self.asc_resume.is_some()
    }

    /// Widen the covered range to include `[low, high]`
    ///
    /// Bounds only ever move outwards, so an empty index seeds from the
    /// first page in either direction.
    pub fn widened(&self, low: i64, high: i64) -> Self {
        Self {
            oldest_indexed_timestamp: Some(
                self.oldest_indexed_timestamp.map_or(low, |oldest| oldest.min(low)),
            ),
            newest_indexed_timestamp: Some(
                self.newest_indexed_timestamp.map_or(high, |newest| newest.max(high)),
            ),
            ..self.clone()
        }
    }

    /// Apply a partial update
    pub fn apply(&mut self, update: MetadataUpdate) {
        if let Some(oldest) = update.oldest_indexed_timestamp {
            self.oldest_indexed_timestamp = Some(oldest);
        }
        if let Some(newest) = update.newest_indexed_timestamp {
            self.newest_indexed_timestamp = Some(newest);
        }
        if let Some(point) = update.desc_resume {
            self.desc_resume = point;
        }
        if let Some(point) = update.asc_resume {
            self.asc_resume = point;
        }
    }
}

/// Partial metadata write; `None` fields are left untouched
///
/// For the resume points `Some(None)` clears the stored point.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetadataUpdate {
    pub oldest_indexed_timestamp: Option<i64>,
    pub newest_indexed_timestamp: Option<i64>,
    pub desc_resume: Option<Option<ResumePoint>>,
    pub asc_resume: Option<Option<ResumePoint>>,
}

impl From<IndexMetadata> for MetadataUpdate {
    fn from(metadata: IndexMetadata) -> Self {
        Self {
            oldest_indexed_timestamp: metadata.oldest_indexed_timestamp,
            newest_indexed_timestamp: metadata.newest_indexed_timestamp,
            desc_resume: Some(metadata.desc_resume),
            asc_resume: Some(metadata.asc_resume),
        }
    }
}

/// Structured filters applied on top of the text query
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SearchFilters {
    /// Every listed system label must be present
    #[serde(default)]
    pub system_labels: Vec<String>,
    /// Every listed user label must be present
    #[serde(default)]
    pub user_labels: Vec<String>,
    pub read: Option<bool>,
    pub thread_id: Option<String>,
    /// Inclusive lower bound on `updated_at`
    pub updated_after: Option<i64>,
    /// Inclusive upper bound on `updated_at`
    pub updated_before: Option<i64>,
    /// Maximum ids returned (defaults to [`DEFAULT_SEARCH_LIMIT`])
    pub limit: Option<usize>,
}

pub const DEFAULT_SEARCH_LIMIT: usize = 100;

impl SearchFilters {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT)
    }

    /// Whether a document passes every structured filter
    pub fn matches(&self, doc: &SearchDocument) -> bool {
        if !self
            .system_labels
            .iter()
            .all(|label| doc.system_labels.contains(label))
        {
            return false;
        }
        if !self
            .user_labels
            .iter()
            .all(|label| doc.user_labels.contains(label))
        {
            return false;
        }
        if self.read.is_some_and(|read| read != doc.read) {
            return false;
        }
        if self
            .thread_id
            .as_ref()
            .is_some_and(|thread_id| thread_id != &doc.thread_id)
        {
            return false;
        }
        if self.updated_after.is_some_and(|after| doc.updated_at < after) {
            return false;
        }
        if self.updated_before.is_some_and(|before| doc.updated_at > before) {
            return false;
        }
        true
    }
}
