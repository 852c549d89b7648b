//! Remote mailbox data structures

use serde::{Deserialize, Serialize};

use crate::types::{AddressObject, AttachmentMetadata};

/// Which thread timestamp orders the index
///
/// Decided once per indexing session and applied index-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampField {
    /// Time of the thread's most recent email
    LastEmail,
    /// Time of the thread's most recent content change
    ThreadContent,
}

impl Default for TimestampField {
    fn default() -> Self {
        TimestampField::ThreadContent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl std::fmt::Display for SortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "asc"),
            SortDirection::Desc => write!(f, "desc"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadOrder {
    pub field: TimestampField,
    pub direction: SortDirection,
}

/// Thread-level attributes inherited by every message at index time
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ThreadAttributes {
    #[serde(default)]
    pub system_labels: Vec<String>,
    #[serde(default)]
    pub user_labels: Vec<String>,
    #[serde(default)]
    pub read: bool,
}

/// Email that is stored in the clear (e.g. an unsent draft)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaintextEmail {
    pub id: String,
    pub from: AddressObject,
    #[serde(default)]
    pub to: Vec<AddressObject>,
    #[serde(default)]
    pub cc: Vec<AddressObject>,
    #[serde(default)]
    pub bcc: Vec<AddressObject>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text_body: String,
    #[serde(default)]
    pub html_body: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMetadata>,
}

/// Attachment whose filename and content type are sealed with the session key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedAttachment {
    pub id: String,
    /// Sealed JSON object `{ "filename": .., "content_type": .. }`
    pub encrypted_metadata: String,
}

/// Email encrypted at rest
///
/// The session key is sealed for the recipient's key material; every other
/// encrypted field is an independent datagram sealed with the session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEmail {
    pub id: String,
    pub from: AddressObject,
    #[serde(default)]
    pub to: Vec<AddressObject>,
    #[serde(default)]
    pub cc: Vec<AddressObject>,
    #[serde(default)]
    pub bcc: Vec<AddressObject>,
    pub encrypted_session_key: String,
    pub encrypted_subject: String,
    pub encrypted_text: String,
    #[serde(default)]
    pub encrypted_html: Option<String>,
    #[serde(default)]
    pub attachments: Vec<EncryptedAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Email {
    Plaintext(PlaintextEmail),
    Encrypted(EncryptedEmail),
}

impl Email {
    pub fn id(&self) -> &str {
        match self {
            Email::Plaintext(email) => &email.id,
            Email::Encrypted(email) => &email.id,
        }
    }
}

/// One remote thread with all of its emails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadBundle {
    pub thread_id: String,
    #[serde(default)]
    pub attributes: ThreadAttributes,
    #[serde(default)]
    pub emails: Vec<Email>,
    /// Epoch milliseconds of the most recent email
    pub last_email_updated_at: i64,
    /// Epoch milliseconds of the most recent content change
    pub thread_content_updated_at: i64,
}

impl ThreadBundle {
    pub fn timestamp(&self, field: TimestampField) -> i64 {
        match field {
            TimestampField::LastEmail => self.last_email_updated_at,
            TimestampField::ThreadContent => self.thread_content_updated_at,
        }
    }
}

/// One page request against the remote mailbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub order: ThreadOrder,
    /// Results must lie strictly beyond this timestamp in `order.direction`
    pub cutoff: Option<i64>,
    /// Continuation token from the previous page of the same query
    pub cursor: Option<String>,
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThreadPage {
    pub threads: Vec<ThreadBundle>,
    pub has_next_page: bool,
    pub next_cursor: Option<String>,
}

/// Remote answer to "how much of the mailbox does this range cover"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexableCount {
    pub num_indexable_threads: u64,
    pub num_threads_indexed: u64,
    pub is_index_complete: bool,
}
