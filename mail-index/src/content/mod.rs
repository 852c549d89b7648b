//! Searchable content extraction
//!
//! Turns one email, plaintext or encrypted, into the text fields that end up
//! in a [`SearchDocument`](crate::types::SearchDocument).

use serde::Deserialize;

use crate::crypto::{Decryptor, KeyMaterial, SessionKey};
use crate::error::{IndexError, Result};
use crate::remote::{EncryptedAttachment, EncryptedEmail, Email, PlaintextEmail};
use crate::types::AttachmentMetadata;

pub mod html;

pub use html::html_to_search_text;

/// Plaintext fields of one email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchableContent {
    pub subject: String,
    pub content: String,
    pub attachments: Vec<AttachmentMetadata>,
}

/// Sealed attachment metadata payload
#[derive(Debug, Deserialize)]
struct AttachmentPayload {
    filename: String,
    #[serde(default = "default_content_type")]
    content_type: String,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

/// Prefer the HTML body when present, otherwise the text body
fn select_body(text_body: &str, html_body: Option<&str>) -> String {
    match html_body {
        Some(html) if !html.trim().is_empty() => html_to_search_text(html),
        _ => text_body.trim().to_string(),
    }
}

/// Extract subject, body text and attachment metadata from an email
pub fn extract_searchable_content(
    email: &Email,
    decryptor: &dyn Decryptor,
    keys: &KeyMaterial,
) -> Result<SearchableContent> {
    match email {
        Email::Plaintext(email) => Ok(from_plaintext(email)),
        Email::Encrypted(email) => from_encrypted(email, decryptor, keys),
    }
}

fn from_plaintext(email: &PlaintextEmail) -> SearchableContent {
    SearchableContent {
        subject: email.subject.clone(),
        content: select_body(&email.text_body, email.html_body.as_deref()),
        attachments: email.attachments.clone(),
    }
}

fn from_encrypted(
    email: &EncryptedEmail,
    decryptor: &dyn Decryptor,
    keys: &KeyMaterial,
) -> Result<SearchableContent> {
    let session_key = decryptor.decrypt_session_key(keys, &email.encrypted_session_key)?;

    let subject = decryptor.decrypt_text(&session_key, &email.encrypted_subject)?;
    let text_body = decryptor.decrypt_text(&session_key, &email.encrypted_text)?;
    let html_body = email
        .encrypted_html
        .as_deref()
        .map(|datagram| decryptor.decrypt_text(&session_key, datagram))
        .transpose()?;

    let attachments = email
        .attachments
        .iter()
        .map(|attachment| decrypt_attachment(attachment, decryptor, &session_key))
        .collect::<Result<Vec<_>>>()?;

    Ok(SearchableContent {
        subject,
        content: select_body(&text_body, html_body.as_deref()),
        attachments,
    })
}

fn decrypt_attachment(
    attachment: &EncryptedAttachment,
    decryptor: &dyn Decryptor,
    session_key: &SessionKey,
) -> Result<AttachmentMetadata> {
    let payload = decryptor.decrypt_datagram(session_key, &attachment.encrypted_metadata)?;
    let payload: AttachmentPayload = serde_json::from_slice(&payload).map_err(|e| {
        IndexError::Decryption(format!(
            "Attachment {} metadata is malformed: {}",
            attachment.id, e
        ))
    })?;

    Ok(AttachmentMetadata {
        id: attachment.id.clone(),
        filename: payload.filename,
        content_type: payload.content_type,
    })
}
