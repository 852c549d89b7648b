//! Thread bundle to search documents
//!
//! Produces one [`SearchDocument`] per email. An email that fails to decrypt
//! is skipped without affecting the rest of the thread.

use tracing::warn;

use crate::content::extract_searchable_content;
use crate::crypto::{Decryptor, KeyMaterial};
use crate::remote::{Email, ThreadBundle, TimestampField};
use crate::types::{AddressObject, SearchDocument};

/// Result of converting one thread
#[derive(Debug, Default)]
pub struct ThreadDecryption {
    pub documents: Vec<SearchDocument>,
    /// Ids of emails that could not be decrypted
    pub skipped: Vec<String>,
}

struct Envelope<'a> {
    from: &'a AddressObject,
    to: &'a [AddressObject],
    cc: &'a [AddressObject],
    bcc: &'a [AddressObject],
}

fn envelope(email: &Email) -> Envelope<'_> {
    match email {
        Email::Plaintext(email) => Envelope {
            from: &email.from,
            to: &email.to,
            cc: &email.cc,
            bcc: &email.bcc,
        },
        Email::Encrypted(email) => Envelope {
            from: &email.from,
            to: &email.to,
            cc: &email.cc,
            bcc: &email.bcc,
        },
    }
}

/// Decrypt every email of a thread into search documents
///
/// Labels and read state come from the thread attributes; `updated_at` is
/// the thread timestamp selected by `field`.
pub fn decrypt_thread(
    thread: &ThreadBundle,
    decryptor: &dyn Decryptor,
    keys: &KeyMaterial,
    field: TimestampField,
) -> ThreadDecryption {
    let updated_at = thread.timestamp(field);
    let mut result = ThreadDecryption::default();

    for email in &thread.emails {
        let content = match extract_searchable_content(email, decryptor, keys) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    "Skipping email {} in thread {}: {}",
                    email.id(),
                    thread.thread_id,
                    e
                );
                result.skipped.push(email.id().to_string());
                continue;
            }
        };

        let envelope = envelope(email);
        result.documents.push(SearchDocument {
            id: email.id().to_string(),
            thread_id: thread.thread_id.clone(),
            content: content.content,
            subject: content.subject,
            to: envelope.to.to_vec(),
            cc: envelope.cc.to_vec(),
            bcc: envelope.bcc.to_vec(),
            from: envelope.from.clone(),
            system_labels: thread.attributes.system_labels.clone(),
            user_labels: thread.attributes.user_labels.clone(),
            read: thread.attributes.read,
            updated_at,
            attachments: content.attachments,
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aead::{generate_key, seal};
    use crate::crypto::AeadDecryptor;
    use crate::remote::{EncryptedEmail, PlaintextEmail, ThreadAttributes};

    fn encrypted(id: &str, keys: &KeyMaterial, subject: &str) -> Email {
        let session = generate_key().unwrap();
        Email::Encrypted(EncryptedEmail {
            id: id.to_string(),
            from: AddressObject::named("Alice", "alice@example.com"),
            to: vec![AddressObject::new("bob@example.com")],
            cc: vec![],
            bcc: vec![AddressObject::new("audit@example.com")],
            encrypted_session_key: seal(keys.as_bytes(), &session).unwrap(),
            encrypted_subject: seal(&session, subject.as_bytes()).unwrap(),
            encrypted_text: seal(&session, b"body text").unwrap(),
            encrypted_html: None,
            attachments: vec![],
        })
    }

    fn thread(emails: Vec<Email>) -> ThreadBundle {
        ThreadBundle {
            thread_id: "t1".to_string(),
            attributes: ThreadAttributes {
                system_labels: vec!["INBOX".to_string()],
                user_labels: vec!["work".to_string()],
                read: true,
            },
            emails,
            last_email_updated_at: 100,
            thread_content_updated_at: 150,
        }
    }

    #[test]
    fn test_one_document_per_email_with_thread_attributes() {
        let keys = KeyMaterial::new(generate_key().unwrap());
        let draft = Email::Plaintext(PlaintextEmail {
            id: "m2".to_string(),
            from: AddressObject::new("bob@example.com"),
            to: vec![],
            cc: vec![],
            bcc: vec![],
            subject: "Re: Plan".to_string(),
            text_body: "draft reply".to_string(),
            html_body: None,
            attachments: vec![],
        });
        let bundle = thread(vec![encrypted("m1", &keys, "Plan"), draft]);

        let result = decrypt_thread(
            &bundle,
            &AeadDecryptor::new(),
            &keys,
            TimestampField::ThreadContent,
        );

        assert!(result.skipped.is_empty());
        assert_eq!(result.documents.len(), 2);

        let first = &result.documents[0];
        assert_eq!(first.id, "m1");
        assert_eq!(first.thread_id, "t1");
        assert_eq!(first.subject, "Plan");
        assert_eq!(first.from.name.as_deref(), Some("Alice"));
        assert_eq!(first.bcc.len(), 1);
        assert_eq!(first.system_labels, vec!["INBOX".to_string()]);
        assert_eq!(first.user_labels, vec!["work".to_string()]);
        assert!(first.read);
        assert_eq!(first.updated_at, 150);

        assert_eq!(result.documents[1].content, "draft reply");
    }

    #[test]
    fn test_timestamp_field_selects_updated_at() {
        let keys = KeyMaterial::new(generate_key().unwrap());
        let bundle = thread(vec![encrypted("m1", &keys, "Plan")]);

        let result = decrypt_thread(&bundle, &AeadDecryptor::new(), &keys, TimestampField::LastEmail);
        assert_eq!(result.documents[0].updated_at, 100);
    }

    #[test]
    fn test_decryption_failure_is_isolated() {
        let keys = KeyMaterial::new(generate_key().unwrap());
        let stranger = KeyMaterial::new(generate_key().unwrap());
        let bundle = thread(vec![
            encrypted("m1", &keys, "Readable"),
            encrypted("m2", &stranger, "Unreadable"),
            encrypted("m3", &keys, "Also readable"),
        ]);

        let result = decrypt_thread(
            &bundle,
            &AeadDecryptor::new(),
            &keys,
            TimestampField::ThreadContent,
        );

        let ids: Vec<&str> = result.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3"]);
        assert_eq!(result.skipped, vec!["m2".to_string()]);
    }
}
