// Shared builders for encrypted mailboxes

#![allow(dead_code)]

use async_trait::async_trait;
use mail_index::crypto::aead::{generate_key, open, seal};
use mail_index::crypto::{AeadDecryptor, KeyMaterial};
use mail_index::remote::{
    EncryptedAttachment, EncryptedEmail, Email, IndexableCount, MailboxSource, PageRequest,
    ThreadAttributes, ThreadBundle, ThreadPage,
};
use mail_index::store::{IndexStore, MemoryIndexStore};
use mail_index::sync::{SyncEngine, SyncSettings};
use mail_index::types::MetadataUpdate;
use mail_index::{AddressObject, IndexError, IndexMetadata, Result, SearchDocument, SearchFilters};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn keys() -> KeyMaterial {
    KeyMaterial::new(generate_key().unwrap())
}

/// One email whose every field is sealed for `keys`
pub fn encrypted_email(keys: &KeyMaterial, id: &str, subject: &str, body: &str) -> EncryptedEmail {
    let session = generate_key().unwrap();
    EncryptedEmail {
        id: id.to_string(),
        from: AddressObject::named("Alice Martin", "alice@example.com"),
        to: vec![AddressObject::new("bob@example.com")],
        cc: vec![],
        bcc: vec![],
        encrypted_session_key: seal(keys.as_bytes(), &session).unwrap(),
        encrypted_subject: seal(&session, subject.as_bytes()).unwrap(),
        encrypted_text: seal(&session, body.as_bytes()).unwrap(),
        encrypted_html: None,
        attachments: vec![],
    }
}

pub fn with_html(mut email: EncryptedEmail, keys: &KeyMaterial, html: &str) -> EncryptedEmail {
    let session = open(keys.as_bytes(), &email.encrypted_session_key).unwrap();
    email.encrypted_html = Some(seal(&session, html.as_bytes()).unwrap());
    email
}

pub fn with_attachment(
    mut email: EncryptedEmail,
    keys: &KeyMaterial,
    id: &str,
    filename: &str,
) -> EncryptedEmail {
    let session = open(keys.as_bytes(), &email.encrypted_session_key).unwrap();
    let metadata = format!(r#"{{"filename":"{}","content_type":"application/pdf"}}"#, filename);
    email.attachments.push(EncryptedAttachment {
        id: id.to_string(),
        encrypted_metadata: seal(&session, metadata.as_bytes()).unwrap(),
    });
    email
}

pub fn bundle(thread_id: &str, timestamp: i64, emails: Vec<EncryptedEmail>) -> ThreadBundle {
    ThreadBundle {
        thread_id: thread_id.to_string(),
        attributes: ThreadAttributes {
            system_labels: vec!["INBOX".to_string()],
            user_labels: vec![],
            read: false,
        },
        emails: emails.into_iter().map(Email::Encrypted).collect(),
        last_email_updated_at: timestamp,
        thread_content_updated_at: timestamp,
    }
}

/// Thread `id` at `timestamp` with one email `<id>-m1`
pub fn thread(keys: &KeyMaterial, id: &str, timestamp: i64) -> ThreadBundle {
    let email = encrypted_email(
        keys,
        &format!("{}-m1", id),
        &format!("Subject {}", id),
        &format!("Body of thread {}", id),
    );
    bundle(id, timestamp, vec![email])
}

pub fn settings(page_size: usize) -> SyncSettings {
    SyncSettings {
        page_size,
        page_delay: Duration::from_millis(10),
        ..SyncSettings::default()
    }
}

pub fn engine(
    store: Arc<dyn IndexStore>,
    remote: Arc<dyn MailboxSource>,
    keys: &KeyMaterial,
    settings: SyncSettings,
) -> SyncEngine {
    SyncEngine::new(
        store,
        remote,
        Arc::new(AeadDecryptor::new()),
        keys.clone(),
        settings,
    )
}

/// Every saved document id, sorted
pub async fn all_ids(store: &dyn IndexStore) -> Vec<String> {
    let filters = SearchFilters {
        limit: Some(10_000),
        ..Default::default()
    };
    let mut ids = store.query("", &filters).await.unwrap();
    ids.sort();
    ids
}

pub fn ids(values: &[&str]) -> Vec<String> {
    let mut ids: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    ids.sort();
    ids
}

/// Cancels a token once a number of pages have been served
pub struct CancelAfter {
    inner: Arc<dyn MailboxSource>,
    token: CancellationToken,
    pages: usize,
    served: AtomicUsize,
}

impl CancelAfter {
    pub fn new(inner: Arc<dyn MailboxSource>, token: CancellationToken, pages: usize) -> Self {
        Self {
            inner,
            token,
            pages,
            served: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MailboxSource for CancelAfter {
    async fn fetch_page(&self, request: &PageRequest) -> Result<ThreadPage> {
        let page = self.inner.fetch_page(request).await?;
        if self.served.fetch_add(1, Ordering::SeqCst) + 1 >= self.pages {
            self.token.cancel();
        }
        Ok(page)
    }

    async fn indexable_count(&self, oldest: i64, newest: i64) -> Result<IndexableCount> {
        self.inner.indexable_count(oldest, newest).await
    }
}

/// Fails one `add` call, as a full disk would, and delegates everything else
pub struct FailingStore {
    inner: Arc<MemoryIndexStore>,
    fail_on_add: usize,
    adds: AtomicUsize,
}

impl FailingStore {
    /// `fail_on_add` counts from 1
    pub fn new(inner: Arc<MemoryIndexStore>, fail_on_add: usize) -> Self {
        Self {
            inner,
            fail_on_add,
            adds: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IndexStore for FailingStore {
    async fn add(&self, doc: SearchDocument) -> Result<()> {
        if self.adds.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on_add {
            return Err(IndexError::Store("disk full".to_string()));
        }
        self.inner.add(doc).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.inner.remove(id).await
    }

    async fn query(&self, text: &str, filters: &SearchFilters) -> Result<Vec<String>> {
        self.inner.query(text, filters).await
    }

    async fn metadata(&self) -> Result<IndexMetadata> {
        self.inner.metadata().await
    }

    async fn set_metadata(&self, update: MetadataUpdate) -> Result<()> {
        self.inner.set_metadata(update).await
    }

    async fn save(&self) -> Result<()> {
        self.inner.save().await
    }

    async fn discard(&self) -> Result<()> {
        self.inner.discard().await
    }

    async fn terminate(&self) -> Result<()> {
        self.inner.terminate().await
    }

    async fn document_count(&self) -> Result<u64> {
        self.inner.document_count().await
    }
}
