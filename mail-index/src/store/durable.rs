//! Durable index store using Tantivy
//!
//! One index directory per user. Documents are committed to Tantivy and the
//! coverage metadata is written next to them as `index-metadata.json`.
//! Documents are committed before metadata, so after a crash the metadata
//! can only under-claim coverage.

use async_trait::async_trait;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tantivy::{
    collector::TopDocs,
    directory::MmapDirectory,
    query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, RangeQuery, TermQuery},
    schema::{
        Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, FAST, INDEXED,
        STORED, STRING,
    },
    tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer},
    Index, IndexReader, IndexSettings, IndexWriter, ReloadPolicy, TantivyDocument, Term,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::{IndexStore, StoreProvider};
use crate::error::{IndexError, Result};
use crate::types::{AddressObject, IndexMetadata, MetadataUpdate, SearchDocument, SearchFilters};

pub const METADATA_FILE: &str = "index-metadata.json";

const TOKENIZER: &str = "mail_tokenizer";

/// Writer heap budget
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Schema fields for search documents
pub struct DocumentFields {
    pub id: Field,
    pub thread_id: Field,
    pub subject: Field,
    pub content: Field,
    pub from: Field,
    pub to: Field,
    pub cc: Field,
    pub bcc: Field,
    pub attachments: Field,
    pub system_labels: Field,
    pub user_labels: Field,
    pub read: Field,
    pub updated_at: Field,
}

impl DocumentFields {
    fn build_schema() -> Schema {
        let mut schema_builder = Schema::builder();

        let text_indexing = TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);
        let text_options = TextOptions::default().set_indexing_options(text_indexing);

        schema_builder.add_text_field("id", STRING | STORED);
        schema_builder.add_text_field("thread_id", STRING | STORED);
        schema_builder.add_text_field("subject", text_options.clone());
        schema_builder.add_text_field("content", text_options.clone());
        schema_builder.add_text_field("from", text_options.clone());
        schema_builder.add_text_field("to", text_options.clone());
        schema_builder.add_text_field("cc", text_options.clone());
        schema_builder.add_text_field("bcc", text_options.clone());
        schema_builder.add_text_field("attachments", text_options);
        schema_builder.add_text_field("system_labels", STRING);
        schema_builder.add_text_field("user_labels", STRING);
        schema_builder.add_bool_field("read", INDEXED);
        schema_builder.add_i64_field("updated_at", INDEXED | FAST | STORED);

        schema_builder.build()
    }

    fn from_schema(schema: &Schema) -> Result<Self> {
        Ok(Self {
            id: schema.get_field("id")?,
            thread_id: schema.get_field("thread_id")?,
            subject: schema.get_field("subject")?,
            content: schema.get_field("content")?,
            from: schema.get_field("from")?,
            to: schema.get_field("to")?,
            cc: schema.get_field("cc")?,
            bcc: schema.get_field("bcc")?,
            attachments: schema.get_field("attachments")?,
            system_labels: schema.get_field("system_labels")?,
            user_labels: schema.get_field("user_labels")?,
            read: schema.get_field("read")?,
            updated_at: schema.get_field("updated_at")?,
        })
    }
}

fn join_addresses(addresses: &[AddressObject]) -> String {
    addresses
        .iter()
        .map(AddressObject::search_text)
        .collect::<Vec<_>>()
        .join("\n")
}

fn read_metadata(dir: &Path) -> Result<IndexMetadata> {
    let path = dir.join(METADATA_FILE);
    if !path.exists() {
        return Ok(IndexMetadata::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn write_metadata(dir: &Path, metadata: &IndexMetadata) -> Result<()> {
    let tmp = dir.join(format!("{}.tmp", METADATA_FILE));
    std::fs::write(&tmp, serde_json::to_vec_pretty(metadata)?)?;
    std::fs::rename(&tmp, dir.join(METADATA_FILE))?;
    Ok(())
}

/// Tantivy-backed [`IndexStore`]
pub struct TantivyIndexStore {
    dir: PathBuf,
    reader: IndexReader,
    writer: Mutex<Option<IndexWriter>>,
    fields: DocumentFields,
    query_parser: QueryParser,
    committed: RwLock<IndexMetadata>,
    staged: Mutex<Option<IndexMetadata>>,
    terminated: AtomicBool,
}

impl TantivyIndexStore {
    /// Open or create the index stored in `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir)?
        } else {
            let directory =
                MmapDirectory::open(dir).map_err(|e| IndexError::Store(e.to_string()))?;
            Index::create(directory, DocumentFields::build_schema(), IndexSettings::default())?
        };
        let fields = DocumentFields::from_schema(&index.schema())?;

        let text_analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser)
            .build();
        index.tokenizers().register(TOKENIZER, text_analyzer);

        // Reloaded explicitly after each commit so saved pages are queryable at once
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer: IndexWriter = index.writer(WRITER_HEAP_BYTES)?;

        let mut query_parser = QueryParser::for_index(
            &index,
            vec![
                fields.subject,
                fields.content,
                fields.from,
                fields.to,
                fields.cc,
                fields.bcc,
                fields.attachments,
            ],
        );
        query_parser.set_conjunction_by_default();

        let metadata = read_metadata(dir)?;
        info!(
            "Opened search index at {:?} ({} documents, coverage {:?}..{:?})",
            dir,
            reader.searcher().num_docs(),
            metadata.oldest_indexed_timestamp,
            metadata.newest_indexed_timestamp
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            reader,
            writer: Mutex::new(Some(writer)),
            fields,
            query_parser,
            committed: RwLock::new(metadata),
            staged: Mutex::new(None),
            terminated: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn ensure_open(&self) -> Result<()> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(IndexError::Terminated);
        }
        Ok(())
    }

    fn to_tantivy(&self, doc: &SearchDocument) -> TantivyDocument {
        let fields = &self.fields;
        let mut document = TantivyDocument::default();

        document.add_text(fields.id, &doc.id);
        document.add_text(fields.thread_id, &doc.thread_id);
        document.add_text(fields.subject, &doc.subject);
        document.add_text(fields.content, &doc.content);
        document.add_text(fields.from, doc.from.search_text());
        document.add_text(fields.to, join_addresses(&doc.to));
        document.add_text(fields.cc, join_addresses(&doc.cc));
        document.add_text(fields.bcc, join_addresses(&doc.bcc));
        for attachment in &doc.attachments {
            document.add_text(fields.attachments, &attachment.filename);
        }
        for label in &doc.system_labels {
            document.add_text(fields.system_labels, label);
        }
        for label in &doc.user_labels {
            document.add_text(fields.user_labels, label);
        }
        document.add_bool(fields.read, doc.read);
        document.add_i64(fields.updated_at, doc.updated_at);

        document
    }

    fn build_query(&self, text: &str, filters: &SearchFilters) -> Box<dyn Query> {
        let fields = &self.fields;
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        let text = text.trim();
        if !text.is_empty() {
            let (parsed, errors) = self.query_parser.parse_query_lenient(text);
            if !errors.is_empty() {
                debug!("Ignored {} malformed parts of query {:?}", errors.len(), text);
            }
            clauses.push((Occur::Must, parsed));
        }

        let term_clause = |term: Term| -> (Occur, Box<dyn Query>) {
            (
                Occur::Must,
                Box::new(TermQuery::new(term, IndexRecordOption::Basic)),
            )
        };

        for label in &filters.system_labels {
            clauses.push(term_clause(Term::from_field_text(fields.system_labels, label)));
        }
        for label in &filters.user_labels {
            clauses.push(term_clause(Term::from_field_text(fields.user_labels, label)));
        }
        if let Some(read) = filters.read {
            clauses.push(term_clause(Term::from_field_bool(fields.read, read)));
        }
        if let Some(thread_id) = &filters.thread_id {
            clauses.push(term_clause(Term::from_field_text(fields.thread_id, thread_id)));
        }
        if filters.updated_after.is_some() || filters.updated_before.is_some() {
            let lower = filters.updated_after.map_or(Bound::Unbounded, Bound::Included);
            let upper = filters.updated_before.map_or(Bound::Unbounded, Bound::Included);
            clauses.push((
                Occur::Must,
                Box::new(RangeQuery::new_i64_bounds(
                    "updated_at".to_string(),
                    lower,
                    upper,
                )),
            ));
        }

        if clauses.is_empty() {
            Box::new(AllQuery)
        } else {
            Box::new(BooleanQuery::new(clauses))
        }
    }
}

#[async_trait]
impl IndexStore for TantivyIndexStore {
    async fn add(&self, doc: SearchDocument) -> Result<()> {
        self.ensure_open()?;
        let document = self.to_tantivy(&doc);

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(IndexError::Terminated)?;
        // Replace any earlier version of this message
        writer.delete_term(Term::from_field_text(self.fields.id, &doc.id));
        writer.add_document(document)?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.ensure_open()?;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(IndexError::Terminated)?;
        writer.delete_term(Term::from_field_text(self.fields.id, id));
        Ok(())
    }

    async fn query(&self, text: &str, filters: &SearchFilters) -> Result<Vec<String>> {
        self.ensure_open()?;
        let limit = filters.limit();
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query = self.build_query(text, filters);
        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut ids = Vec::with_capacity(top_docs.len());
        for (_score, doc_address) in top_docs {
            let retrieved: TantivyDocument = searcher.doc(doc_address)?;
            if let Some(id) = retrieved.get_first(self.fields.id).and_then(|v| v.as_str()) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }

    async fn metadata(&self) -> Result<IndexMetadata> {
        self.ensure_open()?;
        Ok(self.committed.read().await.clone())
    }

    async fn set_metadata(&self, update: MetadataUpdate) -> Result<()> {
        self.ensure_open()?;
        let mut staged = self.staged.lock().await;
        let mut metadata = match staged.take() {
            Some(metadata) => metadata,
            None => self.committed.read().await.clone(),
        };
        metadata.apply(update);
        *staged = Some(metadata);
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        self.ensure_open()?;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(IndexError::Terminated)?;

        writer.commit()?;
        self.reader.reload()?;

        // Staged metadata stays put until the sidecar is on disk
        let mut staged = self.staged.lock().await;
        if let Some(metadata) = staged.as_ref() {
            write_metadata(&self.dir, metadata)?;
            *self.committed.write().await = metadata.clone();
        }
        *staged = None;
        Ok(())
    }

    async fn discard(&self) -> Result<()> {
        self.ensure_open()?;
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(IndexError::Terminated)?;
        writer.rollback()?;
        *self.staged.lock().await = None;
        debug!("Discarded uncommitted changes in {:?}", self.dir);
        Ok(())
    }

    async fn terminate(&self) -> Result<()> {
        self.terminated.store(true, Ordering::SeqCst);
        *self.staged.lock().await = None;

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.rollback()?;
            info!("Closed search index at {:?}", self.dir);
        }
        Ok(())
    }

    async fn document_count(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.reader.searcher().num_docs())
    }
}

/// Opens `<root>/<user>` Tantivy indexes
pub struct TantivyStoreProvider {
    root: PathBuf,
}

impl TantivyStoreProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding a user's index
    ///
    /// The id is hex encoded: distinct ids never share a directory, even on a
    /// case-insensitive filesystem, and no id can point outside `root`.
    pub fn user_dir(&self, user_id: &str) -> Result<PathBuf> {
        if user_id.is_empty() {
            return Err(IndexError::Config("User id must not be empty".to_string()));
        }
        let name: String = user_id.bytes().map(|b| format!("{:02x}", b)).collect();
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl StoreProvider for TantivyStoreProvider {
    async fn open(&self, user_id: &str) -> Result<Arc<dyn IndexStore>> {
        let dir = self.user_dir(user_id)?;
        let store = tokio::task::spawn_blocking(move || TantivyIndexStore::open(&dir))
            .await
            .map_err(|e| IndexError::Worker(e.to_string()))??;
        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttachmentMetadata;
    use tempfile::TempDir;

    fn doc(id: &str, subject: &str, updated_at: i64) -> SearchDocument {
        SearchDocument {
            id: id.to_string(),
            thread_id: format!("thread-{}", id),
            content: "Please review the attached contract".to_string(),
            subject: subject.to_string(),
            to: vec![AddressObject::new("bob@example.com")],
            cc: vec![],
            bcc: vec![],
            from: AddressObject::named("Alice Martin", "alice@example.com"),
            system_labels: vec!["INBOX".to_string()],
            user_labels: vec!["legal".to_string()],
            read: false,
            updated_at,
            attachments: vec![AttachmentMetadata {
                id: "att".to_string(),
                filename: "contract.pdf".to_string(),
                content_type: "application/pdf".to_string(),
            }],
        }
    }

    fn sorted(mut ids: Vec<String>) -> Vec<String> {
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_upsert_keeps_single_latest_document() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyIndexStore::open(temp_dir.path()).unwrap();

        store.add(doc("m1", "Draft agreement", 10)).await.unwrap();
        store.save().await.unwrap();
        store.add(doc("m1", "Signed agreement", 10)).await.unwrap();
        store.save().await.unwrap();

        assert_eq!(store.document_count().await.unwrap(), 1);
        let filters = SearchFilters::default();
        assert_eq!(store.query("signed", &filters).await.unwrap(), vec!["m1".to_string()]);
        assert!(store.query("draft", &filters).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsaved_changes_not_visible() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyIndexStore::open(temp_dir.path()).unwrap();

        store.add(doc("m1", "Pending", 10)).await.unwrap();
        store
            .set_metadata(MetadataUpdate {
                oldest_indexed_timestamp: Some(10),
                newest_indexed_timestamp: Some(10),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(store.document_count().await.unwrap(), 0);
        assert!(store.metadata().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = TantivyIndexStore::open(temp_dir.path()).unwrap();
            store.add(doc("m1", "Saved", 10)).await.unwrap();
            store
                .set_metadata(MetadataUpdate {
                    oldest_indexed_timestamp: Some(10),
                    newest_indexed_timestamp: Some(10),
                    ..Default::default()
                })
                .await
                .unwrap();
            store.save().await.unwrap();

            store.add(doc("m2", "Unsaved", 20)).await.unwrap();
            store.terminate().await.unwrap();
        }

        let store = TantivyIndexStore::open(temp_dir.path()).unwrap();
        let metadata = store.metadata().await.unwrap();
        assert_eq!(metadata.oldest_indexed_timestamp, Some(10));
        assert_eq!(metadata.newest_indexed_timestamp, Some(10));
        assert_eq!(
            store.query("", &SearchFilters::default()).await.unwrap(),
            vec!["m1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_query_fields_and_filters() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyIndexStore::open(temp_dir.path()).unwrap();

        store.add(doc("m1", "Contract", 10)).await.unwrap();
        let mut archived = doc("m2", "Contract renewal", 20);
        archived.system_labels = vec!["ARCHIVE".to_string()];
        archived.read = true;
        store.add(archived).await.unwrap();
        store.add(doc("m3", "Lunch", 30)).await.unwrap();
        store.save().await.unwrap();

        let all = SearchFilters::default();
        assert_eq!(
            sorted(store.query("contract", &all).await.unwrap()),
            vec!["m1".to_string(), "m2".to_string(), "m3".to_string()]
        );
        assert_eq!(
            sorted(store.query("renewal", &all).await.unwrap()),
            vec!["m2".to_string()]
        );
        assert_eq!(store.query("alice", &all).await.unwrap().len(), 3);
        assert_eq!(store.query("contract.pdf", &all).await.unwrap().len(), 3);

        let inbox = SearchFilters {
            system_labels: vec!["INBOX".to_string()],
            ..Default::default()
        };
        assert_eq!(
            sorted(store.query("", &inbox).await.unwrap()),
            vec!["m1".to_string(), "m3".to_string()]
        );

        let read = SearchFilters {
            read: Some(true),
            ..Default::default()
        };
        assert_eq!(store.query("", &read).await.unwrap(), vec!["m2".to_string()]);

        let range = SearchFilters {
            updated_after: Some(15),
            updated_before: Some(30),
            ..Default::default()
        };
        assert_eq!(
            sorted(store.query("", &range).await.unwrap()),
            vec!["m2".to_string(), "m3".to_string()]
        );

        let thread = SearchFilters {
            thread_id: Some("thread-m3".to_string()),
            ..Default::default()
        };
        assert_eq!(store.query("", &thread).await.unwrap(), vec!["m3".to_string()]);
    }

    #[tokio::test]
    async fn test_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyIndexStore::open(temp_dir.path()).unwrap();

        store.add(doc("m1", "One", 10)).await.unwrap();
        store.add(doc("m2", "Two", 20)).await.unwrap();
        store.save().await.unwrap();
        store.remove("m1").await.unwrap();
        store.save().await.unwrap();

        assert_eq!(
            store.query("", &SearchFilters::default()).await.unwrap(),
            vec!["m2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_terminate_rejects_further_calls() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyIndexStore::open(temp_dir.path()).unwrap();
        store.terminate().await.unwrap();

        assert!(matches!(
            store.add(doc("m1", "Late", 10)).await,
            Err(IndexError::Terminated)
        ));
        assert!(matches!(store.save().await, Err(IndexError::Terminated)));
    }

    #[tokio::test]
    async fn test_provider_keys_directories_by_user() {
        let temp_dir = TempDir::new().unwrap();
        let provider = TantivyStoreProvider::new(temp_dir.path());

        let dir = provider.user_dir("alice@example.com").unwrap();
        assert_eq!(
            dir,
            temp_dir.path().join("616c696365406578616d706c652e636f6d")
        );
        let dir = provider.user_dir("../escape").unwrap();
        assert_eq!(dir.parent(), Some(temp_dir.path()));
        assert!(provider.user_dir("").is_err());

        let store = provider.open("alice@example.com").await.unwrap();
        store.add(doc("m1", "Hello", 10)).await.unwrap();
        store.save().await.unwrap();
        store.terminate().await.unwrap();

        let reopened = provider.open("alice@example.com").await.unwrap();
        assert_eq!(reopened.document_count().await.unwrap(), 1);
        let other = provider.open("bob@example.com").await.unwrap();
        assert_eq!(other.document_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_similar_user_ids_get_separate_indexes() {
        let temp_dir = TempDir::new().unwrap();
        let provider = TantivyStoreProvider::new(temp_dir.path());

        let ids = ["alice.smith", "alice_smith", "Alice.Smith", "alice/smith"];
        let mut dirs: Vec<PathBuf> = ids.iter().map(|id| provider.user_dir(id).unwrap()).collect();
        dirs.sort();
        dirs.dedup();
        assert_eq!(dirs.len(), ids.len());

        let store = provider.open("alice.smith").await.unwrap();
        store.add(doc("m1", "Private", 10)).await.unwrap();
        store.save().await.unwrap();
        store.terminate().await.unwrap();

        let other = provider.open("alice_smith").await.unwrap();
        assert_eq!(other.document_count().await.unwrap(), 0);
        other.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_discard_rolls_back_to_last_save() {
        let temp_dir = TempDir::new().unwrap();
        let store = TantivyIndexStore::open(temp_dir.path()).unwrap();

        store.add(doc("m1", "Kept", 10)).await.unwrap();
        store
            .set_metadata(MetadataUpdate {
                oldest_indexed_timestamp: Some(10),
                newest_indexed_timestamp: Some(10),
                ..Default::default()
            })
            .await
            .unwrap();
        store.save().await.unwrap();

        store.add(doc("m2", "Dropped", 5)).await.unwrap();
        store.remove("m1").await.unwrap();
        store
            .set_metadata(MetadataUpdate {
                oldest_indexed_timestamp: Some(5),
                ..Default::default()
            })
            .await
            .unwrap();
        store.discard().await.unwrap();

        // A later save must not resurrect the discarded page
        store.add(doc("m3", "Next page", 20)).await.unwrap();
        store.save().await.unwrap();

        assert_eq!(
            sorted(store.query("", &SearchFilters::default()).await.unwrap()),
            vec!["m1".to_string(), "m3".to_string()]
        );
        assert_eq!(store.metadata().await.unwrap().oldest_indexed_timestamp, Some(10));
    }
}
