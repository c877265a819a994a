//! Document store access
//!
//! The consumer only needs three capabilities from the store: fetch a
//! document by id, upsert a document, and query the change feed from a
//! cursor with a named filter. [`DocumentStore`] captures that contract;
//! [`CouchStore`] implements it over the store's HTTP API and
//! [`MemoryStore`] provides a scriptable implementation for testing or
//! when no server is available.

use crate::error::{FeedError, Result};
use crate::event::Cursor;
use crate::filter::CONVOY_FEED_FILTER;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use url::Url;

/// Parameters for one change-feed poll.
#[derive(Debug, Clone)]
pub struct ChangesRequest {
    /// Last sequence observed; the store returns changes after this point
    pub since: Cursor,
    /// Maximum number of results per batch
    pub limit: usize,
    /// Server-side filter reference, `design_doc/filter_name`
    pub filter: String,
    /// Whether to include full document bodies
    pub include_docs: bool,
}

impl ChangesRequest {
    /// Create a request with the feed defaults: limit 100, the
    /// `convoy_feed` filter, full document bodies included.
    pub fn new(since: Cursor) -> Self {
        Self {
            since,
            limit: 100,
            filter: CONVOY_FEED_FILTER.to_string(),
            include_docs: true,
        }
    }
}

/// One row of a change-feed response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeRow {
    /// Sequence token of this change
    pub seq: Cursor,
    /// Document id
    #[serde(default)]
    pub id: Option<String>,
    /// Full document body, present when `include_docs` was requested
    #[serde(default)]
    pub doc: Option<Value>,
}

impl ChangeRow {
    /// Create a row carrying a document body.
    pub fn new(seq: Cursor, doc: Value) -> Self {
        let id = doc
            .get("_id")
            .or_else(|| doc.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            seq,
            id,
            doc: Some(doc),
        }
    }
}

/// An ordered batch of changes plus the new cursor.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangesBatch {
    /// Changes in the store's internal sequence order
    #[serde(default)]
    pub results: Vec<ChangeRow>,
    /// Authoritative cursor after this batch, also returned for empty batches
    pub last_seq: Cursor,
}

impl ChangesBatch {
    /// Create a batch.
    pub fn new(last_seq: Cursor, results: Vec<ChangeRow>) -> Self {
        Self { results, last_seq }
    }

    /// Create an empty batch that leaves the cursor at `last_seq`.
    pub fn empty(last_seq: Cursor) -> Self {
        Self {
            results: Vec::new(),
            last_seq,
        }
    }
}

/// Capabilities the consumer requires from the document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document by id. `None` if absent.
    async fn get(&self, id: &str) -> Result<Option<Value>>;

    /// Upsert a document. The document carries its own `_id` (and `_rev`
    /// when updating an existing revision).
    async fn save(&self, doc: Value) -> Result<()>;

    /// Query the change feed.
    async fn changes(&self, request: &ChangesRequest) -> Result<ChangesBatch>;
}

// ============================================================================
// HTTP-backed store
// ============================================================================

/// Document store over the CouchDB-style HTTP API.
pub struct CouchStore {
    http: reqwest::Client,
    base: Url,
    db: String,
    credentials: Option<(String, String)>,
}

impl CouchStore {
    /// Create a store handle for one database.
    pub fn new(base_url: &str, db: impl Into<String>) -> Result<Self> {
        // Url::join treats a path without a trailing slash as a file
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base = Url::parse(&normalized)
            .map_err(|e| FeedError::config(format!("invalid document store URL: {}", e)))?;

        Ok(Self {
            http: reqwest::Client::new(),
            base,
            db: db.into(),
            credentials: None,
        })
    }

    /// Attach basic-auth credentials.
    pub fn with_credentials(
        mut self,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((login.into(), password.into()));
        self
    }

    /// Database name this handle points at.
    pub fn db_name(&self) -> &str {
        &self.db
    }

    fn db_url(&self, path: &str) -> Result<Url> {
        let suffix = if path.is_empty() {
            self.db.clone()
        } else {
            format!("{}/{}", self.db, path)
        };
        self.base
            .join(&suffix)
            .map_err(|e| FeedError::store(format!("invalid document path {}: {}", path, e)))
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.credentials {
            Some((login, password)) => builder.basic_auth(login, Some(password)),
            None => builder,
        }
    }

    /// Create the database if it does not exist yet.
    ///
    /// Any failure here means the process cannot run, so transport and
    /// status errors alike surface as configuration errors.
    pub async fn ensure_database(&self) -> Result<()> {
        let url = self.db_url("")?;
        let status = self
            .request(reqwest::Method::GET, url.clone())
            .send()
            .await
            .map_err(|e| FeedError::config(format!("document store unreachable: {}", e)))?
            .status();

        if status.is_success() {
            debug!("database {} exists", self.db);
            return Ok(());
        }
        if status.as_u16() != 404 {
            return Err(FeedError::config(format!(
                "database check for {} failed with status {}",
                self.db, status
            )));
        }

        let create = self
            .request(reqwest::Method::PUT, url)
            .send()
            .await
            .map_err(|e| FeedError::config(format!("database creation failed: {}", e)))?
            .status();

        // 412 means another process created it between our check and put
        if create.is_success() || create.as_u16() == 412 {
            info!("created database {}", self.db);
            Ok(())
        } else {
            Err(FeedError::config(format!(
                "database creation for {} failed with status {}",
                self.db, create
            )))
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(FeedError::api(status.as_u16(), message))
    }
}

#[async_trait]
impl DocumentStore for CouchStore {
    async fn get(&self, id: &str) -> Result<Option<Value>> {
        let response = self
            .request(reqwest::Method::GET, self.db_url(id)?)
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let doc = Self::check(response).await?.json::<Value>().await?;
        Ok(Some(doc))
    }

    async fn save(&self, doc: Value) -> Result<()> {
        let id = doc
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| FeedError::store("document has no _id"))?
            .to_string();
        let response = self
            .request(reqwest::Method::PUT, self.db_url(&id)?)
            .json(&doc)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn changes(&self, request: &ChangesRequest) -> Result<ChangesBatch> {
        let limit = request.limit.to_string();
        let response = self
            .request(reqwest::Method::GET, self.db_url("_changes")?)
            .query(&[
                ("since", request.since.as_str()),
                ("limit", limit.as_str()),
                ("filter", request.filter.as_str()),
                ("include_docs", if request.include_docs { "true" } else { "false" }),
            ])
            .send()
            .await?;
        let batch = Self::check(response).await?.json::<ChangesBatch>().await?;
        Ok(batch)
    }
}

// ============================================================================
// In-memory store (for testing or when no server is available)
// ============================================================================

enum ScriptedPoll {
    Batch(ChangesBatch),
    Error(FeedError),
}

/// In-memory document store with a scriptable change feed.
///
/// Documents behave like a real store: `save` upserts by `_id`, `get`
/// fetches by id. The change feed replays batches (or errors) queued with
/// [`push_batch`](Self::push_batch) /
/// [`push_poll_error`](Self::push_poll_error); once the script is
/// exhausted, polls return empty batches that leave the cursor where the
/// last scripted batch put it.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, Value>>,
    script: Mutex<VecDeque<ScriptedPoll>>,
    current_seq: RwLock<Cursor>,
    saves: AtomicU64,
    polled_since: Mutex<Vec<Cursor>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a change-feed batch for a future poll.
    pub async fn push_batch(&self, batch: ChangesBatch) {
        self.script.lock().await.push_back(ScriptedPoll::Batch(batch));
    }

    /// Queue an error for a future poll.
    pub async fn push_poll_error(&self, error: FeedError) {
        self.script.lock().await.push_back(ScriptedPoll::Error(error));
    }

    /// Number of `save` calls observed.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    /// Cursors the feed was polled with, in order.
    pub async fn polled_since(&self) -> Vec<Cursor> {
        self.polled_since.lock().await.clone()
    }

    /// Number of change-feed polls observed.
    pub async fn poll_count(&self) -> usize {
        self.polled_since.lock().await.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.docs.read().await.get(id).cloned())
    }

    async fn save(&self, doc: Value) -> Result<()> {
        let id = doc
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| FeedError::store("document has no _id"))?
            .to_string();
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.docs.write().await.insert(id, doc);
        Ok(())
    }

    async fn changes(&self, request: &ChangesRequest) -> Result<ChangesBatch> {
        self.polled_since.lock().await.push(request.since.clone());

        match self.script.lock().await.pop_front() {
            Some(ScriptedPoll::Batch(batch)) => {
                *self.current_seq.write().await = batch.last_seq.clone();
                Ok(batch)
            }
            Some(ScriptedPoll::Error(error)) => Err(error),
            None => Ok(ChangesBatch::empty(self.current_seq.read().await.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_changes_batch_deserialization_integer_seq() {
        let batch: ChangesBatch = serde_json::from_value(json!({
            "results": [
                {"seq": 7, "id": "a1", "doc": {"_id": "a1", "doc_type": "Auction"}}
            ],
            "last_seq": 7
        }))
        .unwrap();

        assert_eq!(batch.results.len(), 1);
        assert_eq!(batch.results[0].seq.as_str(), "7");
        assert_eq!(batch.last_seq.as_str(), "7");
    }

    #[test]
    fn test_changes_batch_deserialization_string_seq() {
        let batch: ChangesBatch = serde_json::from_value(json!({
            "results": [],
            "last_seq": "42-g1AAAA"
        }))
        .unwrap();

        assert!(batch.results.is_empty());
        assert_eq!(batch.last_seq.as_str(), "42-g1AAAA");
    }

    #[test]
    fn test_change_row_extracts_id() {
        let row = ChangeRow::new(Cursor::new("3"), json!({"_id": "a9", "doc_type": "Auction"}));
        assert_eq!(row.id.as_deref(), Some("a9"));
    }

    #[test]
    fn test_couch_store_rejects_invalid_url() {
        match CouchStore::new("not a url", "auctions") {
            Err(FeedError::Config(_)) => {}
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_memory_store_documents() {
        let store = MemoryStore::new();
        store
            .save(json!({"_id": "d1", "value": 1}))
            .await
            .unwrap();

        let doc = store.get("d1").await.unwrap().unwrap();
        assert_eq!(doc["value"], 1);
        assert!(store.get("missing").await.unwrap().is_none());
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_save_requires_id() {
        let store = MemoryStore::new();
        assert!(store.save(json!({"value": 1})).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_scripted_feed() {
        let store = MemoryStore::new();
        store
            .push_batch(ChangesBatch::new(
                Cursor::new("5"),
                vec![ChangeRow::new(Cursor::new("5"), json!({"_id": "a1"}))],
            ))
            .await;
        store.push_poll_error(FeedError::api(503, "down")).await;

        let request = ChangesRequest::new(Cursor::origin());
        let batch = store.changes(&request).await.unwrap();
        assert_eq!(batch.last_seq.as_str(), "5");

        assert!(store.changes(&request).await.is_err());

        // Script exhausted: empty batch, cursor stays put
        let batch = store.changes(&request).await.unwrap();
        assert!(batch.results.is_empty());
        assert_eq!(batch.last_seq.as_str(), "5");

        assert_eq!(store.poll_count().await, 3);
    }
}
