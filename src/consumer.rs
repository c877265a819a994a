//! Change-feed consumer
//!
//! The core engine: polls the document store's change feed from an
//! in-memory cursor, suppresses already-processed documents through the
//! dedup store, and delivers new events downstream in feed order.
//!
//! Each iteration has two phases:
//!
//! 1. **Poll** - request changes after the current cursor, with the named
//!    filter, a batch limit, and full document bodies. The poll is wrapped
//!    in the retry policy; retriable upstream failures back off and
//!    re-attempt up to the configured cap before surfacing fatally.
//! 2. **Dispatch or idle** - advance the cursor to whatever the store
//!    returned (the store's cursor is authoritative, also for empty
//!    batches). Non-empty batches are drained to completion in order;
//!    the shutdown signal is honored only between batches and around the
//!    idle sleep, never mid-batch.
//!
//! A malformed or undeliverable document is logged and skipped; one bad
//! document never halts the feed.

use crate::dedup::DedupStore;
use crate::error::Result;
use crate::event::{ChangeEvent, Cursor};
use crate::filter::CONVOY_FEED_FILTER;
use crate::retry::{with_retry, RetryConfig};
use crate::signal::ShutdownSignal;
use crate::store::{ChangesBatch, ChangesRequest, DocumentStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// How the consumer behaves once the feed runs dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Idle-sleep on empty batches and keep polling.
    #[default]
    Continuous,
    /// Stop cleanly at the first empty batch. Lets tests and catch-up jobs
    /// drain the feed without a process-wide switch.
    SinglePass,
}

/// Configuration for the feed consumer.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Sleep between polls when the feed is idle
    pub idle_interval: Duration,
    /// Maximum changes per poll
    pub batch_limit: usize,
    /// Server-side filter reference
    pub filter: String,
    /// Retry policy applied to the poll call
    pub retry: RetryConfig,
    /// Loop behavior on empty batches
    pub mode: RunMode,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(10),
            batch_limit: 100,
            filter: CONVOY_FEED_FILTER.to_string(),
            retry: RetryConfig::default(),
            mode: RunMode::Continuous,
        }
    }
}

impl FeedConfig {
    /// Create a builder for FeedConfig.
    pub fn builder() -> FeedConfigBuilder {
        FeedConfigBuilder::default()
    }
}

/// Builder for FeedConfig.
#[derive(Debug, Clone, Default)]
pub struct FeedConfigBuilder {
    idle_interval: Option<Duration>,
    batch_limit: Option<usize>,
    filter: Option<String>,
    retry: Option<RetryConfig>,
    mode: Option<RunMode>,
}

impl FeedConfigBuilder {
    /// Set the idle sleep interval.
    pub fn idle_interval(mut self, value: Duration) -> Self {
        self.idle_interval = Some(value);
        self
    }

    /// Set the per-poll batch limit.
    pub fn batch_limit(mut self, value: usize) -> Self {
        self.batch_limit = Some(value);
        self
    }

    /// Set the server-side filter reference.
    pub fn filter(mut self, value: impl Into<String>) -> Self {
        self.filter = Some(value.into());
        self
    }

    /// Set the poll retry policy.
    pub fn retry(mut self, value: RetryConfig) -> Self {
        self.retry = Some(value);
        self
    }

    /// Set the run mode.
    pub fn mode(mut self, value: RunMode) -> Self {
        self.mode = Some(value);
        self
    }

    /// Build the FeedConfig.
    pub fn build(self) -> FeedConfig {
        let defaults = FeedConfig::default();
        FeedConfig {
            idle_interval: self.idle_interval.unwrap_or(defaults.idle_interval),
            batch_limit: self.batch_limit.unwrap_or(defaults.batch_limit),
            filter: self.filter.unwrap_or(defaults.filter),
            retry: self.retry.unwrap_or(defaults.retry),
            mode: self.mode.unwrap_or(defaults.mode),
        }
    }
}

/// Resumable change-feed consumer for one feed.
///
/// Single logical worker: polling, dedup checks, and dispatch run
/// sequentially in one task. Run several instances against the same feed
/// only behind partitioning - the dedup store mitigates duplicate
/// delivery but does not prevent it at the source.
pub struct ChangeFeedConsumer {
    store: Arc<dyn DocumentStore>,
    dedup: Option<Arc<DedupStore>>,
    config: FeedConfig,
    shutdown: ShutdownSignal,
    cursor: Cursor,
}

impl ChangeFeedConsumer {
    /// Create a consumer starting from the store's origin.
    pub fn new(store: Arc<dyn DocumentStore>, config: FeedConfig, shutdown: ShutdownSignal) -> Self {
        Self {
            store,
            dedup: None,
            config,
            shutdown,
            cursor: Cursor::origin(),
        }
    }

    /// Suppress documents already marked present in the dedup store.
    pub fn with_dedup(mut self, dedup: Arc<DedupStore>) -> Self {
        self.dedup = Some(dedup);
        self
    }

    /// Resume polling from a known cursor instead of the origin.
    pub fn resume_from(mut self, cursor: Cursor) -> Self {
        self.cursor = cursor;
        self
    }

    /// Current cursor position.
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Run the feed loop, delivering events through `tx`.
    ///
    /// Returns `Ok(())` on clean termination: shutdown requested, receiver
    /// dropped, or the first empty batch in [`RunMode::SinglePass`].
    /// Returns an error only when a poll fails non-retriably or exhausts
    /// its retry budget.
    pub async fn run(mut self, tx: mpsc::Sender<ChangeEvent>) -> Result<()> {
        info!(
            "starting change feed from cursor {} (filter {})",
            self.cursor, self.config.filter
        );

        loop {
            let batch = self.poll().await?;
            // The store's cursor is authoritative, also when nothing changed
            self.cursor = batch.last_seq.clone();

            if batch.results.is_empty() {
                if self.shutdown.is_requested() {
                    info!("shutdown requested, stopping feed at cursor {}", self.cursor);
                    return Ok(());
                }
                if self.config.mode == RunMode::SinglePass {
                    info!("feed drained at cursor {}", self.cursor);
                    return Ok(());
                }
                sleep(self.config.idle_interval).await;
                continue;
            }

            // A started batch is drained to completion before the shutdown
            // signal is consulted
            for row in batch.results {
                let Some(event) = self.decode(row).await else {
                    continue;
                };
                if tx.send(event).await.is_err() {
                    info!("event receiver dropped, stopping feed");
                    return Ok(());
                }
            }

            if self.shutdown.is_requested() {
                info!("shutdown requested, stopping feed at cursor {}", self.cursor);
                return Ok(());
            }
        }
    }

    /// Spawn the feed loop on its own task, returning the event receiver
    /// and the task handle.
    pub fn spawn(self, buffer: usize) -> (mpsc::Receiver<ChangeEvent>, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = tokio::spawn(self.run(tx));
        (rx, handle)
    }

    async fn poll(&self) -> Result<ChangesBatch> {
        let request = ChangesRequest {
            since: self.cursor.clone(),
            limit: self.config.batch_limit,
            filter: self.config.filter.clone(),
            include_docs: true,
        };
        let store = Arc::clone(&self.store);
        with_retry(&self.config.retry, "change feed poll", || {
            let store = Arc::clone(&store);
            let request = request.clone();
            async move { store.changes(&request).await }
        })
        .await
    }

    /// Turn one feed row into a deliverable event, or `None` when the row
    /// should be skipped. Skips never halt the feed.
    async fn decode(&self, row: crate::store::ChangeRow) -> Option<ChangeEvent> {
        let seq = row.seq;
        let Some(doc) = row.doc else {
            debug!("change {} carried no document body, skipping", seq);
            return None;
        };
        let event: ChangeEvent = match ChangeEvent::from_document(doc) {
            Ok(event) => event,
            Err(e) => {
                warn!("skipping malformed document at {}: {}", seq, e);
                return None;
            }
        };
        if !event.is_auction() {
            debug!(
                "skipping {} at {}: entity kind {}",
                event.id, seq, event.doc_type
            );
            return None;
        }
        if let Some(dedup) = &self.dedup {
            match dedup.has(&event.id).await {
                Ok(true) => {
                    debug!("suppressing already processed {}", event.id);
                    return None;
                }
                Ok(false) => {}
                // Delivering a potential duplicate beats dropping an event;
                // downstream marking stays idempotent either way
                Err(e) => warn!("dedup lookup failed for {}: {}", event.id, e),
            }
        }
        Some(event)
    }
}
