//! # convoy-feed - resumable change-feed consumption
//!
//! Consumes a document store's change feed, filters it server-side, and
//! hands each new auction document to downstream processing exactly once
//! at the application level, surviving restarts and transient backend
//! failures.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    ensure filter     ┌─────────────────────┐
//! │ push_filter_ │ ───────────────────► │   Document store    │
//! │     doc      │                      │  (_changes + docs)  │
//! └──────────────┘                      └──────────┬──────────┘
//!                                                  │ poll (cursor,
//!                                                  │ filter, limit)
//!                                                  ▼
//! ┌──────────────┐   has(id)?   ┌─────────────────────────────┐
//! │  DedupStore  │ ◄──────────► │     ChangeFeedConsumer      │
//! │ redis / file │   put(id)    │  poll → dispatch-or-idle    │
//! └──────────────┘  (by caller) └──────────────┬──────────────┘
//!                                              │ ChangeEvent
//!                                              ▼
//!                                    downstream processing
//! ```
//!
//! The cursor is held in memory only; after a restart the consumer replays
//! from the origin and the dedup store suppresses documents that were
//! already delivered. Shutdown is cooperative: a [`ShutdownSignal`] is
//! polled between batches and around the idle sleep, so a started batch is
//! always drained before the loop stops.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use convoy_feed::{
//!     push_filter_doc, ChangeFeedConsumer, CouchStore, FeedConfig, ShutdownSignal, TrackTypes,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> convoy_feed::Result<()> {
//! let store = Arc::new(CouchStore::new("http://127.0.0.1:5984", "auctions")?);
//! store.ensure_database().await?;
//!
//! let tracks = TrackTypes::new(
//!     vec!["sellout.english".to_string()],
//!     vec!["sellout.english.loki".to_string()],
//! );
//! push_filter_doc(store.as_ref(), &tracks).await?;
//!
//! let shutdown = ShutdownSignal::new();
//! shutdown.listen_for_ctrl_c();
//!
//! let consumer = ChangeFeedConsumer::new(store, FeedConfig::default(), shutdown);
//! let (mut events, _handle) = consumer.spawn(64);
//! while let Some(event) = events.recv().await {
//!     println!("new auction {}", event.id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod consumer;
pub mod dedup;
pub mod error;
pub mod event;
pub mod filter;
pub mod retry;
pub mod signal;
pub mod store;

// Core types
pub use consumer::{ChangeFeedConsumer, FeedConfig, FeedConfigBuilder, RunMode};
pub use error::{FeedError, Result};
pub use event::{AuctionStatus, ChangeEvent, Cursor};
pub use signal::ShutdownSignal;
pub use store::{ChangeRow, ChangesBatch, ChangesRequest, CouchStore, DocumentStore, MemoryStore};

// Dedup mapping
pub use dedup::{DedupConfig, DedupStore, PROCESSED_MARKER};

// Filter installation
pub use filter::{push_filter_doc, render_filter, TrackTypes, CONVOY_FEED_FILTER, FILTER_DOC_ID};

// Retry policy
pub use retry::{with_retry, RetryConfig, RetryConfigBuilder};

// Bootstrap
pub use bootstrap::{
    init_clients, ApiClient, ApiConfig, BootstrapConfig, Clients, DbConfig, ResourceOutcome,
};
