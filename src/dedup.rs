//! Processed-document mapping
//!
//! Key/value store recording which document ids have already been delivered
//! downstream. This mapping is the durability boundary for restarts: the
//! feed cursor is not persisted, so a restarted consumer replays from the
//! origin and relies on this store to suppress reprocessing.
//!
//! Two interchangeable backends, selected by a tagged configuration
//! variant resolved once at construction:
//!
//! - **Networked**: a redis database, for deployments where several
//!   processes need to see the same mapping
//! - **Embedded**: a local JSON file with atomic writes, for single-node
//!   deployments and tests

use crate::error::{FeedError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Marker value stored against processed ids.
pub const PROCESSED_MARKER: &str = "1";

/// Backend selection for the dedup store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DedupConfig {
    /// Networked key/value cache.
    Networked {
        host: String,
        #[serde(default = "default_port")]
        port: u16,
        /// Database index
        #[serde(default)]
        db: i64,
        #[serde(default)]
        password: Option<String>,
    },
    /// Local file-backed store.
    Embedded {
        /// File path of the mapping database
        name: String,
    },
}

fn default_port() -> u16 {
    6379
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self::Embedded {
            name: "auctions_mapping".to_string(),
        }
    }
}

impl DedupConfig {
    /// Networked backend with default port and database index.
    pub fn networked(host: impl Into<String>) -> Self {
        Self::Networked {
            host: host.into(),
            port: default_port(),
            db: 0,
            password: None,
        }
    }

    /// Embedded backend at the given path.
    pub fn embedded(name: impl Into<String>) -> Self {
        Self::Embedded { name: name.into() }
    }
}

enum Backend {
    Redis(redis::aio::MultiplexedConnection),
    File(FileBackend),
}

/// Store of already-processed document ids.
pub struct DedupStore {
    backend: Backend,
}

impl DedupStore {
    /// Resolve the configured backend and connect to it.
    pub async fn connect(config: DedupConfig) -> Result<Self> {
        let backend = match config {
            DedupConfig::Networked {
                host,
                port,
                db,
                password,
            } => {
                let url = match &password {
                    Some(password) => {
                        format!("redis://:{}@{}:{}/{}", password, host, port, db)
                    }
                    None => format!("redis://{}:{}/{}", host, port, db),
                };
                let client = redis::Client::open(url)?;
                let conn = client.get_multiplexed_async_connection().await?;
                info!(
                    "using redis store {}:{}/{} as processed-documents mapping",
                    host, port, db
                );
                Backend::Redis(conn)
            }
            DedupConfig::Embedded { name } => {
                let backend = FileBackend::open(PathBuf::from(&name)).await?;
                info!(
                    "using embedded store {} as processed-documents mapping",
                    name
                );
                Backend::File(backend)
            }
        };
        Ok(Self { backend })
    }

    /// Check whether an id was already delivered.
    pub async fn has(&self, key: &str) -> Result<bool> {
        match &self.backend {
            Backend::Redis(conn) => {
                use redis::AsyncCommands;
                let mut conn = conn.clone();
                Ok(conn.exists(key).await?)
            }
            Backend::File(file) => file.has(key).await,
        }
    }

    /// Fetch the marker stored against an id. `None` if absent.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        match &self.backend {
            Backend::Redis(conn) => {
                use redis::AsyncCommands;
                let mut conn = conn.clone();
                Ok(conn.get(key).await?)
            }
            Backend::File(file) => file.get(key).await,
        }
    }

    /// Record an id as delivered, optionally expiring after `ttl`.
    ///
    /// A zero `ttl` means no expiry; redis rejects `SETEX key 0` outright.
    pub async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        info!("save id {} in processed-documents mapping", key);
        let ttl = ttl.filter(|ttl| !ttl.is_zero());
        match &self.backend {
            Backend::Redis(conn) => {
                use redis::AsyncCommands;
                let mut conn = conn.clone();
                match ttl {
                    Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?,
                    None => conn.set::<_, _, ()>(key, value).await?,
                }
                Ok(())
            }
            Backend::File(file) => file.put(key, value, ttl).await,
        }
    }

    /// Remove an id from the mapping.
    pub async fn delete(&self, key: &str) -> Result<()> {
        match &self.backend {
            Backend::Redis(conn) => {
                use redis::AsyncCommands;
                let mut conn = conn.clone();
                conn.del::<_, ()>(key).await?;
                Ok(())
            }
            Backend::File(file) => file.delete(key).await,
        }
    }

    /// Verify the backend round-trips a sentinel key.
    ///
    /// Writes `test=1`, asserts presence and value, deletes, asserts
    /// absence. Fails fast with a configuration error when the backend is
    /// unreachable or misbehaving.
    pub async fn self_check(&self) -> Result<()> {
        self.put("test", PROCESSED_MARKER, None).await?;
        if !self.has("test").await? {
            return Err(FeedError::config(
                "dedup store self-check failed: sentinel key missing after put",
            ));
        }
        if self.get("test").await?.as_deref() != Some(PROCESSED_MARKER) {
            return Err(FeedError::config(
                "dedup store self-check failed: sentinel value mismatch",
            ));
        }
        self.delete("test").await?;
        if self.has("test").await? {
            return Err(FeedError::config(
                "dedup store self-check failed: sentinel key present after delete",
            ));
        }
        debug!("dedup store self-check passed");
        Ok(())
    }
}

// ============================================================================
// Embedded file backend
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<u64>,
}

impl FileEntry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// File-backed mapping with an in-memory cache and atomic persistence
/// (temp file + rename).
struct FileBackend {
    path: PathBuf,
    cache: RwLock<HashMap<String, FileEntry>>,
}

impl FileBackend {
    async fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    FeedError::config(format!("cannot create dedup store directory: {}", e))
                })?;
            }
        }

        let entries = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| FeedError::config(format!("corrupt dedup store file: {}", e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(FeedError::config(format!(
                    "cannot open dedup store file: {}",
                    e
                )))
            }
        };

        Ok(Self {
            path,
            cache: RwLock::new(entries),
        })
    }

    async fn persist(&self, entries: &HashMap<String, FileEntry>) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries)?;
        let temp = self.path.with_extension("tmp");
        fs::write(&temp, &json).await?;
        fs::rename(&temp, &self.path).await?;
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let cache = self.cache.read().await;
        Ok(cache
            .get(key)
            .map(|e| !e.is_expired(now_secs()))
            .unwrap_or(false))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let cache = self.cache.read().await;
        Ok(cache
            .get(key)
            .filter(|e| !e.is_expired(now_secs()))
            .map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut cache = self.cache.write().await;
        let now = now_secs();
        cache.retain(|_, e| !e.is_expired(now));
        cache.insert(
            key.to_string(),
            FileEntry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| now + ttl.as_secs()),
            },
        );
        self.persist(&cache).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut cache = self.cache.write().await;
        cache.remove(key);
        self.persist(&cache).await
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
