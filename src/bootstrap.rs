//! Client bootstrap
//!
//! Constructs the upstream API clients, the document-store handle, and the
//! dedup store from one configuration block. Construction failures are
//! collected rather than short-circuiting: every resource is attempted,
//! each outcome is logged, and only then is the first failure raised -
//! startup problems show the complete picture, not just the first one.

use crate::dedup::{DedupConfig, DedupStore};
use crate::error::{FeedError, Result};
use crate::store::CouchStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use url::Url;

/// Connection settings for one upstream API resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the API host
    pub url: String,
    /// Access token
    pub token: String,
    /// API version segment
    pub version: String,
}

/// Thin documents-by-id client for one upstream API host.
///
/// Non-2xx responses surface as [`FeedError::Api`] so the retry policy can
/// classify them by status.
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    token: String,
    version: String,
}

impl ApiClient {
    /// Create a client from configuration.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let normalized = if config.url.ends_with('/') {
            config.url.clone()
        } else {
            format!("{}/", config.url)
        };
        let base = Url::parse(&normalized)
            .map_err(|e| FeedError::config(format!("invalid API URL {}: {}", config.url, e)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token: config.token.clone(),
            version: config.version.clone(),
        })
    }

    /// Fetch one resource document by id.
    pub async fn get_document(&self, resource: &str, id: &str) -> Result<Value> {
        let url = self
            .base
            .join(&format!("api/{}/{}/{}", self.version, resource, id))
            .map_err(|e| FeedError::config(format!("invalid resource path: {}", e)))?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FeedError::api(status.as_u16(), message));
        }
        Ok(response.json().await?)
    }
}

/// Connection settings for the document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    /// Database name
    pub name: String,
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Full bootstrap configuration. Sections left `None` are not initialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub auctions: Option<ApiConfig>,
    #[serde(default)]
    pub lots: Option<ApiConfig>,
    #[serde(default)]
    pub assets: Option<ApiConfig>,
    #[serde(default)]
    pub contracts: Option<ApiConfig>,
    #[serde(default)]
    pub db: Option<DbConfig>,
    #[serde(default)]
    pub dedup: DedupConfig,
}

/// Per-resource construction outcome.
#[derive(Debug, Clone)]
pub struct ResourceOutcome {
    pub resource: String,
    /// `None` on success, the failure message otherwise
    pub failure: Option<String>,
}

impl ResourceOutcome {
    fn ok(resource: &str) -> Self {
        Self {
            resource: resource.to_string(),
            failure: None,
        }
    }

    fn failed(resource: &str, error: &FeedError) -> Self {
        Self {
            resource: resource.to_string(),
            failure: Some(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }
}

/// Fully constructed collaborators for the feed process.
pub struct Clients {
    pub auctions_client: Option<ApiClient>,
    pub lots_client: Option<ApiClient>,
    pub assets_client: Option<ApiClient>,
    pub contracts_client: Option<ApiClient>,
    pub db: CouchStore,
    pub dedup: DedupStore,
    /// Construction record, one entry per attempted resource
    pub outcomes: Vec<ResourceOutcome>,
}

/// Build all configured clients, the document store, and the dedup store.
///
/// All resources are attempted even when earlier ones fail; the first
/// collected error is raised after every outcome has been logged.
pub async fn init_clients(config: BootstrapConfig) -> Result<Clients> {
    let mut outcomes: Vec<ResourceOutcome> = Vec::new();
    let mut errors: Vec<FeedError> = Vec::new();

    let sections = [
        ("auctions_client", &config.auctions),
        ("lots_client", &config.lots),
        ("assets_client", &config.assets),
        ("contracts_client", &config.contracts),
    ];
    info!(
        "initializing clients for: {:?}",
        sections
            .iter()
            .filter(|(_, c)| c.is_some())
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
    );

    let mut build_client = |name: &str, section: &Option<ApiConfig>| -> Option<ApiClient> {
        let api = section.as_ref()?;
        match ApiClient::new(api) {
            Ok(client) => {
                outcomes.push(ResourceOutcome::ok(name));
                Some(client)
            }
            Err(e) => {
                outcomes.push(ResourceOutcome::failed(name, &e));
                errors.push(e);
                None
            }
        }
    };

    let auctions_client = build_client("auctions_client", &config.auctions);
    let lots_client = build_client("lots_client", &config.lots);
    let assets_client = build_client("assets_client", &config.assets);
    let contracts_client = build_client("contracts_client", &config.contracts);

    let db = match prepare_couchdb(config.db.as_ref()).await {
        Ok(db) => {
            outcomes.push(ResourceOutcome::ok("couchdb"));
            Some(db)
        }
        Err(e) => {
            outcomes.push(ResourceOutcome::failed("couchdb", &e));
            errors.push(e);
            None
        }
    };

    let dedup = match prepare_dedup(config.dedup).await {
        Ok(dedup) => {
            outcomes.push(ResourceOutcome::ok("auctions_mapping"));
            Some(dedup)
        }
        Err(e) => {
            outcomes.push(ResourceOutcome::failed("auctions_mapping", &e));
            errors.push(e);
            None
        }
    };

    for outcome in &outcomes {
        match &outcome.failure {
            None => info!("{} - ok", outcome.resource),
            Some(failure) => error!("{} - failed: {}", outcome.resource, failure),
        }
    }

    if !errors.is_empty() {
        return Err(errors.remove(0));
    }
    let (Some(db), Some(dedup)) = (db, dedup) else {
        return Err(FeedError::config("bootstrap incomplete"));
    };

    Ok(Clients {
        auctions_client,
        lots_client,
        assets_client,
        contracts_client,
        db,
        dedup,
        outcomes,
    })
}

/// Build the document-store handle and make sure its database exists.
async fn prepare_couchdb(config: Option<&DbConfig>) -> Result<CouchStore> {
    let config = config.ok_or_else(|| FeedError::config("missing db configuration section"))?;

    let url = format!("http://{}:{}", config.host, config.port);
    let store = match (&config.login, &config.password) {
        (Some(login), Some(password)) if !login.is_empty() && !password.is_empty() => {
            info!("couchdb - authorized");
            CouchStore::new(&url, &config.name)?.with_credentials(login, password)
        }
        _ => {
            warn!("couchdb without credentials");
            CouchStore::new(&url, &config.name)?
        }
    };
    store.ensure_database().await?;
    Ok(store)
}

/// Connect the dedup store and run its startup self-check.
async fn prepare_dedup(config: DedupConfig) -> Result<DedupStore> {
    let store = DedupStore::connect(config).await?;
    store.self_check().await?;
    Ok(store)
}
