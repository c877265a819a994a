//! Server-side feed filter installation
//!
//! The change feed is filtered on the server by a small script stored in a
//! design document. The installer renders the script from the configured
//! track lists, compares byte-for-byte with what the store already holds,
//! and only writes on drift - safe to call on every startup.

use crate::error::Result;
use crate::store::DocumentStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

/// Well-known id of the design document holding the feed filters.
pub const FILTER_DOC_ID: &str = "_design/auction_filters";

/// Filter reference passed to change-feed queries.
pub const CONVOY_FEED_FILTER: &str = "auction_filters/convoy_feed";

/// Name of the filter entry maintained inside the design document.
const FILTER_NAME: &str = "convoy_feed";

const FILTER_TEMPLATE: &str = r#"function(doc, req) {
    if (doc.doc_type == 'Auction') {
        // basic track auctions
        if (__BASIC_TRACKS__.indexOf(doc.procurementMethodType) >= 0) {
            if (doc.status == 'pending.verification') {
                return true;
            } else if (['complete', 'cancelled', 'unsuccessful'].indexOf(doc.status) >= 0 && doc.merchandisingObject) {
                return true;
            };
        // loki track auctions
        } else if (__LOKI_TRACKS__.indexOf(doc.procurementMethodType) >= 0) {
            if (['complete', 'cancelled', 'unsuccessful'].indexOf(doc.status) >= 0 && doc.merchandisingObject) {
                return true;
            };
        };
    }
    return false;
}
"#;

/// Procurement-method-type lists governing which status transitions are
/// feed-worthy, per track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTypes {
    /// Basic-track procurement method types
    #[serde(default)]
    pub basic: Vec<String>,
    /// Loki-track procurement method types
    #[serde(default)]
    pub loki: Vec<String>,
}

impl TrackTypes {
    pub fn new(basic: Vec<String>, loki: Vec<String>) -> Self {
        Self { basic, loki }
    }
}

/// Render the filter script for the given track lists.
pub fn render_filter(tracks: &TrackTypes) -> Result<String> {
    let basic = serde_json::to_string(&tracks.basic)?;
    let loki = serde_json::to_string(&tracks.loki)?;
    Ok(FILTER_TEMPLATE
        .replace("__BASIC_TRACKS__", &basic)
        .replace("__LOKI_TRACKS__", &loki))
}

/// Ensure the `convoy_feed` filter exists in the store with the current
/// predicate body.
///
/// Returns `true` when a write happened, `false` when the stored filter
/// already matched. Calling this repeatedly with identical track lists
/// performs exactly one write.
pub async fn push_filter_doc(store: &dyn DocumentStore, tracks: &TrackTypes) -> Result<bool> {
    let rendered = render_filter(tracks)?;

    let mut doc = store
        .get(FILTER_DOC_ID)
        .await?
        .unwrap_or_else(|| json!({ "_id": FILTER_DOC_ID, "filters": {} }));
    if !doc.get("filters").is_some_and(Value::is_object) {
        doc["filters"] = json!({});
    }

    let stored = doc
        .pointer(&format!("/filters/{}", FILTER_NAME))
        .and_then(Value::as_str);
    if stored == Some(rendered.as_str()) {
        info!("filter doc '{}' is up to date", FILTER_NAME);
        return Ok(false);
    }

    doc["filters"][FILTER_NAME] = Value::String(rendered);
    store.save(doc).await?;
    info!("filter doc '{}' saved", FILTER_NAME);
    Ok(true)
}
