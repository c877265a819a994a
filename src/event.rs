//! Change event representation
//!
//! Typed view over documents coming back from the store's change feed,
//! plus the opaque sequence cursor used to resume polling.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};

/// Opaque, monotonically non-decreasing sequence token issued by the
/// document store.
///
/// Older store versions emit integer sequence values, newer ones emit
/// composite strings; both deserialize into the same token. The cursor is
/// held in process memory only - restart replays from [`Cursor::origin`]
/// and relies on the dedup store to suppress reprocessing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// The store's origin value - where a fresh consumer starts.
    pub fn origin() -> Self {
        Self("0".to_string())
    }

    /// Create a cursor from a raw sequence token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::origin()
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) => Ok(Cursor(s)),
            serde_json::Value::Number(n) => Ok(Cursor(n.to_string())),
            other => Err(D::Error::custom(format!(
                "invalid sequence token: {}",
                other
            ))),
        }
    }
}

/// Auction lifecycle status as observed on the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    /// Awaiting verification before processing
    #[serde(rename = "pending.verification")]
    PendingVerification,
    /// Finished successfully
    Complete,
    /// Cancelled before completion
    Cancelled,
    /// Finished without a winner
    Unsuccessful,
    /// Any status this consumer does not act on
    #[default]
    #[serde(other)]
    Other,
}

impl AuctionStatus {
    /// Check if the auction reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Unsuccessful)
    }
}

/// A materialized document yielded by the change feed.
///
/// The fields this consumer routes on are typed; everything else the
/// document carries is retained in `extra` and travels with the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Document identifier
    pub id: String,
    /// Entity kind discriminator - the feed may carry other kinds
    #[serde(default)]
    pub doc_type: String,
    /// Lifecycle status
    #[serde(default)]
    pub status: AuctionStatus,
    /// Procurement method type, matched against the configured track lists
    #[serde(rename = "procurementMethodType", default)]
    pub procurement_method_type: String,
    /// Reference to the merchandising object, present once one is attached
    #[serde(
        rename = "merchandisingObject",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub merchandising_object: Option<String>,
    /// Remaining document fields, untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChangeEvent {
    /// Deserialize a feed document.
    ///
    /// Store documents are keyed `_id`; the identifier is taken from `id`
    /// or, failing that, `_id`. A serde alias cannot express this because
    /// documents routinely carry both keys, which an alias would reject as
    /// a duplicate field.
    pub fn from_document(
        mut doc: serde_json::Value,
    ) -> std::result::Result<Self, serde_json::Error> {
        if doc.get("id").is_none() {
            if let Some(id) = doc.get("_id").cloned() {
                doc["id"] = id;
            }
        }
        serde_json::from_value(doc)
    }

    /// Check the entity kind discriminator.
    pub fn is_auction(&self) -> bool {
        self.doc_type == "Auction"
    }

    /// Look up an unmodeled document field.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.extra.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cursor_from_integer_seq() {
        let c: Cursor = serde_json::from_value(json!(42)).unwrap();
        assert_eq!(c.as_str(), "42");
    }

    #[test]
    fn test_cursor_from_string_seq() {
        let c: Cursor = serde_json::from_value(json!("42-g1AAAA")).unwrap();
        assert_eq!(c.as_str(), "42-g1AAAA");
    }

    #[test]
    fn test_cursor_rejects_other_shapes() {
        assert!(serde_json::from_value::<Cursor>(json!([1, 2])).is_err());
    }

    #[test]
    fn test_cursor_origin() {
        assert_eq!(Cursor::origin().as_str(), "0");
        assert_eq!(Cursor::default(), Cursor::origin());
    }

    #[test]
    fn test_status_parsing() {
        let s: AuctionStatus = serde_json::from_value(json!("pending.verification")).unwrap();
        assert_eq!(s, AuctionStatus::PendingVerification);
        assert!(!s.is_terminal());

        let s: AuctionStatus = serde_json::from_value(json!("complete")).unwrap();
        assert!(s.is_terminal());

        let s: AuctionStatus = serde_json::from_value(json!("active.tendering")).unwrap();
        assert_eq!(s, AuctionStatus::Other);
    }

    #[test]
    fn test_event_deserialization() {
        let event: ChangeEvent = serde_json::from_value(json!({
            "id": "a1",
            "doc_type": "Auction",
            "status": "pending.verification",
            "procurementMethodType": "sellout.english",
            "title": "Scrap metal",
        }))
        .unwrap();

        assert!(event.is_auction());
        assert_eq!(event.status, AuctionStatus::PendingVerification);
        assert_eq!(event.procurement_method_type, "sellout.english");
        assert_eq!(event.merchandising_object, None);
        assert_eq!(event.field("title"), Some(&json!("Scrap metal")));
    }

    #[test]
    fn test_event_id_from_store_key() {
        // Store-keyed only
        let event = ChangeEvent::from_document(json!({
            "_id": "a4",
            "doc_type": "Auction",
        }))
        .unwrap();
        assert_eq!(event.id, "a4");

        // Both keys present: `id` wins, `_id` travels in extra
        let event = ChangeEvent::from_document(json!({
            "id": "a5",
            "_id": "a5",
            "doc_type": "Auction",
        }))
        .unwrap();
        assert_eq!(event.id, "a5");
        assert_eq!(event.field("_id"), Some(&json!("a5")));
    }

    #[test]
    fn test_event_with_merchandising_object() {
        let event: ChangeEvent = serde_json::from_value(json!({
            "id": "a2",
            "doc_type": "Auction",
            "status": "complete",
            "merchandisingObject": "lot-7",
        }))
        .unwrap();

        assert_eq!(event.merchandising_object.as_deref(), Some("lot-7"));
    }

    #[test]
    fn test_non_auction_document() {
        let event: ChangeEvent = serde_json::from_value(json!({
            "id": "t1",
            "doc_type": "Tender",
        }))
        .unwrap();

        assert!(!event.is_auction());
        assert_eq!(event.status, AuctionStatus::Other);
    }

    #[test]
    fn test_event_roundtrip_keeps_extra_fields() {
        let doc = json!({
            "id": "a3",
            "doc_type": "Auction",
            "status": "cancelled",
            "procurementMethodType": "sellout.insider",
            "contracts": [{"id": "c1"}],
        });

        let event: ChangeEvent = serde_json::from_value(doc).unwrap();
        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["contracts"][0]["id"], "c1");
        assert_eq!(back["status"], "cancelled");
    }
}
