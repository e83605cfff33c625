//! Record types stored by the CRDT maps.
//!
//! Both record shapes carry the causal [`Timestamp`] assigned by the writing
//! node and an optional TTL. Expiry is evaluated lazily by the owning map
//! against its HLC clock source: a record is expired once
//! `timestamp.millis + ttl_ms < now`.

use serde::{Deserialize, Serialize};

use crate::hlc::Timestamp;

/// A Last-Write-Wins record wrapping a value with its causal timestamp.
///
/// `value: None` denotes a tombstone (deletion marker). A record holding
/// `Some(Value::Null)` is a live null value; the two are deliberately
/// distinct so a stale write cannot resurrect a deleted key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "V: Serialize",
    deserialize = "V: serde::de::DeserializeOwned"
))]
pub struct LWWRecord<V> {
    /// The stored value, or `None` if this record is a tombstone.
    pub value: Option<V>,
    /// Causal timestamp assigned by the writing node's HLC.
    pub timestamp: Timestamp,
    /// Optional time-to-live in milliseconds.
    pub ttl_ms: Option<u64>,
}

impl<V> LWWRecord<V> {
    /// Whether this record is a deletion marker.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// The moment this record expires, or `None` if it never does.
    #[must_use]
    pub fn expires_at(&self) -> Option<u64> {
        self.ttl_ms.map(|ttl| self.timestamp.millis.saturating_add(ttl))
    }
}

/// An Observed-Remove Map record associating a value with a unique tag.
///
/// Each concurrent addition to an OR-Map entry gets a unique `tag`
/// (the stringified timestamp, `"millis:counter:nodeId"`). Removals retire
/// specific tags into a tombstone set, so concurrent adds and removes
/// resolve with add-wins semantics instead of lost updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "V: Serialize",
    deserialize = "V: serde::de::DeserializeOwned"
))]
pub struct ORMapRecord<V> {
    /// The stored value.
    pub value: V,
    /// Causal timestamp assigned by the writing node's HLC.
    pub timestamp: Timestamp,
    /// Unique tag identifying this particular addition.
    pub tag: String,
    /// Optional time-to-live in milliseconds.
    pub ttl_ms: Option<u64>,
}

impl<V> ORMapRecord<V> {
    /// The moment this record expires, or `None` if it never does.
    #[must_use]
    pub fn expires_at(&self) -> Option<u64> {
        self.ttl_ms.map(|ttl| self.timestamp.millis.saturating_add(ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn tombstone_detection() {
        let live = LWWRecord {
            value: Some(Value::Null),
            timestamp: Timestamp::new(1, 0, "n"),
            ttl_ms: None,
        };
        let dead: LWWRecord<Value> = LWWRecord {
            value: None,
            timestamp: Timestamp::new(2, 0, "n"),
            ttl_ms: None,
        };
        // Null value is live; absent value is a tombstone.
        assert!(!live.is_tombstone());
        assert!(dead.is_tombstone());
    }

    #[test]
    fn expires_at_saturates() {
        let record = LWWRecord {
            value: Some(Value::Int(1)),
            timestamp: Timestamp::new(u64::MAX - 5, 0, "n"),
            ttl_ms: Some(100),
        };
        assert_eq!(record.expires_at(), Some(u64::MAX));
    }

    #[test]
    fn lww_record_msgpack_roundtrip() {
        let record = LWWRecord {
            value: Some(Value::String("hello".to_string())),
            timestamp: Timestamp::new(1_700_000_000_000, 42, "node-abc"),
            ttl_ms: Some(5000),
        };
        let bytes = rmp_serde::to_vec(&record).expect("serialize");
        let decoded: LWWRecord<Value> = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(record, decoded);
    }

    #[test]
    fn or_record_msgpack_roundtrip() {
        let record = ORMapRecord {
            value: Value::Int(7),
            timestamp: Timestamp::new(999, 3, "tagger"),
            tag: "999:3:tagger".to_string(),
            ttl_ms: None,
        };
        let bytes = rmp_serde::to_vec(&record).expect("serialize");
        let decoded: ORMapRecord<Value> = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(record, decoded);
    }
}
