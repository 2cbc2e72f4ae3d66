//! Core types for reactive aggregations.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// A JSON object: one result record, an options bag, or an extras record.
pub type Document = serde_json::Map<String, Value>;

/// Boxed error returned by external collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Identity of a result record, used to correlate it across recomputes.
///
/// Integers and strings are kept as-is. Any other JSON value (an object id
/// wrapper, a float, a compound key) is keyed by its compact serialization,
/// which is stable because object keys serialize in sorted order.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentId {
    Int(i64),
    Str(String),
    Json(String),
}

impl DocumentId {
    /// Build an identity from a JSON value. `null` is not an identity.
    ///
    /// Numbers are matched exactly as written: `1` is `Int(1)` while `1.0`
    /// is `Json("1.0")`, so the two name different documents.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(DocumentId::Str(s.clone())),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(DocumentId::Int(i)),
                None => Some(DocumentId::Json(n.to_string())),
            },
            other => Some(DocumentId::Json(other.to_string())),
        }
    }

    /// Read the identity stored under `field` of a record.
    pub fn of_record(record: &Value, field: &str) -> Option<Self> {
        record.get(field).and_then(Self::from_value)
    }

    /// Convert back to the JSON value this identity was built from.
    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int(i) => Value::from(*i),
            DocumentId::Str(s) => Value::String(s.clone()),
            DocumentId::Json(text) => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
            }
        }
    }
}

impl From<i64> for DocumentId {
    fn from(id: i64) -> Self {
        DocumentId::Int(id)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        DocumentId::Str(id.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        DocumentId::Str(id)
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(i) => write!(f, "DocumentId({})", i),
            DocumentId::Str(s) => write!(f, "DocumentId({:?})", s),
            DocumentId::Json(text) => write!(f, "DocumentId({})", text),
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(i) => write!(f, "{}", i),
            DocumentId::Str(s) => f.write_str(s),
            DocumentId::Json(text) => f.write_str(text),
        }
    }
}

impl Serialize for DocumentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            DocumentId::Int(i) => serializer.serialize_i64(*i),
            DocumentId::Str(s) => serializer.serialize_str(s),
            DocumentId::Json(_) => self.to_value().serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DocumentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        DocumentId::from_value(&value).ok_or_else(|| D::Error::custom("document id cannot be null"))
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Recompute epoch. Zero means no recompute has completed yet.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Iteration(pub u64);

impl Iteration {
    pub fn next(self) -> Self {
        Iteration(self.0 + 1)
    }
}

impl fmt::Debug for Iteration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iter({})", self.0)
    }
}

/// Kind of change reported by an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Changed,
    Removed,
}

/// Subscription statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregateStats {
    /// Change signals received after initialization.
    pub signals: u64,
    /// Recomputes that published a snapshot.
    pub recomputes: u64,
    /// Recomputes that failed (aggregation error or bad shape).
    pub failed_recomputes: u64,
    /// Identities currently published.
    pub published_documents: usize,
    /// Iteration of the last successful recompute.
    pub iteration: Iteration,
}
