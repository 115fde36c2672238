use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One element of a wrapped field value. The scalar lives under `__text__`;
/// people fields carry a sibling `name` attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WrappedEntry {
    #[serde(rename = "__text__", skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A field value as fetched from the tracker.
///
/// Most fields arrive as a one-element list of wrapped entries. A few
/// (`Who`, `changed_by`, review numbers) are bare scalars. Anything else is
/// kept verbatim so no record shape fails to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Entries(Vec<WrappedEntry>),
    Scalar(String),
    Raw(Value),
}

impl FieldValue {
    /// The scalar text of this value: the first entry's `__text__`, or the
    /// bare string itself. `None` for empty lists and non-string shapes.
    pub fn text(&self) -> Option<&str> {
        match self {
            FieldValue::Entries(entries) => entries.first().and_then(|e| e.text.as_deref()),
            FieldValue::Scalar(s) => Some(s),
            FieldValue::Raw(_) => None,
        }
    }

    pub fn entries(&self) -> &[WrappedEntry] {
        match self {
            FieldValue::Entries(entries) => entries,
            _ => &[],
        }
    }
}

/// A record as produced by the tracker crawler, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Stable record identity assigned by the crawler; the store document id.
    pub uuid: String,
    /// URL of the tracker instance the record was fetched from.
    pub origin: String,
    #[serde(default)]
    pub data: HashMap<String, FieldValue>,
    #[serde(rename = "metadata__updated_on", skip_serializing_if = "Option::is_none")]
    pub updated_on: Option<Value>,
    #[serde(rename = "metadata__timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Anything else the crawler attached, kept so records re-emit unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One document ready for the bulk API, keyed by its store id.
#[derive(Debug, Clone)]
pub struct BulkDoc {
    pub id: String,
    pub body: Value,
}
