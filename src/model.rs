//! Stored document types: records and sets.

use std::num::NonZeroU64;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store-assigned primary key of a record.
///
/// Uses `NonZeroU64` so that `Option<DocumentId>` is the same size as
/// `DocumentId`; a record without an id has not been stored yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DocumentId(NonZeroU64);

impl DocumentId {
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(DocumentId)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A metadata record.
///
/// `raw` is the submitted XML, byte for byte. `json` is its structured
/// mapping, kept serialized and decoded on demand with [`Record::json_value`].
/// Both are always written together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: Option<DocumentId>,
    /// The first entry is the canonical identifier.
    pub record_ids: Vec<String>,
    pub object_ids: Vec<String>,
    /// Set specs, `"<rule key>:<normalized label>"`.
    pub sets: IndexSet<String>,
    pub raw: String,
    pub json: String,
}

impl Record {
    /// Build an unsaved record.
    pub fn new(
        record_ids: Vec<String>,
        object_ids: Vec<String>,
        sets: IndexSet<String>,
        raw: String,
        json: &Value,
    ) -> Self {
        Self {
            id: None,
            record_ids,
            object_ids,
            sets,
            raw,
            json: json.to_string(),
        }
    }

    /// The identifier used for lookups and locations.
    pub fn canonical_id(&self) -> Option<&str> {
        self.record_ids.first().map(String::as_str)
    }

    pub fn json_value(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.json)
    }

    /// Overwrite everything but the primary key with `other`'s content.
    pub fn replace_content(&mut self, other: Record) {
        let Record {
            record_ids,
            object_ids,
            sets,
            raw,
            json,
            ..
        } = other;
        self.record_ids = record_ids;
        self.object_ids = object_ids;
        self.sets = sets;
        self.raw = raw;
        self.json = json;
    }

    pub fn in_set(&self, spec: &str) -> bool {
        self.sets.contains(spec)
    }
}

/// A classification set. `spec` is unique; `name` is the label as first seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Set {
    pub spec: String,
    pub name: String,
}

impl Set {
    pub fn new(spec: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            spec: spec.into(),
            name: name.into(),
        }
    }
}
