//! Record data types: schema-specific identifier extraction.
//!
//! A deployment accepts one data type, selected by `[records] data_type` and
//! resolved once at startup with [`for_data_type`]. Extractors work on the
//! structured mapping produced by [`crate::xml::decode`].

pub mod lido;
pub mod oai_dc;

use std::sync::Arc;

use indexmap::IndexSet;
use serde_json::Value;

use crate::error::IdentifierError;

pub use lido::Lido;
pub use oai_dc::OaiDc;

/// Identifier extraction for one record schema.
pub trait IdentifierExtractor: Send + Sync {
    /// Configuration name of the data type.
    fn data_type(&self) -> &'static str;

    /// Record identifiers, preferred first. Never empty on success.
    fn record_ids(&self, json: &Value) -> Result<Vec<String>, IdentifierError>;

    /// Identifiers of the described object. May be empty.
    fn object_ids(&self, json: &Value) -> Result<Vec<String>, IdentifierError>;
}

/// Resolve a configured data type name.
pub fn for_data_type(name: &str) -> Result<Arc<dyn IdentifierExtractor>, IdentifierError> {
    match name {
        "lido" => Ok(Arc::new(Lido)),
        "oai_dc" => Ok(Arc::new(OaiDc)),
        other => Err(IdentifierError::UnknownDataType {
            name: other.to_string(),
        }),
    }
}

/// A repeated element is an array; a single one is not.
pub(crate) fn items(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    let slice: &[Value] = match value {
        Some(Value::Array(items)) => items,
        Some(single) => std::slice::from_ref(single),
        None => &[],
    };
    slice.iter()
}

/// Text content of a mapped element.
pub(crate) fn text(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("#text").and_then(Value::as_str),
        _ => None,
    }
}

pub(crate) fn attribute<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value.get(format!("@{name}")).and_then(Value::as_str)
}

/// Trimmed, non-empty, de-duplicated texts in order.
pub(crate) fn texts<'a>(values: impl Iterator<Item = &'a Value>) -> Vec<String> {
    values
        .filter_map(text)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}
