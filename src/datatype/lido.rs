//! LIDO (Lightweight Information Describing Objects) records.

use serde_json::Value;

use crate::error::IdentifierError;

use super::{IdentifierExtractor, attribute, items, texts};

const DATA_TYPE: &str = "lido";

/// Extracts `lidoRecID` and `objectPublishedID` values. Identifiers marked
/// `pref="preferred"` come first, so the canonical identifier is the first
/// preferred one, or the first one listed when none is marked.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lido;

impl Lido {
    /// The `lido` element, whether submitted bare or inside a `lidoWrap`
    /// (where the first one is used).
    fn record<'a>(&self, json: &'a Value) -> Result<&'a Value, IdentifierError> {
        let lido = match json.get("lidoWrap") {
            Some(wrap) => items(wrap.get("lido")).next(),
            None => json.get("lido"),
        };
        lido.ok_or(IdentifierError::WrongSchema {
            data_type: DATA_TYPE,
            expected: "lido:lido",
        })
    }

    fn preferred_first(&self, values: Option<&Value>) -> Vec<String> {
        let (preferred, rest): (Vec<&Value>, Vec<&Value>) =
            items(values).partition(|v| attribute(v, "pref") == Some("preferred"));
        texts(preferred.into_iter().chain(rest))
    }
}

impl IdentifierExtractor for Lido {
    fn data_type(&self) -> &'static str {
        DATA_TYPE
    }

    fn record_ids(&self, json: &Value) -> Result<Vec<String>, IdentifierError> {
        let ids = self.preferred_first(self.record(json)?.get("lidoRecID"));
        if ids.is_empty() {
            return Err(IdentifierError::MissingRecordId {
                data_type: DATA_TYPE,
            });
        }
        Ok(ids)
    }

    fn object_ids(&self, json: &Value) -> Result<Vec<String>, IdentifierError> {
        Ok(self.preferred_first(self.record(json)?.get("objectPublishedID")))
    }
}
