//! Simple Dublin Core (`oai_dc:dc`) records.

use serde_json::Value;

use crate::error::IdentifierError;

use super::{IdentifierExtractor, items, texts};

const DATA_TYPE: &str = "oai_dc";

/// Uses `dc:identifier` values as record identifiers, in document order.
/// Dublin Core has no separate object identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct OaiDc;

impl OaiDc {
    fn record<'a>(&self, json: &'a Value) -> Result<&'a Value, IdentifierError> {
        json.get("dc").ok_or(IdentifierError::WrongSchema {
            data_type: DATA_TYPE,
            expected: "oai_dc:dc",
        })
    }
}

impl IdentifierExtractor for OaiDc {
    fn data_type(&self) -> &'static str {
        DATA_TYPE
    }

    fn record_ids(&self, json: &Value) -> Result<Vec<String>, IdentifierError> {
        let ids = texts(items(self.record(json)?.get("identifier")));
        if ids.is_empty() {
            return Err(IdentifierError::MissingRecordId {
                data_type: DATA_TYPE,
            });
        }
        Ok(ids)
    }

    fn object_ids(&self, json: &Value) -> Result<Vec<String>, IdentifierError> {
        self.record(json)?;
        Ok(Vec::new())
    }
}
