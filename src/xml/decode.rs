//! Record body decoding.
//!
//! A submitted record arrives as raw bytes. Decoding validates the encoding,
//! replaces characters that XML 1.0 forbids, parses the document and derives
//! the structured mapping stored alongside the raw text.
//!
//! The mapping keys elements by local name, so `<lido:lidoRecID>` becomes
//! `"lidoRecID"`. Attributes become `"@name"` (except `xml:` attributes, which
//! keep their prefix: `"@xml:lang"`), repeated siblings become arrays and
//! text becomes a string, or `"#text"` when the element also has attributes
//! or children.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::DecodeError;

use super::{NodeId, XmlDocument};

/// Characters XML 1.0 does not allow in a document.
static RE_ILLEGAL_XML: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x{FFFE}\x{FFFF}]").unwrap()
});

/// Replace XML-illegal characters with U+FFFD.
pub fn sanitize(text: &str) -> Cow<'_, str> {
    RE_ILLEGAL_XML.replace_all(text, "\u{FFFD}")
}

/// A decoded record body.
#[derive(Debug, Clone)]
pub struct Decoded {
    /// The body exactly as received.
    pub raw: String,
    pub document: XmlDocument,
    /// `{ "<root local name>": <content> }`
    pub json: Value,
}

/// Decode a request body into a document and its structured mapping.
pub fn decode(body: &[u8]) -> Result<Decoded, DecodeError> {
    let raw = std::str::from_utf8(body).map_err(|_| DecodeError::Encoding)?;
    decode_str(raw)
}

/// Like [`decode`], for text that is already known to be UTF-8.
pub fn decode_str(raw: &str) -> Result<Decoded, DecodeError> {
    if raw.trim().is_empty() {
        return Err(DecodeError::Empty);
    }
    let document = XmlDocument::parse(&sanitize(raw))?;
    let root = document.root();
    if is_empty_element(&document, root) {
        return Err(DecodeError::Empty);
    }

    let mut wrapper = Map::new();
    let root_name = document
        .name(root)
        .map(|n| n.local.clone())
        .unwrap_or_default();
    wrapper.insert(root_name, to_value(&document, root));

    Ok(Decoded {
        raw: raw.to_string(),
        document,
        json: Value::Object(wrapper),
    })
}

fn is_empty_element(doc: &XmlDocument, id: NodeId) -> bool {
    doc.attributes(id).is_empty()
        && doc.children(id).iter().all(|&c| {
            doc.text(c).is_some_and(|t| t.trim().is_empty())
        })
}

/// Structured value of one element.
pub fn to_value(doc: &XmlDocument, id: NodeId) -> Value {
    let mut map = Map::new();
    for attr in doc.attributes(id) {
        let key = match attr.name.prefix.as_deref() {
            Some("xml") => format!("@xml:{}", attr.name.local),
            _ => format!("@{}", attr.name.local),
        };
        map.insert(key, Value::String(attr.value.clone()));
    }

    let mut text = String::new();
    for &child in doc.children(id) {
        if let Some(t) = doc.text(child) {
            text.push_str(t);
            continue;
        }
        let Some(name) = doc.name(child) else {
            continue;
        };
        let value = to_value(doc, child);
        match map.get_mut(&name.local) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(name.local.clone(), value);
            }
        }
    }

    let text = text.trim();
    if map.is_empty() {
        return Value::String(text.to_string());
    }
    if !text.is_empty() {
        map.insert("#text".to_string(), Value::String(text.to_string()));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_elements_attributes_and_repeats() {
        let decoded = decode_str(
            r#"<lido:lidoWrap xmlns:lido="http://www.lido-schema.org">
  <lido:lido>
    <lido:lidoRecID lido:type="local" lido:pref="preferred">obj-1</lido:lidoRecID>
    <lido:lidoRecID lido:type="global">urn:obj:1</lido:lidoRecID>
    <lido:title xml:lang="en">Still Life</lido:title>
  </lido:lido>
</lido:lidoWrap>"#,
        )
        .unwrap();

        assert_eq!(
            decoded.json,
            json!({
                "lidoWrap": {
                    "lido": {
                        "lidoRecID": [
                            {"@type": "local", "@pref": "preferred", "#text": "obj-1"},
                            {"@type": "global", "#text": "urn:obj:1"}
                        ],
                        "title": {"@xml:lang": "en", "#text": "Still Life"}
                    }
                }
            })
        );
    }

    #[test]
    fn raw_is_kept_byte_exact() {
        let body = "<a>\u{0001}x</a>";
        let decoded = decode_str(body).unwrap();
        assert_eq!(decoded.raw, body);
        assert_eq!(decoded.json, json!({"a": "\u{FFFD}x"}));
    }

    #[test]
    fn sanitize_replaces_only_illegal_characters() {
        assert_eq!(sanitize("a\u{0008}b\tc\nd\u{FFFE}"), "a\u{FFFD}b\tc\nd\u{FFFD}");
        assert!(matches!(sanitize("clean"), Cow::Borrowed(_)));
    }

    #[test]
    fn empty_bodies_are_rejected() {
        assert!(matches!(decode(b""), Err(DecodeError::Empty)));
        assert!(matches!(decode(b"  \n"), Err(DecodeError::Empty)));
        assert!(matches!(decode_str("<lido/>"), Err(DecodeError::Empty)));
        assert!(matches!(decode_str("<lido>  </lido>"), Err(DecodeError::Empty)));
    }

    #[test]
    fn invalid_encoding_and_xml_are_rejected() {
        assert!(matches!(decode(&[0x3c, 0xff, 0x3e]), Err(DecodeError::Encoding)));
        assert!(matches!(decode_str("<a><b></a>"), Err(DecodeError::Xml(_))));
    }
}
