//! XML document model for record classification.
//!
//! [`XmlDocument`] is a small arena-backed tree built from a `quick-xml`
//! event stream. Nodes are stored in document order, so a [`NodeId`] doubles
//! as a document-order key. Element and attribute names are resolved against
//! the in-scope `xmlns` declarations while parsing.
//!
//! - [`query`] evaluates structural queries (an XPath 1.0 subset) over a document
//! - [`decode`] turns a record body into the structured mapping stored as `json`

pub mod decode;
pub mod query;

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::XmlError;

/// Namespace URI permanently bound to the `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

pub type XmlResult<T> = std::result::Result<T, XmlError>;

/// Index of a node in its document's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// The synthetic document node that owns the root element.
    pub const DOCUMENT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// A possibly prefixed name with its resolved namespace URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub namespace: Option<String>,
}

impl QName {
    /// The name as written in the document (`prefix:local` or `local`).
    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Document,
    Element {
        name: QName,
        attributes: Vec<Attribute>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// A parsed, immutable XML document.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    nodes: Vec<Node>,
    root: NodeId,
    /// `xmlns` declarations found on the root element (`None` = default namespace).
    root_namespaces: Vec<(Option<String>, String)>,
}

/// One level of namespace scope while parsing.
type Scope = Vec<(Option<String>, String)>;

impl XmlDocument {
    /// Parse a complete document. Whitespace is preserved so that element
    /// string values match their full text content.
    pub fn parse(text: &str) -> XmlResult<Self> {
        let mut reader = Reader::from_str(text);
        let mut nodes = vec![Node {
            kind: NodeKind::Document,
            parent: None,
            children: Vec::new(),
        }];
        let mut root: Option<NodeId> = None;
        let mut root_namespaces = Vec::new();
        let mut stack: Vec<NodeId> = Vec::new();
        let mut scopes: Vec<Scope> = Vec::new();

        loop {
            let event = reader.read_event().map_err(|e| XmlError::Malformed {
                position: reader.error_position() as u64,
                message: e.to_string(),
            })?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    let parent = match stack.last() {
                        Some(&p) => p,
                        None if root.is_none() => NodeId::DOCUMENT,
                        None => {
                            return Err(XmlError::Malformed {
                                position: reader.buffer_position() as u64,
                                message: "content after the root element".into(),
                            });
                        }
                    };
                    let (scope, kind) = open_element(e, &scopes)?;
                    let id = NodeId(nodes.len());
                    nodes.push(Node {
                        kind,
                        parent: Some(parent),
                        children: Vec::new(),
                    });
                    nodes[parent.0].children.push(id);
                    if parent == NodeId::DOCUMENT {
                        root = Some(id);
                        root_namespaces = scope.clone();
                    }
                    if !is_empty {
                        stack.push(id);
                        scopes.push(scope);
                    }
                }
                Event::End(_) => {
                    stack.pop();
                    scopes.pop();
                }
                Event::Text(ref e) => {
                    let text = e.unescape().map_err(|err| XmlError::Malformed {
                        position: reader.buffer_position() as u64,
                        message: err.to_string(),
                    })?;
                    match stack.last() {
                        Some(&parent) => push_text(&mut nodes, parent, &text),
                        None if text.trim().is_empty() => {}
                        None => {
                            return Err(XmlError::Malformed {
                                position: reader.buffer_position() as u64,
                                message: "text outside the root element".into(),
                            });
                        }
                    }
                }
                Event::CData(e) => {
                    if let Some(&parent) = stack.last() {
                        let bytes = e.into_inner();
                        push_text(&mut nodes, parent, &String::from_utf8_lossy(&bytes));
                    }
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions and doctypes
                // carry no record content.
                _ => {}
            }
        }

        if let Some(&open) = stack.last() {
            let name = match &nodes[open.0].kind {
                NodeKind::Element { name, .. } => name.qualified(),
                _ => String::new(),
            };
            return Err(XmlError::Unclosed { name });
        }
        let root = root.ok_or(XmlError::NoRoot)?;

        Ok(Self {
            nodes,
            root,
            root_namespaces,
        })
    }

    /// The document element.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    /// Element name, or `None` for text and document nodes.
    pub fn name(&self, id: NodeId) -> Option<&QName> {
        match &self.nodes[id.0].kind {
            NodeKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn attributes(&self, id: NodeId) -> &[Attribute] {
        match &self.nodes[id.0].kind {
            NodeKind::Element { attributes, .. } => attributes,
            _ => &[],
        }
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.nodes[id.0].kind, NodeKind::Element { .. })
    }

    /// Text of a text node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id.0].kind {
            NodeKind::Text(t) => Some(t),
            _ => None,
        }
    }

    /// All descendants of `id` in document order, excluding `id` itself.
    ///
    /// Nodes are allocated in document order, so a subtree occupies one
    /// contiguous arena range.
    pub fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let end = self.subtree_end(id);
        (id.0 + 1..end).map(NodeId)
    }

    fn subtree_end(&self, id: NodeId) -> usize {
        let mut current = id;
        while let Some(&last) = self.nodes[current.0].children.last() {
            current = last;
        }
        current.0 + 1
    }

    /// The string value of a node: concatenated descendant text for elements
    /// and the document, the text itself for text nodes.
    pub fn string_value(&self, id: NodeId) -> String {
        match &self.nodes[id.0].kind {
            NodeKind::Text(t) => t.clone(),
            _ => self
                .descendants(id)
                .filter_map(|d| self.text(d))
                .collect(),
        }
    }

    /// All prefixed declarations on the root element.
    pub fn root_prefixes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.root_namespaces
            .iter()
            .filter_map(|(p, uri)| p.as_deref().map(|p| (p, uri.as_str())))
    }
}

fn push_text(nodes: &mut Vec<Node>, parent: NodeId, text: &str) {
    if text.is_empty() {
        return;
    }
    // Adjacent text and CDATA sections merge into one text node.
    if let Some(&last) = nodes[parent.0].children.last() {
        if let NodeKind::Text(existing) = &mut nodes[last.0].kind {
            existing.push_str(text);
            return;
        }
    }
    let id = NodeId(nodes.len());
    nodes.push(Node {
        kind: NodeKind::Text(text.to_string()),
        parent: Some(parent),
        children: Vec::new(),
    });
    nodes[parent.0].children.push(id);
}

/// Build an element node, returning the namespace scope it opens.
fn open_element(e: &BytesStart<'_>, scopes: &[Scope]) -> XmlResult<(Scope, NodeKind)> {
    let mut declared: Scope = Vec::new();
    let mut raw_attributes: Vec<(String, String)> = Vec::new();

    for attr in e.attributes() {
        let attr = attr.map_err(|err| XmlError::Malformed {
            position: 0,
            message: err.to_string(),
        })?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|err| XmlError::Malformed {
                position: 0,
                message: err.to_string(),
            })?
            .into_owned();
        if key == "xmlns" {
            declared.push((None, value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declared.push((Some(prefix.to_string()), value));
        } else {
            raw_attributes.push((key, value));
        }
    }

    let lookup = |prefix: Option<&str>| -> Option<String> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE.to_string());
        }
        declared
            .iter()
            .chain(scopes.iter().rev().flatten())
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.clone())
            .filter(|uri| !uri.is_empty())
    };

    let element_name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let (prefix, local) = split_qname(&element_name);
    // Unbound prefixes are tolerated: the name simply has no namespace.
    let name = QName {
        namespace: lookup(prefix.as_deref()),
        prefix,
        local,
    };

    let attributes = raw_attributes
        .into_iter()
        .map(|(key, value)| {
            let (prefix, local) = split_qname(&key);
            // Unprefixed attributes never take the default namespace.
            let namespace = match prefix.as_deref() {
                Some(p) => lookup(Some(p)),
                None => None,
            };
            Attribute {
                name: QName {
                    prefix,
                    local,
                    namespace,
                },
                value,
            }
        })
        .collect();

    Ok((declared, NodeKind::Element { name, attributes }))
}

/// Split `prefix:local` into its parts.
pub(crate) fn split_qname(name: &str) -> (Option<String>, String) {
    match name.split_once(':') {
        Some((p, l)) => (Some(p.to_string()), l.to_string()),
        None => (None, name.to_string()),
    }
}

/// Mapping of query prefixes to namespace URIs.
#[derive(Debug, Clone, Default)]
pub struct Namespaces {
    bindings: HashMap<String, String>,
}

impl Namespaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `prefix` to `uri`, replacing any previous binding.
    pub fn bind(&mut self, prefix: impl Into<String>, uri: impl Into<String>) -> &mut Self {
        self.bindings.insert(prefix.into(), uri.into());
        self
    }

    /// Bindings for evaluating against `doc`: the explicit bindings in `self`
    /// take precedence over the root element's own declarations.
    pub fn for_document(&self, doc: &XmlDocument) -> Self {
        let mut bindings: HashMap<String, String> = doc
            .root_prefixes()
            .map(|(p, uri)| (p.to_string(), uri.to_string()))
            .collect();
        bindings.extend(self.bindings.clone());
        Self { bindings }
    }

    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE);
        }
        self.bindings.get(prefix).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIDO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<lido:lido xmlns:lido="http://www.lido-schema.org">
  <lido:lidoRecID lido:type="local">obj-1</lido:lidoRecID>
  <lido:title xml:lang="en">Still <![CDATA[Life]]></lido:title>
  <lido:empty/>
</lido:lido>"#;

    #[test]
    fn parses_names_and_namespaces() {
        let doc = XmlDocument::parse(LIDO).unwrap();
        let root = doc.name(doc.root()).unwrap();
        assert_eq!(root.local, "lido");
        assert_eq!(root.namespace.as_deref(), Some("http://www.lido-schema.org"));
        assert_eq!(
            doc.root_prefixes().collect::<Vec<_>>(),
            vec![("lido", "http://www.lido-schema.org")]
        );

        let rec_id = doc
            .children(doc.root())
            .iter()
            .copied()
            .find(|&c| doc.is_element(c))
            .unwrap();
        let attr = &doc.attributes(rec_id)[0];
        assert_eq!(attr.name.local, "type");
        assert_eq!(attr.name.namespace.as_deref(), Some("http://www.lido-schema.org"));
        assert_eq!(doc.string_value(rec_id), "obj-1");
    }

    #[test]
    fn xml_prefix_is_always_bound() {
        let doc = XmlDocument::parse(LIDO).unwrap();
        let title = doc
            .descendants(doc.root())
            .find(|&n| doc.name(n).is_some_and(|q| q.local == "title"))
            .unwrap();
        let lang = &doc.attributes(title)[0];
        assert_eq!(lang.name.namespace.as_deref(), Some(XML_NAMESPACE));
        assert_eq!(doc.string_value(title), "Still Life");
    }

    #[test]
    fn string_value_concatenates_descendant_text() {
        let doc = XmlDocument::parse("<a>x<b>y</b>z</a>").unwrap();
        assert_eq!(doc.string_value(doc.root()), "xyz");
        assert_eq!(doc.string_value(NodeId::DOCUMENT), "xyz");
    }

    #[test]
    fn rejects_mismatched_and_truncated_documents() {
        assert!(matches!(
            XmlDocument::parse("<a><b></a>"),
            Err(XmlError::Malformed { .. })
        ));
        assert!(matches!(
            XmlDocument::parse("<a><b>"),
            Err(XmlError::Unclosed { .. })
        ));
        assert!(matches!(XmlDocument::parse("   "), Err(XmlError::NoRoot)));
        assert!(XmlDocument::parse("<a/><b/>").is_err());
        assert!(XmlDocument::parse("<a/>trailing").is_err());
    }

    #[test]
    fn explicit_bindings_override_document_prefixes() {
        let doc = XmlDocument::parse(r#"<x:a xmlns:x="urn:doc" xmlns:y="urn:y"/>"#).unwrap();
        let mut ns = Namespaces::new();
        ns.bind("x", "urn:configured");
        let resolved = ns.for_document(&doc);
        assert_eq!(resolved.resolve("x"), Some("urn:configured"));
        assert_eq!(resolved.resolve("y"), Some("urn:y"));
        assert_eq!(resolved.resolve("xml"), Some(XML_NAMESPACE));
        assert_eq!(resolved.resolve("z"), None);
    }
}
