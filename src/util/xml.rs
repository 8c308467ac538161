//! Minimal XML element tree for feed documents.
//!
//! Dialect detection and media extraction need element/attribute traversal
//! with namespace-prefixed lookups falling back to plain tag names, which
//! the raw event API makes awkward. This builds a small tree out of
//! quick-xml events instead. quick-xml (0.37) never expands `<!ENTITY>`
//! declarations, so untrusted documents cannot smuggle XXE payloads
//! through this path.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Nesting depth guard against maliciously deep documents.
const MAX_XML_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Parse(String),

    #[error("XML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("document contains no root element")]
    NoRoot,
}

/// One element of a parsed document: tag name as written (prefix
/// included), attributes in document order, child elements, and the
/// concatenated direct text/CDATA content.
#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    text: String,
}

impl XmlElement {
    /// Parses a document into its root element.
    pub fn parse(input: &str) -> Result<XmlElement, XmlError> {
        // Text is kept untrimmed here so CDATA and text pieces concatenate
        // without losing interior spacing; `text()` trims at the edges.
        let mut reader = Reader::from_str(input);

        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root: Option<XmlElement> = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    if stack.len() >= MAX_XML_DEPTH {
                        return Err(XmlError::MaxDepthExceeded(MAX_XML_DEPTH));
                    }
                    if root.is_some() && stack.is_empty() {
                        return Err(XmlError::Parse("content after root element".to_string()));
                    }
                    stack.push(element_from_start(&e, &reader)?);
                }
                Ok(Event::Empty(e)) => {
                    let element = element_from_start(&e, &reader)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None if root.is_none() => root = Some(element),
                        None => {
                            return Err(XmlError::Parse("content after root element".to_string()))
                        }
                    }
                }
                Ok(Event::Text(t)) => {
                    if let Some(top) = stack.last_mut() {
                        let piece = t.unescape().map_err(|e| XmlError::Parse(e.to_string()))?;
                        top.text.push_str(&piece);
                    }
                }
                Ok(Event::CData(t)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                    }
                }
                Ok(Event::End(_)) => {
                    let done = stack
                        .pop()
                        .ok_or_else(|| XmlError::Parse("unexpected closing tag".to_string()))?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None => root = Some(done),
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(XmlError::Parse(e.to_string())),
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(XmlError::Parse("unclosed element".to_string()));
        }
        root.ok_or(XmlError::NoRoot)
    }

    /// Tag name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    /// Namespace prefix, if the tag carries one.
    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(p, _)| p)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Direct text content, trimmed.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// First child whose local name matches, any prefix.
    pub fn child(&self, local: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.local_name() == local)
    }

    /// All children whose local name matches, any prefix.
    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.local_name() == local)
    }

    /// Namespace-aware lookup: an exact `prefix:local` match wins, a plain
    /// unprefixed `local` tag is accepted as fallback. Namespace handling
    /// is inconsistent across real-world feeds, so both spellings must hit.
    pub fn child_ns(&self, prefix: &str, local: &str) -> Option<&XmlElement> {
        self.children
            .iter()
            .find(|c| c.prefix() == Some(prefix) && c.local_name() == local)
            .or_else(|| {
                self.children
                    .iter()
                    .find(|c| c.prefix().is_none() && c.name == local)
            })
    }

    /// Depth-first traversal of every element below this one.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a XmlElement>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

fn element_from_start(
    e: &quick_xml::events::BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<XmlElement, XmlError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let decoder = reader.decoder();

    let mut attrs = Vec::new();
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed XML attribute");
                continue;
            }
        };
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(|e| XmlError::Parse(e.to_string()))?
            .into_owned();
        attrs.push((key, value));
    }

    Ok(XmlElement {
        name,
        attrs,
        children: Vec::new(),
        text: String::new(),
    })
}
