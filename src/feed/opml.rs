use anyhow::{Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use crate::storage::{atomic_write, Subscription};
use crate::util::validate_feed_url;

/// Maximum allowed nesting depth for OPML outline elements.
const MAX_OPML_DEPTH: usize = 50;

#[derive(Debug, Error)]
pub enum OpmlError {
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// A feed subscription extracted from an OPML document. The category is
/// the title of the nearest enclosing folder outline, empty at top level.
#[derive(Debug, Clone, PartialEq)]
pub struct OpmlOutline {
    pub title: String,
    pub url: String,
    pub category: String,
}

impl OpmlOutline {
    pub fn into_subscription(self) -> Subscription {
        Subscription::new(&self.url, &self.title, &self.category)
    }
}

/// Reads an OPML file and extracts feed subscriptions. Outlines with
/// invalid URLs (localhost, private IPs, non-HTTP schemes) are skipped
/// with a warning.
pub async fn parse_file(path: &std::path::Path) -> Result<Vec<OpmlOutline>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read OPML file: {}", path.display()))?;
    parse_content(&content)
}

/// Parses OPML content. Handles both nested and flat structures; folder
/// outlines (no `xmlUrl`) contribute the category of everything below
/// them. quick-xml does not expand entity declarations, so XXE payloads
/// in hostile OPML files go nowhere.
pub fn parse_content(content: &str) -> Result<Vec<OpmlOutline>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut outlines = Vec::new();
    let mut buf = Vec::new();
    // Folder titles on the path from the root to the current outline.
    let mut folders: Vec<Option<String>> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                if folders.len() >= MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH).into());
                }
                let attrs = OutlineAttrs::read(&e, &reader)?;
                match attrs.to_outline(current_category(&folders)) {
                    Some(outline) => {
                        outlines.push(outline);
                        folders.push(None);
                    }
                    None => folders.push(attrs.title),
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let attrs = OutlineAttrs::read(&e, &reader)?;
                if let Some(outline) = attrs.to_outline(current_category(&folders)) {
                    outlines.push(outline);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                folders.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string()).into()),
            _ => {}
        }
        buf.clear();
    }

    Ok(outlines)
}

fn current_category(folders: &[Option<String>]) -> String {
    folders
        .iter()
        .rev()
        .find_map(|f| f.clone())
        .unwrap_or_default()
}

struct OutlineAttrs {
    xml_url: Option<String>,
    title: Option<String>,
}

impl OutlineAttrs {
    fn read(
        e: &quick_xml::events::BytesStart<'_>,
        reader: &Reader<&[u8]>,
    ) -> Result<Self> {
        let mut xml_url = None;
        let mut title = None;
        let mut text = None;

        let decoder = reader.decoder();
        for attr_result in e.attributes() {
            let attr = match attr_result {
                Ok(attr) => attr,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                    continue;
                }
            };
            match attr.key.as_ref() {
                b"xmlUrl" => xml_url = Some(attr.decode_and_unescape_value(decoder)?.to_string()),
                b"title" => title = Some(attr.decode_and_unescape_value(decoder)?.to_string()),
                b"text" => text = Some(attr.decode_and_unescape_value(decoder)?.to_string()),
                _ => {}
            }
        }

        Ok(Self {
            xml_url,
            title: title.or(text),
        })
    }

    /// Feed outline with a valid URL, or `None` for folders and outlines
    /// pointing at disallowed hosts.
    fn to_outline(&self, category: String) -> Option<OpmlOutline> {
        let url = self.xml_url.as_ref()?;
        match validate_feed_url(url) {
            Ok(_) => Some(OpmlOutline {
                title: self.title.clone().unwrap_or_else(|| url.clone()),
                url: url.clone(),
                category,
            }),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL in OPML");
                None
            }
        }
    }
}

/// Exports subscriptions as an OPML 2.0 document, grouping feeds that
/// share a category under a folder outline.
pub fn export(feeds: &[Subscription]) -> Result<String> {
    use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
    use quick_xml::Writer;
    use std::io::Cursor;

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .context("Failed to write XML declaration")?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer
        .write_event(Event::Start(opml))
        .context("Failed to write opml element")?;

    writer
        .write_event(Event::Start(BytesStart::new("head")))
        .context("Failed to write head element")?;
    writer
        .write_event(Event::Start(BytesStart::new("title")))
        .context("Failed to write title element")?;
    writer
        .write_event(Event::Text(BytesText::new("feedcycle subscriptions")))
        .context("Failed to write title text")?;
    writer
        .write_event(Event::End(BytesEnd::new("title")))
        .context("Failed to write title end")?;
    writer
        .write_event(Event::End(BytesEnd::new("head")))
        .context("Failed to write head end")?;

    writer
        .write_event(Event::Start(BytesStart::new("body")))
        .context("Failed to write body element")?;

    let mut categories: Vec<&str> = feeds
        .iter()
        .map(|f| f.category.as_str())
        .filter(|c| !c.is_empty())
        .collect();
    categories.sort_unstable();
    categories.dedup();

    // Top-level feeds first, then one folder per category.
    for feed in feeds.iter().filter(|f| f.category.is_empty()) {
        write_feed_outline(&mut writer, feed)?;
    }
    for category in categories {
        let mut folder = BytesStart::new("outline");
        folder.push_attribute(("text", category));
        folder.push_attribute(("title", category));
        writer
            .write_event(Event::Start(folder))
            .context("Failed to write category outline")?;
        for feed in feeds.iter().filter(|f| f.category == category) {
            write_feed_outline(&mut writer, feed)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("outline")))
            .context("Failed to write category outline end")?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("body")))
        .context("Failed to write body end")?;
    writer
        .write_event(Event::End(BytesEnd::new("opml")))
        .context("Failed to write opml end")?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).context("Generated OPML contains invalid UTF-8")
}

fn write_feed_outline(
    writer: &mut quick_xml::Writer<std::io::Cursor<Vec<u8>>>,
    feed: &Subscription,
) -> Result<()> {
    use quick_xml::events::{BytesStart, Event};

    let mut outline = BytesStart::new("outline");
    outline.push_attribute(("type", "rss"));
    outline.push_attribute(("text", feed.title.as_str()));
    outline.push_attribute(("title", feed.title.as_str()));
    outline.push_attribute(("xmlUrl", feed.url.as_str()));
    writer
        .write_event(Event::Empty(outline))
        .context("Failed to write outline element")?;
    Ok(())
}

/// Exports subscriptions to a file atomically.
pub fn export_to_file(feeds: &[Subscription], path: &std::path::Path) -> Result<()> {
    let content = export(feeds)?;
    atomic_write(path, content.as_bytes())
        .with_context(|| format!("Failed to write OPML file: {}", path.display()))?;
    Ok(())
}
