//! Feed document normalization.
//!
//! Detects the dialect (Atom `feed > entry`, otherwise RSS
//! `channel > item`, including the RDF flavour where channel and item are
//! siblings) and turns each entry into a [`Post`] with media enclosures
//! and image candidates extracted in a defined priority order.

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::DateTime;
use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::storage::{Post, Subscription};
use crate::util::xml::{XmlElement, XmlError};
use crate::util::{post_id, safe_media_url};

use super::media::{classify, MediaEntry, MediaKind};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("document is not an RSS or Atom feed")]
    NotAFeed,
}

impl From<XmlError> for ParseError {
    fn from(e: XmlError) -> Self {
        ParseError::Xml(e.to_string())
    }
}

/// Result of normalizing one feed document.
#[derive(Debug)]
pub struct ParsedFeed {
    /// Title declared by the document, used to refresh the stored one.
    pub title: Option<String>,
    pub posts: Vec<Post>,
}

/// Parses raw response text. When the text is not well-formed XML, a
/// JSON-unwrap heuristic handles proxies that return
/// `{"contents": "<xml>"}` envelopes before giving up.
pub fn parse_feed_text(text: &str, feed: &Subscription) -> Result<ParsedFeed, ParseError> {
    match parse_document(text, feed) {
        Ok(parsed) => Ok(parsed),
        Err(first) => match unwrap_json_contents(text) {
            Some(inner) => parse_document(&inner, feed),
            None => Err(first),
        },
    }
}

fn unwrap_json_contents(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text.trim()).ok()?;
    value.get("contents")?.as_str().map(str::to_string)
}

/// Parses a well-formed XML document into normalized posts.
pub fn parse_document(xml: &str, feed: &Subscription) -> Result<ParsedFeed, ParseError> {
    let root = XmlElement::parse(xml.trim_start_matches('\u{feff}').trim())?;
    let base = Url::parse(&feed.url).ok();

    if root.local_name() == "feed" {
        let title = nonempty(root.child("title").map(|t| t.text().to_string()));
        let channel_images = atom_channel_images(&root, &base);
        let posts = root
            .children_named("entry")
            .map(|entry| atom_entry_to_post(entry, feed, &base, &channel_images))
            .collect();
        return Ok(ParsedFeed { title, posts });
    }

    let channel = if root.local_name() == "channel" {
        Some(&root)
    } else {
        root.descendants().find(|el| el.local_name() == "channel")
    }
    .ok_or(ParseError::NotAFeed)?;

    // RDF feeds put <item> next to <channel>; plain RSS nests them inside.
    let items: Vec<&XmlElement> = if channel.children_named("item").next().is_some() {
        channel.children_named("item").collect()
    } else {
        root.descendants()
            .filter(|el| el.local_name() == "item")
            .collect()
    };

    let title = nonempty(channel.child("title").map(|t| t.text().to_string()));
    let channel_images = rss_channel_images(channel, &base);
    let posts = items
        .into_iter()
        .map(|item| rss_item_to_post(item, feed, &base, &channel_images))
        .collect();
    Ok(ParsedFeed { title, posts })
}

struct EntryFields {
    title: String,
    link: String,
    content: String,
    summary: String,
    identity: String,
    published: Option<i64>,
}

fn atom_entry_to_post(
    entry: &XmlElement,
    feed: &Subscription,
    base: &Option<Url>,
    channel_images: &[String],
) -> Post {
    let title = entry
        .child("title")
        .map(|t| t.text().to_string())
        .unwrap_or_default();

    let links: Vec<&XmlElement> = entry.children_named("link").collect();
    let link = links
        .iter()
        .find(|l| l.attr("rel") == Some("alternate"))
        .and_then(|l| l.attr("href"))
        .or_else(|| links.first().and_then(|l| l.attr("href")))
        .unwrap_or_default()
        .to_string();

    let content = entry
        .child("content")
        .map(|c| c.text().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| entry.child("summary").map(|s| s.text().to_string()))
        .unwrap_or_default();
    let summary = entry
        .child("summary")
        .map(|s| s.text().to_string())
        .unwrap_or_default();

    let identity = nonempty(entry.child("id").map(|i| i.text().to_string()))
        .or_else(|| nonempty(Some(link.clone())))
        .unwrap_or_else(|| title.clone());

    let published = entry
        .child("published")
        .or_else(|| entry.child("updated"))
        .and_then(|el| parse_date(el.text()));

    finish_post(
        entry,
        EntryFields {
            title,
            link,
            content,
            summary,
            identity,
            published,
        },
        feed,
        base,
        channel_images,
    )
}

fn rss_item_to_post(
    item: &XmlElement,
    feed: &Subscription,
    base: &Option<Url>,
    channel_images: &[String],
) -> Post {
    let title = item
        .child("title")
        .map(|t| t.text().to_string())
        .unwrap_or_default();

    // RSS <link> carries text; an embedded atom:link carries href instead.
    let link = item
        .children_named("link")
        .map(|l| l.text().to_string())
        .find(|t| !t.is_empty())
        .or_else(|| {
            item.children_named("link")
                .find_map(|l| l.attr("href").map(str::to_string))
        })
        .unwrap_or_default();

    let summary = item
        .child("description")
        .map(|d| d.text().to_string())
        .unwrap_or_default();
    let content = item
        .child_ns("content", "encoded")
        .map(|c| c.text().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| summary.clone());

    let identity = nonempty(item.child("guid").map(|g| g.text().to_string()))
        .or_else(|| nonempty(Some(link.clone())))
        .unwrap_or_else(|| title.clone());

    let published = item
        .child("pubDate")
        .and_then(|el| parse_date(el.text()))
        .or_else(|| {
            item.child_ns("dc", "date")
                .and_then(|el| parse_date(el.text()))
        });

    finish_post(
        item,
        EntryFields {
            title,
            link,
            content,
            summary,
            identity,
            published,
        },
        feed,
        base,
        channel_images,
    )
}

fn finish_post(
    entry: &XmlElement,
    fields: EntryFields,
    feed: &Subscription,
    base: &Option<Url>,
    channel_images: &[String],
) -> Post {
    let mut link = fields.link.trim().to_string();
    // A missing link, or one that just points back at the feed's own host,
    // is usually the site home; the first anchor in the body tends to be
    // the actual story.
    if needs_link_recovery(&link, base) {
        if let Some(recovered) = first_anchor_href(&fields.content, base) {
            link = recovered;
        }
    }

    let media = extract_media(entry, &fields.content, base);
    let images = extract_images(entry, &fields.content, base, channel_images, &media);

    Post {
        id: post_id(&feed.id, &fields.identity),
        feed_id: feed.id.clone(),
        title: fields.title,
        link,
        content: fields.content,
        summary: fields.summary,
        published: fields.published,
        media,
        images,
        read: false,
        favorite: false,
    }
}

fn needs_link_recovery(link: &str, base: &Option<Url>) -> bool {
    if link.is_empty() {
        return true;
    }
    match (Url::parse(link), base) {
        (Ok(parsed), Some(base)) => parsed.host_str() == base.host_str(),
        (Err(_), _) => true,
        _ => false,
    }
}

/// Media references from enclosures, media-namespace elements and inline
/// audio/video tags, de-duplicated by URL. Private-host URLs are dropped
/// by `safe_media_url`.
fn extract_media(entry: &XmlElement, body: &str, base: &Option<Url>) -> Vec<MediaEntry> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<MediaEntry> = Vec::new();

    let mut push = |raw: Option<&str>,
                    mime: Option<&str>,
                    medium: Option<&str>,
                    length: Option<u64>,
                    duration: Option<u64>,
                    title: Option<&str>| {
        let Some(raw) = raw else { return };
        let Some(url) = safe_media_url(raw, base.as_ref()) else {
            return;
        };
        if !seen.insert(url.clone()) {
            return;
        }
        let kind = classify(mime, medium, &url);
        out.push(MediaEntry {
            url,
            mime: mime.map(str::to_string),
            kind,
            length,
            duration,
            title: title.map(str::to_string).filter(|t| !t.is_empty()),
            medium: medium.map(str::to_string),
        });
    };

    // RSS enclosures
    for enclosure in entry.children_named("enclosure") {
        push(
            enclosure.attr("url"),
            enclosure.attr("type"),
            None,
            parse_u64(enclosure.attr("length")),
            None,
            None,
        );
    }

    // Atom enclosure links
    for link in entry
        .children_named("link")
        .filter(|l| l.attr("rel") == Some("enclosure"))
    {
        push(
            link.attr("href"),
            link.attr("type"),
            None,
            parse_u64(link.attr("length")),
            None,
            link.attr("title"),
        );
    }

    // media:content / media:thumbnail, including inside media:group
    for el in entry.descendants() {
        if el.prefix() != Some("media") {
            continue;
        }
        match el.local_name() {
            "content" => push(
                el.attr("url"),
                el.attr("type"),
                el.attr("medium"),
                parse_u64(el.attr("fileSize")),
                parse_u64(el.attr("duration")),
                el.child("title").map(|t| t.text()),
            ),
            "thumbnail" => push(el.attr("url"), None, Some("image"), None, None, None),
            _ => {}
        }
    }

    // Inline <audio>/<video>/<source> in the body HTML
    for (src, medium) in inline_media_sources(body) {
        push(Some(src.as_str()), None, medium, None, None, None);
    }

    out
}

/// Image candidates in priority order: podcast-style item image, media
/// thumbnails/content by descending pixel area, enclosure images, the
/// first inline `<img>`, then channel-level fallbacks.
fn extract_images(
    entry: &XmlElement,
    body: &str,
    base: &Option<Url>,
    channel_images: &[String],
    media: &[MediaEntry],
) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<String> = Vec::new();
    let mut push = |url: String| {
        if seen.insert(url.clone()) {
            out.push(url);
        }
    };

    if let Some(raw) = entry
        .child_ns("itunes", "image")
        .and_then(|el| el.attr("href").or_else(|| el.attr("url")))
    {
        if let Some(safe) = safe_media_url(raw, base.as_ref()) {
            push(safe);
        }
    }

    let mut sized: Vec<(String, u64)> = Vec::new();
    for el in entry.descendants() {
        if el.prefix() != Some("media") {
            continue;
        }
        let image_like = match el.local_name() {
            "thumbnail" => true,
            "content" => {
                el.attr("medium") == Some("image")
                    || el.attr("type").is_some_and(|t| t.starts_with("image/"))
            }
            _ => false,
        };
        if !image_like {
            continue;
        }
        let Some(raw) = el.attr("url") else { continue };
        let Some(safe) = safe_media_url(raw, base.as_ref()) else {
            continue;
        };
        let area =
            parse_u64(el.attr("width")).unwrap_or(0) * parse_u64(el.attr("height")).unwrap_or(0);
        sized.push((safe, area));
    }
    sized.sort_by(|a, b| b.1.cmp(&a.1));
    for (url, _) in sized {
        push(url);
    }

    for entry in media.iter().filter(|m| m.kind == MediaKind::Image) {
        push(entry.url.clone());
    }

    if let Some(raw) = first_img_src(body) {
        if let Some(safe) = safe_media_url(&raw, base.as_ref()) {
            push(safe);
        }
    }

    for url in channel_images {
        push(url.clone());
    }

    out
}

fn rss_channel_images(channel: &XmlElement, base: &Option<Url>) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(raw) = channel
        .child("image")
        .and_then(|image| image.child("url"))
        .map(|u| u.text())
    {
        if let Some(safe) = safe_media_url(raw, base.as_ref()) {
            out.push(safe);
        }
    }
    if let Some(raw) = channel
        .child_ns("itunes", "image")
        .and_then(|el| el.attr("href").or_else(|| el.attr("url")))
    {
        if let Some(safe) = safe_media_url(raw, base.as_ref()) {
            if !out.contains(&safe) {
                out.push(safe);
            }
        }
    }
    out
}

fn atom_channel_images(root: &XmlElement, base: &Option<Url>) -> Vec<String> {
    let mut out = Vec::new();
    for name in ["logo", "icon"] {
        if let Some(raw) = root.child(name).map(|el| el.text()) {
            if let Some(safe) = safe_media_url(raw, base.as_ref()) {
                if !out.contains(&safe) {
                    out.push(safe);
                }
            }
        }
    }
    out
}

fn parse_date(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.timestamp_millis())
}

fn parse_u64(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse().ok())
}

fn nonempty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

// ============================================================================
// Body-HTML scanning
// ============================================================================

fn anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"'>]+)["']"#).expect("anchor regex compiles")
    })
}

fn img_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<img\s[^>]*?src\s*=\s*["']([^"'>]+)["']"#).expect("img regex compiles")
    })
}

fn audio_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<audio\s[^>]*?src\s*=\s*["']([^"'>]+)["']"#)
            .expect("audio regex compiles")
    })
}

fn video_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<video\s[^>]*?src\s*=\s*["']([^"'>]+)["']"#)
            .expect("video regex compiles")
    })
}

fn source_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<source\s[^>]*?src\s*=\s*["']([^"'>]+)["']"#)
            .expect("source regex compiles")
    })
}

/// First anchor href in the body, resolved against the feed's base URL.
fn first_anchor_href(body: &str, base: &Option<Url>) -> Option<String> {
    let href = anchor_re().captures(body)?.get(1)?.as_str();
    match base {
        Some(base) => base.join(href).ok().map(|u| u.to_string()),
        None => Url::parse(href).ok().map(|u| u.to_string()),
    }
}

fn first_img_src(body: &str) -> Option<String> {
    Some(img_re().captures(body)?.get(1)?.as_str().to_string())
}

fn inline_media_sources(body: &str) -> Vec<(String, Option<&'static str>)> {
    let mut out = Vec::new();
    for (re, medium) in [
        (audio_re(), Some("audio")),
        (video_re(), Some("video")),
        (source_re(), None),
    ] {
        for captures in re.captures_iter(body) {
            if let Some(m) = captures.get(1) {
                out.push((m.as_str().to_string(), medium));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed() -> Subscription {
        Subscription::new("https://feeds.example.net/rss.xml", "Example", "")
    }

    const RSS_DOC: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
<channel>
  <title>Example Channel</title>
  <link>https://blog.example.com/</link>
  <image><url>https://blog.example.com/logo.png</url></image>
  <item>
    <title>First Post</title>
    <link>https://blog.example.com/posts/1</link>
    <guid>post-guid-1</guid>
    <pubDate>Mon, 01 Jul 2024 10:00:00 GMT</pubDate>
    <description>Short summary</description>
    <content:encoded><![CDATA[<p>Full body with <img src="https://cdn.example.com/inline.jpg"> picture</p>]]></content:encoded>
    <enclosure url="https://cdn.example.com/episode.mp3" type="audio/mpeg" length="123456"/>
    <media:thumbnail url="https://cdn.example.com/thumb-small.jpg" width="100" height="100"/>
    <media:thumbnail url="https://cdn.example.com/thumb-large.jpg" width="800" height="600"/>
    <itunes:image href="https://cdn.example.com/cover.jpg"/>
  </item>
  <item>
    <title>Second Post</title>
    <description>No guid, no link</description>
  </item>
</channel>
</rss>"#;

    const ATOM_DOC: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <logo>https://atom.example.org/logo.png</logo>
  <entry>
    <id>urn:uuid:entry-1</id>
    <title>Entry One</title>
    <link rel="alternate" href="https://atom.example.org/entries/1"/>
    <link rel="enclosure" href="https://atom.example.org/ep.m4a" type="audio/mp4" length="999"/>
    <published>2024-07-01T10:00:00Z</published>
    <summary>Summary text</summary>
    <content type="html">&lt;p&gt;Content body&lt;/p&gt;</content>
  </entry>
</feed>"#;

    #[test]
    fn test_rss_dialect_detection_and_fields() {
        let parsed = parse_document(RSS_DOC, &feed()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Example Channel"));
        assert_eq!(parsed.posts.len(), 2);

        let post = &parsed.posts[0];
        assert_eq!(post.title, "First Post");
        assert_eq!(post.link, "https://blog.example.com/posts/1");
        assert!(post.content.contains("Full body"));
        assert_eq!(post.summary, "Short summary");
        assert!(post.published.is_some());
    }

    #[test]
    fn test_rss_identity_fallback_chain() {
        let parsed = parse_document(RSS_DOC, &feed()).unwrap();
        let with_guid = &parsed.posts[0];
        let title_only = &parsed.posts[1];
        assert_eq!(with_guid.id, post_id(&feed().id, "post-guid-1"));
        assert_eq!(title_only.id, post_id(&feed().id, "Second Post"));
    }

    #[test]
    fn test_rss_media_extraction_and_classification() {
        let parsed = parse_document(RSS_DOC, &feed()).unwrap();
        let post = &parsed.posts[0];

        let audio: Vec<_> = post
            .media
            .iter()
            .filter(|m| m.kind == MediaKind::Audio)
            .collect();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].url, "https://cdn.example.com/episode.mp3");
        assert_eq!(audio[0].length, Some(123456));

        // Thumbnails classified as images.
        assert!(post
            .media
            .iter()
            .any(|m| m.kind == MediaKind::Image && m.url.contains("thumb-large")));
    }

    #[test]
    fn test_image_priority_order() {
        let parsed = parse_document(RSS_DOC, &feed()).unwrap();
        let images = &parsed.posts[0].images;

        // itunes cover first, then thumbnails by pixel area, then the
        // inline img, then the channel logo.
        assert_eq!(images[0], "https://cdn.example.com/cover.jpg");
        assert_eq!(images[1], "https://cdn.example.com/thumb-large.jpg");
        assert_eq!(images[2], "https://cdn.example.com/thumb-small.jpg");
        assert!(images.contains(&"https://cdn.example.com/inline.jpg".to_string()));
        assert_eq!(images.last().unwrap(), "https://blog.example.com/logo.png");
    }

    #[test]
    fn test_atom_dialect() {
        let parsed = parse_document(ATOM_DOC, &feed()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Atom Example"));
        assert_eq!(parsed.posts.len(), 1);

        let post = &parsed.posts[0];
        assert_eq!(post.link, "https://atom.example.org/entries/1");
        assert_eq!(post.id, post_id(&feed().id, "urn:uuid:entry-1"));
        assert!(post.content.contains("Content body"));
        assert_eq!(post.summary, "Summary text");

        // Atom enclosure link extracted and classified by MIME type.
        assert_eq!(post.media.len(), 1);
        assert_eq!(post.media[0].kind, MediaKind::Audio);
        assert_eq!(post.media[0].length, Some(999));

        // Channel logo is the only image candidate.
        assert_eq!(post.images, vec!["https://atom.example.org/logo.png"]);
    }

    #[test]
    fn test_private_host_media_rejected() {
        let doc = r#"<rss version="2.0"><channel><title>t</title><item>
            <title>Post</title>
            <guid>g1</guid>
            <enclosure url="http://127.0.0.1/leak.mp3" type="audio/mpeg"/>
            <enclosure url="https://cdn.example.com/ok.mp3" type="audio/mpeg"/>
            <description>&lt;img src="http://192.168.1.4/tracker.png"&gt;</description>
        </item></channel></rss>"#;
        let parsed = parse_document(doc, &feed()).unwrap();
        let post = &parsed.posts[0];
        assert_eq!(post.media.len(), 1);
        assert_eq!(post.media[0].url, "https://cdn.example.com/ok.mp3");
        assert!(post.images.is_empty());
    }

    #[test]
    fn test_http_image_upgraded_to_https() {
        let doc = r#"<rss version="2.0"><channel><title>t</title><item>
            <title>Post</title><guid>g1</guid>
            <enclosure url="http://cdn.example.com/pic.png" type="image/png"/>
        </item></channel></rss>"#;
        let parsed = parse_document(doc, &feed()).unwrap();
        assert_eq!(
            parsed.posts[0].images,
            vec!["https://cdn.example.com/pic.png"]
        );
    }

    #[test]
    fn test_link_recovery_from_body() {
        // Link points at the feed's own host; the body anchor is more
        // specific.
        let doc = r#"<rss version="2.0"><channel><title>t</title><item>
            <title>Post</title><guid>g1</guid>
            <link>https://feeds.example.net/</link>
            <description>&lt;a href="https://story.example.com/article/42"&gt;read&lt;/a&gt;</description>
        </item></channel></rss>"#;
        let parsed = parse_document(doc, &feed()).unwrap();
        assert_eq!(parsed.posts[0].link, "https://story.example.com/article/42");
    }

    #[test]
    fn test_link_recovery_resolves_relative() {
        let doc = r#"<rss version="2.0"><channel><title>t</title><item>
            <title>Post</title><guid>g1</guid>
            <description>&lt;a href="/article/42"&gt;read&lt;/a&gt;</description>
        </item></channel></rss>"#;
        let parsed = parse_document(doc, &feed()).unwrap();
        assert_eq!(parsed.posts[0].link, "https://feeds.example.net/article/42");
    }

    #[test]
    fn test_inline_audio_video_sources() {
        let doc = r#"<rss version="2.0"><channel><title>t</title><item>
            <title>Post</title><guid>g1</guid>
            <description>&lt;audio src="https://cdn.example.com/a.ogg"&gt;&lt;/audio&gt;
            &lt;video src="https://cdn.example.com/v.webm"&gt;&lt;/video&gt;</description>
        </item></channel></rss>"#;
        let parsed = parse_document(doc, &feed()).unwrap();
        let kinds: Vec<_> = parsed.posts[0].media.iter().map(|m| m.kind).collect();
        assert!(kinds.contains(&MediaKind::Audio));
        assert!(kinds.contains(&MediaKind::Video));
    }

    #[test]
    fn test_media_dedup_by_url() {
        let doc = r#"<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/"><channel><title>t</title><item>
            <title>Post</title><guid>g1</guid>
            <enclosure url="https://cdn.example.com/ep.mp3" type="audio/mpeg"/>
            <media:content url="https://cdn.example.com/ep.mp3" type="audio/mpeg"/>
        </item></channel></rss>"#;
        let parsed = parse_document(doc, &feed()).unwrap();
        assert_eq!(parsed.posts[0].media.len(), 1);
    }

    #[test]
    fn test_medium_hint_classification() {
        let doc = r#"<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/"><channel><title>t</title><item>
            <title>Post</title><guid>g1</guid>
            <media:content url="https://cdn.example.com/stream" medium="video"/>
        </item></channel></rss>"#;
        let parsed = parse_document(doc, &feed()).unwrap();
        assert_eq!(parsed.posts[0].media[0].kind, MediaKind::Video);
        assert_eq!(parsed.posts[0].media[0].medium.as_deref(), Some("video"));
    }

    #[test]
    fn test_json_unwrap_heuristic() {
        let envelope = serde_json::json!({
            "contents": RSS_DOC,
            "status": {"http_code": 200}
        })
        .to_string();
        let parsed = parse_feed_text(&envelope, &feed()).unwrap();
        assert_eq!(parsed.posts.len(), 2);
    }

    #[test]
    fn test_malformed_after_unwrap_fails() {
        assert!(parse_feed_text("{\"contents\": \"not xml\"}", &feed()).is_err());
        assert!(parse_feed_text("plain garbage", &feed()).is_err());
    }

    #[test]
    fn test_non_feed_xml_rejected() {
        let err = parse_document("<html><body>nope</body></html>", &feed()).unwrap_err();
        assert!(matches!(err, ParseError::NotAFeed));
    }

    #[test]
    fn test_rdf_items_outside_channel() {
        let doc = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
            <channel><title>RDF Feed</title></channel>
            <item><title>Old Style</title><link>https://other.example.org/1</link></item>
        </rdf:RDF>"#;
        let parsed = parse_document(doc, &feed()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("RDF Feed"));
        assert_eq!(parsed.posts.len(), 1);
        assert_eq!(parsed.posts[0].link, "https://other.example.org/1");
    }

    #[test]
    fn test_bom_tolerated() {
        let doc = format!("\u{feff}{RSS_DOC}");
        assert!(parse_document(&doc, &feed()).is_ok());
    }

    #[test]
    fn test_reparse_yields_same_ids() {
        let first = parse_document(RSS_DOC, &feed()).unwrap();
        let second = parse_document(RSS_DOC, &feed()).unwrap();
        let ids_a: Vec<_> = first.posts.iter().map(|p| &p.id).collect();
        let ids_b: Vec<_> = second.posts.iter().map(|p| &p.id).collect();
        assert_eq!(ids_a, ids_b);
    }
}
