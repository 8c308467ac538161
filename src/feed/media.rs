use serde::{Deserialize, Serialize};

/// Broad classification of a media reference attached to a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Image,
    File,
}

/// One media reference extracted from a feed entry. Never mutated after
/// extraction; re-parsing a feed produces a fresh list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaEntry {
    pub url: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    pub kind: MediaKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<String>,
}

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "ogg", "oga", "opus", "wav", "flac"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "webm", "mov", "avi", "mkv"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif", "svg"];

/// Classifies a media reference: the MIME type wins, then the
/// media-namespace `medium` hint, then the file extension. Anything
/// unrecognized is a plain file.
pub fn classify(mime: Option<&str>, medium: Option<&str>, url: &str) -> MediaKind {
    if let Some(mime) = mime {
        let mime = mime.trim().to_ascii_lowercase();
        if mime.starts_with("audio/") {
            return MediaKind::Audio;
        }
        if mime.starts_with("video/") {
            return MediaKind::Video;
        }
        if mime.starts_with("image/") {
            return MediaKind::Image;
        }
        // Non-media MIME types fall through to the hint and extension.
    }

    if let Some(medium) = medium {
        match medium.trim().to_ascii_lowercase().as_str() {
            "audio" => return MediaKind::Audio,
            "video" => return MediaKind::Video,
            "image" => return MediaKind::Image,
            _ => {}
        }
    }

    match extension_of(url) {
        Some(ext) if AUDIO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Audio,
        Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
        Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Image,
        _ => MediaKind::File,
    }
}

/// Extension of the last path segment, query and fragment stripped.
fn extension_of(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let segment = path.rsplit('/').next()?;
    let (_, ext) = segment.rsplit_once('.')?;
    (!ext.is_empty() && ext.len() <= 5).then(|| ext.to_ascii_lowercase())
}
