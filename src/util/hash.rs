use sha2::{Digest, Sha256};

/// Stable identifier derived from a SHA-256 digest, truncated to 16 hex chars.
pub fn stable_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

/// Feed ids are a hash of the subscription URL, so re-importing the same
/// OPML always maps onto the same feed.
pub fn feed_id(url: &str) -> String {
    stable_hash(url.trim())
}

/// Post ids mix the owning feed id with the entry identity (guid, link or
/// title), so re-ingesting a feed lands on the same ids and never resets
/// per-post user state.
pub fn post_id(feed_id: &str, identity: &str) -> String {
    stable_hash(&format!("{feed_id}|{identity}"))
}
