use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors produced while validating URLs taken from untrusted sources
/// (user input, OPML files, feed documents).
#[derive(Error, Debug)]
pub enum UrlGuardError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    Invalid(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL points to a private/internal IP address.
    #[error("Private address not allowed: {0}")]
    PrivateAddress(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validates a URL string for use as a feed source.
///
/// Rejects non-HTTP(S) schemes, localhost and private/link-local address
/// ranges so that a hostile OPML file or feed entry cannot point the
/// fetcher at internal infrastructure.
pub fn validate_feed_url(raw: &str) -> Result<Url, UrlGuardError> {
    let url = Url::parse(raw)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlGuardError::UnsupportedScheme(scheme.to_owned())),
    }

    if let Some(host) = url.host_str() {
        if host == "localhost" {
            return Err(UrlGuardError::Localhost);
        }

        if let Ok(ip) = bare_host(host).parse::<IpAddr>() {
            if ip.is_loopback() {
                return Err(UrlGuardError::Localhost);
            }
            if is_private_ip(&ip) {
                return Err(UrlGuardError::PrivateAddress(ip.to_string()));
            }
        }
    }

    Ok(url)
}

/// Builds a safe URL for a media or image reference found inside a feed
/// document. Relative references resolve against `base`; plain-HTTP URLs
/// are upgraded to HTTPS; anything that is not http(s) afterwards, or that
/// points at a private or loopback host, yields `None`.
pub fn safe_media_url(raw: &str, base: Option<&Url>) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut resolved = match base {
        Some(b) => b.join(trimmed).ok()?,
        None => Url::parse(trimmed).ok()?,
    };

    match resolved.scheme() {
        "https" => {}
        "http" => resolved.set_scheme("https").ok()?,
        _ => return None,
    }

    if host_is_private(&resolved) {
        return None;
    }

    Some(resolved.to_string())
}

fn host_is_private(url: &Url) -> bool {
    match url.host_str() {
        None => true,
        Some("localhost") => true,
        Some(host) => match bare_host(host).parse::<IpAddr>() {
            Ok(ip) => ip.is_loopback() || is_private_ip(&ip),
            Err(_) => false,
        },
    }
}

/// Strips brackets from IPv6 hosts so they parse as addresses.
fn bare_host(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}
