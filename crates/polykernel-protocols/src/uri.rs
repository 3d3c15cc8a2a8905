//! Kernel-URI canonicalization.
//!
//! Kernels are addressed by URIs of the form `scheme://authority/path`, with
//! an implicit `/` when the path is empty. A `?tag=arrived` query marks the
//! arrival half of a routing-slip hop; the bare form marks departure.

use url::{Position, Url};

use crate::error::RoutingSlipError;

/// Canonicalizes a kernel URI, dropping any query.
pub fn normalize_kernel_uri(kernel_uri: &str) -> Result<String, RoutingSlipError> {
    let url = parse(kernel_uri)?;
    Ok(rebuild(&url))
}

/// Canonicalizes a kernel URI, keeping the query when one is present.
pub fn normalize_kernel_uri_with_query(kernel_uri: &str) -> Result<String, RoutingSlipError> {
    let url = parse(kernel_uri)?;
    let mut absolute = rebuild(&url);
    if let Some(query) = url.query() {
        absolute.push('?');
        absolute.push_str(query);
    }
    Ok(absolute)
}

/// Returns the value of the `tag` query parameter, when present.
pub fn uri_tag(kernel_uri: &str) -> Option<String> {
    let url = Url::parse(kernel_uri).ok()?;
    let query = url.query()?;
    let mut parts = query.splitn(2, "tag=");
    parts.next();
    parts.next().map(|tag| tag.to_string())
}

/// Extracts the `scheme://authority` host root of a kernel URI.
///
/// This is the prefix connectors track to decide reachability; paths below
/// the same host root are served by the same peer.
pub fn extract_host_root(kernel_uri: &str) -> Option<String> {
    let url = Url::parse(kernel_uri).ok()?;
    if !url.has_authority() {
        return None;
    }
    let authority = &url[Position::BeforeUsername..Position::AfterPort];
    Some(format!("{}://{}", url.scheme(), authority))
}

fn rebuild(url: &Url) -> String {
    let authority = &url[Position::BeforeUsername..Position::AfterPort];
    let path = url.path();
    let path = if path.is_empty() { "/" } else { path };
    format!("{}://{}{}", url.scheme(), authority, path)
}

fn parse(kernel_uri: &str) -> Result<Url, RoutingSlipError> {
    Url::parse(kernel_uri).map_err(|source| RoutingSlipError::InvalidUri {
        uri: kernel_uri.to_string(),
        source,
    })
}
