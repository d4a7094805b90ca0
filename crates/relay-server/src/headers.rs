//! Response header names.
//!
//! Kept lowercase so they can build `HeaderName`s with `from_static`.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

/// Front-door session id, echoed on every `/mcp` response.
pub const MCP_SESSION_ID: &str = "mcp-session-id";
/// Time spent serving a front-door call.
pub const PROCESSING_TIME_MS: &str = "x-processing-time-ms";
/// Requested manifest API version.
pub const ACCEPT_VERSION: &str = "accept-version";
/// API version a manifest response was rendered with.
pub const API_VERSION: &str = "api-version";
/// Version of the tool catalog.
pub const TOOL_MANIFEST_VERSION: &str = "tool-manifest-version";
/// Comma-separated supported API versions.
pub const SUPPORTED_VERSIONS: &str = "supported-versions";

/// Headers browsers may read on cross-origin responses.
pub const EXPOSED: &[&str] = &[
    MCP_SESSION_ID,
    PROCESSING_TIME_MS,
    API_VERSION,
    TOOL_MANIFEST_VERSION,
    SUPPORTED_VERSIONS,
    "retry-after",
];

/// Insert a header, skipping values that are not valid header text.
pub fn set(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            let _ = headers.insert(HeaderName::from_static(name), v);
        }
        Err(_) => warn!(header = name, "dropping invalid header value"),
    }
}

/// Read a header as UTF-8, treating blank values as absent.
pub fn get<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_lowercase() {
        for name in EXPOSED.iter().chain([&ACCEPT_VERSION]) {
            assert_eq!(*name, name.to_ascii_lowercase());
        }
    }

    #[test]
    fn get_is_case_insensitive_and_trims() {
        let mut headers = HeaderMap::new();
        set(&mut headers, MCP_SESSION_ID, " abc ");
        assert_eq!(get(&headers, "Mcp-Session-Id"), Some("abc"));
        set(&mut headers, API_VERSION, "");
        assert_eq!(get(&headers, API_VERSION), None);
    }

    #[test]
    fn invalid_values_are_skipped() {
        let mut headers = HeaderMap::new();
        set(&mut headers, API_VERSION, "bad\nvalue");
        assert!(headers.is_empty());
    }
}
