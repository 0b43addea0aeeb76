//! Resolve references relative to a base URL.
//!
//! Bases here are whatever the caller knew about the enclosing document: a
//! full URL, a bare filename, or nothing at all (stdin).  Resolution is
//! therefore done on the string level rather than through full RFC 3986
//! reference resolution, which would reject relative bases outright.

/// Returns whether `reference` already names a location on its own.
pub fn is_absolute(reference: &str) -> bool {
    reference.contains("://") || reference.starts_with("data:")
}

/// Resolves `href` against `base_url` by replacing the last path segment of
/// the base with the href.
///
/// A base without any path separator (a sibling file, or a bare name) leaves
/// the href unchanged.
pub fn resolve(href: &str, base_url: &str) -> String {
    match base_url.rsplit_once('/') {
        Some((dir, _)) => format!("{dir}/{href}"),
        None => href.to_string(),
    }
}
