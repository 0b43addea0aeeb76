//! XML catalog lookups.
//!
//! Catalog support is delegated to the `xmlcatalog` command line tool; there
//! is no usable catalog implementation to link against here.  The shim
//! treats the tool as an opaque URL-to-URL function and degrades to the
//! identity mapping whenever the tool is missing, fails, or has no entry.

use std::collections::HashMap;
use std::process::Command;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::dbxi_log;
use crate::session::Session;

static XMLCAT_CACHE: Lazy<Mutex<HashMap<String, String>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

const DEFAULT_CATALOG: &str = "/etc/xml/catalog";

fn xmlcatalog_lookup(url: &str, catalog: Option<&str>) -> Option<String> {
    let catalog = catalog.unwrap_or(DEFAULT_CATALOG);

    let output = Command::new("xmlcatalog")
        .arg(catalog)
        .arg(url)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }

    let resolved = String::from_utf8(output.stdout).ok()?;
    let resolved = resolved.trim_end();
    if resolved.is_empty() {
        None
    } else {
        Some(resolved.to_string())
    }
}

/// Looks up `url` in the XML catalog.
///
/// Lookups are cached for the lifetime of the process.  The cache is keyed
/// by URL only: looking up the same URL against a different catalog returns
/// the first result.
pub fn lookup_url(url: &str, catalog: Option<&str>, session: &Session) -> String {
    let mut cache = XMLCAT_CACHE.lock().unwrap();

    if let Some(hit) = cache.get(url) {
        return hit.clone();
    }

    let target = xmlcatalog_lookup(url, catalog).unwrap_or_else(|| url.to_string());
    if target != url {
        dbxi_log!(session, "catalog: {} -> {}", url, target);
    }

    cache.insert(url.to_string(), target.clone());
    target
}
