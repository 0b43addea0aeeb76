//! Expand XInclude 1.1 and DocBook transclusions in XML documents.
//!
//! The processor takes an XML document, replaces every `xi:include` element
//! by the referenced resource (in whole, as a fragment selected by
//! `xml:id`, or as RFC 5147-selected text), materialises `xi:fallback`
//! content for unresolvable references, and applies the DocBook 5
//! transclusion semantics: `xml:id` rewriting per `trans:idfixup` and
//! cross-reference repair per `trans:linkscope`, so the merged document is
//! internally consistent.
//!
//! The usual entry point is [`process_xml`]:
//!
//! ```
//! use dbxincluder::{process_xml, Session};
//!
//! let output = process_xml(
//!     "<doc xmlns:xi='http://www.w3.org/2001/XInclude'>\
//!        <xi:include href='data:text/plain,hi' parse='text/plain'/>\
//!      </doc>",
//!     None,
//!     None,
//!     None,
//!     &Session::new(),
//! )
//! .unwrap();
//! assert!(output.contains("hi"));
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod docbook;
pub mod error;
mod io;
mod limits;
pub mod log;
pub mod node;
pub mod session;
mod url_resolver;
pub mod xinclude;
pub mod xml;
mod xmlcat;

pub use crate::error::{ResourceError, TransclusionError};
pub use crate::session::Session;

/// Processes a document from text to text.
///
/// * `base_url` — base for resolving relative `href`s when no `xml:base` is
///   in scope; also stamped onto the document element.  `None` for
///   documents without a location (stdin).
/// * `file` — URL used in diagnostics, e.g. `<stdin>`.
/// * `catalog` — path of an XML catalog; `None` picks the system default.
pub fn process_xml(
    xml_text: &str,
    base_url: Option<&str>,
    file: Option<&str>,
    catalog: Option<&str>,
    session: &Session,
) -> Result<String, TransclusionError> {
    let document = xml::parse_document(xml_text, file.or(base_url))?;

    docbook::process_tree(&document, base_url, catalog, file, session)?;

    Ok(xml::serialize::serialize_document(&document))
}
