//! XInclude 1.1 processing.
//!
//! This is the expander proper: it walks the tree, loads every `xi:include`
//! target, splices XML subtrees or text fragments in place of the include
//! elements, routes fetch failures to `xi:fallback`, and detects inclusion
//! cycles.  DocBook-specific work on the expanded tree lives in
//! [`crate::docbook`].

use std::str;

use markup5ever::QualName;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::dbxi_log;
use crate::error::{ImplementationLimit, ResourceError, TransclusionError};
use crate::io;
use crate::limits;
use crate::node::{inherited_attribute, is_element_named, Document, Node, NodeBorrow, NodeData};
use crate::session::Session;
use crate::url_resolver;
use crate::xml::{self, no_ns_name, qual_name, xinclude_name, xml_name, DBXI_NS, LOCAL_NS, XML_NS};
use crate::xmlcat;

/// The chain of `(url, fragid)` pairs currently being included.
///
/// Extended functionally: each recursion level gets its own copy with one
/// more entry, so sibling includes never see each other's entries.
type IncludeStack = Vec<(String, Option<String>)>;

/// Errors returned from fetching an inclusion target.
///
/// These follow the terminology from <https://www.w3.org/TR/xinclude/#terminology>:
/// a resource error may be answered by an `xi:fallback`, a fatal error may not.
enum AcquireError {
    Resource(ResourceError),
    Fatal(TransclusionError),
}

/// Expands every `xi:include` below the document node, then flattens the
/// `xi:fallback` wrappers left behind by failed inclusions.
///
/// The document root element gets an `xml:base` pointing at `base_url`
/// unless it already carries one.
pub fn process_tree(
    document: &Document,
    base_url: Option<&str>,
    catalog: Option<&str>,
    file: Option<&str>,
    session: &Session,
) -> Result<(), TransclusionError> {
    if let (Some(base), Some(root)) = (base_url, document.document_element()) {
        let elem = root.borrow_element();
        if !elem.has_attribute(xml_name!("base")) {
            elem.set_attribute(qual_name(Some("xml"), XML_NS, "base"), base);
        }
    }

    process_subtree(
        &document.root(),
        base_url,
        catalog,
        file,
        &IncludeStack::new(),
        session,
    )?;
    flatten_fallbacks(&document.root());
    Ok(())
}

/// Processes one spliced-in subtree: stamps `xml:base` and the line of the
/// include that pulled it in, then keeps expanding inside it.
fn process_xinclude(
    tree: &Node,
    base_url: Option<&str>,
    catalog: Option<&str>,
    file: Option<&str>,
    parent_line: Option<usize>,
    stack: &IncludeStack,
    session: &Session,
) -> Result<(), TransclusionError> {
    {
        let elem = tree.borrow_element();
        if let Some(base) = base_url {
            if !elem.has_attribute(xml_name!("base")) {
                elem.set_attribute(qual_name(Some("xml"), XML_NS, "base"), base);
            }
        }
        if let Some(line) = parent_line {
            elem.set_attribute(
                qual_name(Some("dbxi"), DBXI_NS, "parentline"),
                &line.to_string(),
            );
        }
    }

    if is_element_named(tree, xinclude_name!("include")) {
        // An included document whose root is itself an include.
        handle_include(tree, base_url, catalog, file, stack, session)
    } else {
        process_subtree(tree, base_url, catalog, file, stack, session)
    }
}

fn process_subtree(
    node: &Node,
    base_url: Option<&str>,
    catalog: Option<&str>,
    file: Option<&str>,
    stack: &IncludeStack,
    session: &Session,
) -> Result<(), TransclusionError> {
    // The tree is restructured at the cursor, so capture the next sibling
    // before handling each child.  Replacement subtrees are traversed by
    // handle_include itself and must not be re-entered here.
    let mut next = node.first_child();
    while let Some(child) = next {
        next = child.next_sibling();

        if !child.is_element() {
            continue;
        }
        if is_element_named(&child, xinclude_name!("include")) {
            handle_include(&child, base_url, catalog, file, stack, session)?;
        } else {
            process_subtree(&child, base_url, catalog, file, stack, session)?;
        }
    }
    Ok(())
}

/// Replaces one `xi:include` element by its target, its fallback, or text.
fn handle_include(
    elem: &Node,
    base_url: Option<&str>,
    catalog: Option<&str>,
    file: Option<&str>,
    stack: &IncludeStack,
    session: &Session,
) -> Result<(), TransclusionError> {
    assert!(elem.parent().is_some(), "XInclude without parent");

    let err_file = file.unwrap_or("").to_string();
    let line = elem.borrow_element().sourceline();

    validate_xinclude(elem, file)?;

    // Closest xml:base wins over the base of the enclosing document.
    let base_url = inherited_attribute(elem, xml_name!("base"))
        .map(|(value, _)| value)
        .or_else(|| base_url.map(String::from));

    let (content, url) = match get_target(elem, base_url.as_deref(), catalog, file, session) {
        Ok(target) => target,
        Err(AcquireError::Fatal(e)) => return Err(e),
        Err(AcquireError::Resource(rex)) => {
            eprintln!("{rex}");

            if !handle_fallback(elem, catalog, file, stack, session)? {
                return Err(TransclusionError::NoFallback {
                    file: err_file,
                    line,
                });
            }
            return Ok(());
        }
    };

    let (parse, fragid) = {
        let e = elem.borrow_element();
        (
            e.attribute(no_ns_name!("parse"))
                .unwrap_or_else(|| "xml".to_string()),
            e.attribute(no_ns_name!("fragid")),
        )
    };

    if parse != "xml" {
        return include_text(elem, &content, fragid.as_deref(), &url, file);
    }

    let xinclude_id = (url.clone(), fragid.clone());
    if stack.contains(&xinclude_id) {
        let chain = stack
            .iter()
            .chain(std::iter::once(&xinclude_id))
            .map(stack_entry)
            .collect();
        return Err(TransclusionError::InfiniteRecursion {
            url,
            file: err_file,
            line,
            chain,
        });
    }
    if stack.len() >= limits::MAX_XINCLUDE_DEPTH {
        return Err(TransclusionError::LimitExceeded(
            ImplementationLimit::TooDeeplyNestedIncludes,
        ));
    }

    let text = str::from_utf8(&content).map_err(|_| TransclusionError::Utf8 {
        url: url.clone(),
    })?;
    let subdoc = xml::parse_document(text, Some(&url))?;

    let mut subtree = subdoc
        .document_element()
        .expect("a parsed document has a document element");
    let mut url = url;

    if let Some(ref fragid) = fragid {
        let matches = subdoc.elements_with_id(fragid);
        if matches.len() != 1 {
            return Err(TransclusionError::FragidNotFound {
                fragid: fragid.clone(),
                url,
                file: err_file,
                line,
            });
        }
        subtree = matches[0].clone();
        if let Some((inherited, _)) = inherited_attribute(&subtree, xml_name!("base")) {
            url = inherited;
        }
    }

    copy_attributes(elem, &subtree);

    // Replace the include by the subtree.  Text trailing the include is an
    // ordinary sibling node and stays in place.
    let mut include = elem.clone();
    include.insert_before(subtree.clone());
    include.detach();

    let mut deeper = stack.clone();
    deeper.push(xinclude_id);
    process_xinclude(
        &subtree,
        Some(&url),
        catalog,
        Some(&url),
        Some(line),
        &deeper,
        session,
    )
}

fn stack_entry(entry: &(String, Option<String>)) -> String {
    match &entry.1 {
        Some(fragid) => format!("{}#{}", entry.0, fragid),
        None => entry.0.clone(),
    }
}

/// Validates the attributes and children of an `xi:include` element.
fn validate_xinclude(elem: &Node, file: Option<&str>) -> Result<(), TransclusionError> {
    const VALID_ATTRIBUTES: [&str; 4] = ["href", "fragid", "parse", "set-xml-id"];

    let err_file = file.unwrap_or("").to_string();
    let line = elem.borrow_element().sourceline();

    {
        let e = elem.borrow_element();
        let attrs = e.attributes();
        for (name, _) in attrs.iter() {
            if !name.ns.is_empty() {
                continue;
            }
            if &*name.local == "xpointer" {
                return Err(TransclusionError::XPointerUnsupported {
                    file: err_file,
                    line,
                });
            }
            if !VALID_ATTRIBUTES.iter().any(|a| *a == &*name.local) {
                return Err(TransclusionError::InvalidAttribute {
                    name: name.local.to_string(),
                    file: err_file,
                    line,
                });
            }
        }
    }

    let parse = elem
        .borrow_element()
        .attribute(no_ns_name!("parse"))
        .unwrap_or_else(|| "xml".to_string());
    if parse != "xml" && parse != "text/plain" {
        return Err(TransclusionError::InvalidParse {
            value: parse,
            file: err_file,
            line,
        });
    }

    let mut element_children = elem.children().filter(|c| c.is_element());
    if let Some(first) = element_children.next() {
        if element_children.next().is_some()
            || !is_element_named(&first, xinclude_name!("fallback"))
        {
            return Err(TransclusionError::InvalidFallback {
                file: err_file,
                line,
            });
        }
    }

    Ok(())
}

/// Fetches the target of an include.
///
/// Returns the raw bytes and the URL they were actually loaded from.  An
/// include without `href` but with a `fragid` refers back into the current
/// document.
fn get_target(
    elem: &Node,
    base_url: Option<&str>,
    catalog: Option<&str>,
    file: Option<&str>,
    session: &Session,
) -> Result<(Vec<u8>, String), AcquireError> {
    let (href, fragid, line) = {
        let e = elem.borrow_element();
        (
            e.attribute(no_ns_name!("href")),
            e.attribute(no_ns_name!("fragid")),
            e.sourceline(),
        )
    };

    let url = match href {
        None => match file {
            Some(file) if fragid.is_some() => file.to_string(),
            _ => {
                return Err(AcquireError::Fatal(TransclusionError::MissingHref {
                    file: file.unwrap_or("").to_string(),
                    line,
                }))
            }
        },
        Some(href) => {
            let url = xmlcat::lookup_url(&href, catalog, session);
            if url == href && !url_resolver::is_absolute(&url) {
                match base_url {
                    Some(base) => url_resolver::resolve(&url, base),
                    None => url,
                }
            } else {
                url
            }
        }
    };

    dbxi_log!(session, "loading {:?}", url);
    match io::acquire_data(&url) {
        Ok(data) => Ok((data.data, url)),
        Err(e) => Err(AcquireError::Resource(ResourceError {
            url,
            file: file.unwrap_or("").to_string(),
            line,
            reason: e.to_string(),
        })),
    }
}

/// Splices `parse="text/plain"` content in place of the include.
fn include_text(
    elem: &Node,
    content: &[u8],
    fragid: Option<&str>,
    url: &str,
    file: Option<&str>,
) -> Result<(), TransclusionError> {
    let line = elem.borrow_element().sourceline();

    let text = str::from_utf8(content).map_err(|_| TransclusionError::Utf8 {
        url: url.to_string(),
    })?;
    let text = normalize_text_content(text);

    let (selected, ok) = text_fragid(&text, fragid);
    if !ok {
        eprintln!(
            "Warning at {}:{}: Invalid fragid for text/plain: {:?}",
            file.unwrap_or(""),
            line,
            fragid.unwrap_or("")
        );
    }

    let mut include = elem.clone();
    if !selected.is_empty() {
        if let Some(prev) = include.previous_sibling().filter(|p| p.is_chars()) {
            prev.borrow_chars().append(&selected);
        } else {
            include.insert_before(Node::new(NodeData::new_chars(&selected)));
        }
    }
    include.detach();
    Ok(())
}

/// Line endings become `\n`; the content is otherwise untouched.
fn normalize_text_content(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Replaces a failed include by its `xi:fallback`, if any.
///
/// Nested includes inside the fallback are expanded *before* the fallback is
/// detached from the include, so their `xml:base` inheritance still sees the
/// enclosing document.  The wrapper element itself is inlined later by
/// [`flatten_fallbacks`].
fn handle_fallback(
    elem: &Node,
    catalog: Option<&str>,
    file: Option<&str>,
    stack: &IncludeStack,
    session: &Session,
) -> Result<bool, TransclusionError> {
    let fallback = match elem.children().find(|c| c.is_element()) {
        Some(f) if is_element_named(&f, xinclude_name!("fallback")) => f,
        _ => return Ok(false),
    };

    process_subtree(&fallback, None, catalog, file, stack, session)?;

    let mut include = elem.clone();
    include.insert_before(fallback.clone());
    include.detach();
    Ok(true)
}

/// Removes every `xi:fallback` wrapper by splicing its children into the
/// parent at the wrapper's position.
fn flatten_fallbacks(node: &Node) {
    let mut next = node.first_child();
    while let Some(child) = next {
        if is_element_named(&child, xinclude_name!("fallback")) {
            let after = child.next_sibling();
            let first_inlined = child.first_child();

            let mut fallback = child.clone();
            while let Some(grandchild) = fallback.first_child() {
                fallback.insert_before(grandchild);
            }
            fallback.detach();

            // Continue with the inlined nodes so nested wrappers get
            // flattened too.
            next = first_inlined.or(after);
        } else {
            if child.is_element() {
                flatten_fallbacks(&child);
            }
            next = child.next_sibling();
        }
    }
}

/// W3C XInclude 1.1 attribute copying, from the include element onto the
/// root of the replacement subtree.
fn copy_attributes(elem: &Node, subtree: &Node) {
    let attrs: Vec<(QualName, String)> = {
        let e = elem.borrow_element();
        let attrs = e.attributes();
        attrs.iter().map(|(n, v)| (n.clone(), v.to_string())).collect()
    };

    let target = subtree.borrow_element();
    for (name, value) in attrs {
        if name.ns.is_empty() && &*name.local == "set-xml-id" {
            // Override or remove xml:id on the replacement root.
            if !value.is_empty() {
                target.set_attribute(qual_name(Some("xml"), XML_NS, "id"), &value);
            } else {
                target.remove_attribute(xml_name!("id"));
            }
        } else if &*name.ns == LOCAL_NS {
            target.set_attribute(qual_name(None, "", &name.local), &value);
        } else if &*name.ns == XML_NS {
            // The xml: namespace is never copied.
            continue;
        } else if !name.ns.is_empty() {
            target.set_attribute(name, &value);
        }
        // Unnamespaced href/fragid/parse are consumed by the include itself.
    }
}

/// A text fragment unit from RFC 5147.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Char,
    Line,
}

/// Parses an RFC 5147 fragment identifier.
///
/// Integrity clauses (`length=`, `md5=`) are validated syntactically and
/// otherwise ignored.  Returns `None` for anything the grammar rejects.
pub fn parse_fragid(fragid: &str) -> Option<(Unit, usize, Option<usize>)> {
    static FRAGID: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"^(char|line)=(?:(?:(\d+)(?:,(\d+)?)?)|(?:,(\d+)))(?:;(?:length=\d+|md5=[0-9a-fA-F]{32})(?:,(?:\w+)?)?)?$",
        )
        .unwrap()
    });

    let caps = FRAGID.captures(fragid)?;

    let unit = match caps.get(1).map(|m| m.as_str()) {
        Some("char") => Unit::Char,
        _ => Unit::Line,
    };

    let start = caps.get(2);
    let end = if start.is_some() { caps.get(3) } else { caps.get(4) };

    let start = match start {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    let end = match end {
        Some(m) => Some(m.as_str().parse().ok()?),
        None => None,
    };

    Some((unit, start, end))
}

/// Applies an RFC 5147 fragment to text content.
///
/// A malformed fragid selects the whole content, flagged by the second
/// return value so the caller can warn.
pub fn text_fragid(content: &str, fragid: Option<&str>) -> (String, bool) {
    let fragid = match fragid {
        Some(f) => f,
        None => return (content.to_string(), true),
    };

    let (unit, start, end) = match parse_fragid(fragid) {
        Some(parsed) => parsed,
        None => return (content.to_string(), false),
    };

    match unit {
        Unit::Line => {
            // A trailing line terminator does not open one more line.
            let mut lines: Vec<&str> = content.split('\n').collect();
            if lines.last() == Some(&"") {
                lines.pop();
            }
            let end = end.unwrap_or(lines.len()).min(lines.len());
            let start = start.min(end);
            (lines[start..end].join("\n"), true)
        }
        Unit::Char => {
            let chars: Vec<char> = content.chars().collect();
            let end = end.unwrap_or(chars.len()).min(chars.len());
            let start = start.min(end);
            (chars[start..end].iter().collect(), true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragid_grammar() {
        assert_eq!(parse_fragid(""), None);
        assert_eq!(parse_fragid("asdf=0"), None);
        assert_eq!(parse_fragid("char=asdf"), None);
        assert_eq!(parse_fragid("char=0"), Some((Unit::Char, 0, None)));
        assert_eq!(parse_fragid("char=,320"), Some((Unit::Char, 0, Some(320))));
        assert_eq!(parse_fragid("line=0,3"), Some((Unit::Line, 0, Some(3))));
        assert_eq!(parse_fragid("line=1,"), Some((Unit::Line, 1, None)));
        assert_eq!(
            parse_fragid("char=0;length=10"),
            Some((Unit::Char, 0, None))
        );
        assert_eq!(
            parse_fragid("char=0;md5=0123456789abcdefDEADBEEFBADBABE5"),
            Some((Unit::Char, 0, None))
        );
        // Invalid hex digit in the md5 clause.
        assert_eq!(
            parse_fragid("char=0;md5=0123456789abcdefDEADBEEFG00DBABE5"),
            None
        );
    }

    #[test]
    fn text_fragid_selects_lines() {
        let content = "a\nb\nc\nd";
        assert_eq!(
            text_fragid(content, Some("line=1,3")),
            ("b\nc".to_string(), true)
        );
        assert_eq!(
            text_fragid(content, Some("line=0,1")),
            ("a".to_string(), true)
        );
        assert_eq!(
            text_fragid(content, Some("line=2,")),
            ("c\nd".to_string(), true)
        );
    }

    #[test]
    fn text_fragid_selects_chars() {
        assert_eq!(
            text_fragid("abcdef", Some("char=2,4")),
            ("cd".to_string(), true)
        );
        assert_eq!(
            text_fragid("abcdef", Some("char=4")),
            ("ef".to_string(), true)
        );
        assert_eq!(
            text_fragid("abcdef", Some("char=,2")),
            ("ab".to_string(), true)
        );
    }

    #[test]
    fn text_fragid_clamps_out_of_range() {
        assert_eq!(
            text_fragid("ab", Some("char=1,100")),
            ("b".to_string(), true)
        );
        assert_eq!(
            text_fragid("ab", Some("char=100,2")),
            ("".to_string(), true)
        );
        assert_eq!(
            text_fragid("a\nb", Some("line=5,9")),
            ("".to_string(), true)
        );
    }

    #[test]
    fn text_fragid_falls_back_to_whole_content() {
        assert_eq!(text_fragid("abc", None), ("abc".to_string(), true));
        assert_eq!(
            text_fragid("abc", Some("nonsense")),
            ("abc".to_string(), false)
        );
    }

    #[test]
    fn normalizes_text_content() {
        assert_eq!(normalize_text_content("a\r\nb\rc\n"), "a\nb\nc\n");
        assert_eq!(normalize_text_content("a"), "a");
    }

    #[test]
    fn line_selection_ignores_a_trailing_terminator() {
        assert_eq!(
            text_fragid("a\nb\nc\n", Some("line=1,")),
            ("b\nc".to_string(), true)
        );
        assert_eq!(
            text_fragid("a\nb\nc\n", Some("line=0,3")),
            ("a\nb\nc".to_string(), true)
        );
    }

    fn include_element(doc: &Document) -> Node {
        doc.elements()
            .find(|n| is_element_named(n, xinclude_name!("include")))
            .unwrap()
    }

    #[test]
    fn validator_accepts_wellformed_includes() {
        let doc = xml::parse_document(
            "<d xmlns:xi='http://www.w3.org/2001/XInclude'>\
               <xi:include href='a.xml' fragid='f' parse='xml' set-xml-id='x'>\
                 <xi:fallback><p/></xi:fallback>\
               </xi:include>\
             </d>",
            None,
        )
        .unwrap();

        assert!(validate_xinclude(&include_element(&doc), None).is_ok());
    }

    #[test]
    fn validator_rejects_unknown_attributes() {
        let doc = xml::parse_document(
            "<d xmlns:xi='http://www.w3.org/2001/XInclude'>\
               <xi:include href='a.xml' encoding='utf-8'/>\
             </d>",
            None,
        )
        .unwrap();

        assert!(matches!(
            validate_xinclude(&include_element(&doc), None),
            Err(TransclusionError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn validator_rejects_xpointer() {
        let doc = xml::parse_document(
            "<d xmlns:xi='http://www.w3.org/2001/XInclude'>\
               <xi:include href='a.xml' xpointer='xpath(/x)'/>\
             </d>",
            None,
        )
        .unwrap();

        assert!(matches!(
            validate_xinclude(&include_element(&doc), None),
            Err(TransclusionError::XPointerUnsupported { .. })
        ));
    }

    #[test]
    fn validator_rejects_bad_parse_values() {
        // Only the XInclude 1.1 token is accepted, not plain "text".
        let doc = xml::parse_document(
            "<d xmlns:xi='http://www.w3.org/2001/XInclude'>\
               <xi:include href='a.xml' parse='text'/>\
             </d>",
            None,
        )
        .unwrap();

        assert!(matches!(
            validate_xinclude(&include_element(&doc), None),
            Err(TransclusionError::InvalidParse { .. })
        ));
    }

    #[test]
    fn validator_rejects_non_fallback_children() {
        let doc = xml::parse_document(
            "<d xmlns:xi='http://www.w3.org/2001/XInclude'>\
               <xi:include href='a.xml'><p/></xi:include>\
             </d>",
            None,
        )
        .unwrap();

        assert!(matches!(
            validate_xinclude(&include_element(&doc), None),
            Err(TransclusionError::InvalidFallback { .. })
        ));
    }

    #[test]
    fn copies_attributes_per_xinclude_11() {
        let doc = xml::parse_document(
            "<d xmlns:xi='http://www.w3.org/2001/XInclude' \
                xmlns:local='http://www.w3.org/2001/XInclude/local-attributes' \
                xmlns:other='urn:other'>\
               <xi:include href='a.xml' set-xml-id='new' local:role='intro' \
                           other:keep='yes' xml:lang='en'/>\
             </d>",
            None,
        )
        .unwrap();
        let target_doc =
            xml::parse_document("<section xml:id='old' xml:lang='de'/>", None).unwrap();
        let target = target_doc.document_element().unwrap();

        copy_attributes(&include_element(&doc), &target);

        let e = target.borrow_element();
        assert_eq!(e.attribute(xml_name!("id")).as_deref(), Some("new"));
        assert_eq!(e.attribute(no_ns_name!("role")).as_deref(), Some("intro"));
        assert_eq!(
            e.attribute(markup5ever::ExpandedName {
                ns: &markup5ever::Namespace::from("urn:other"),
                local: &markup5ever::LocalName::from("keep"),
            })
            .as_deref(),
            Some("yes")
        );
        // xml:* on the include is ignored; the target keeps its own.
        assert_eq!(e.attribute(xml_name!("lang")).as_deref(), Some("de"));
        // href is consumed by the include, never copied.
        assert_eq!(e.attribute(no_ns_name!("href")), None);
    }

    #[test]
    fn empty_set_xml_id_removes_the_target_id() {
        let doc = xml::parse_document(
            "<d xmlns:xi='http://www.w3.org/2001/XInclude'>\
               <xi:include href='a.xml' set-xml-id=''/>\
             </d>",
            None,
        )
        .unwrap();
        let target_doc = xml::parse_document("<section xml:id='old'/>", None).unwrap();
        let target = target_doc.document_element().unwrap();

        copy_attributes(&include_element(&doc), &target);

        assert_eq!(target.borrow_element().attribute(xml_name!("id")), None);
    }
}
