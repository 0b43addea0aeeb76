//! The main XML parser.
//!
//! Tokenisation is done by the `xmlparser` crate; this module resolves
//! namespaces, expands character and predefined entity references, and
//! builds the [`Document`] tree out of [`Node`]s.

use markup5ever::{LocalName, Namespace, Prefix, QualName};

use crate::error::TransclusionError;
use crate::node::{Document, Node, NodeBorrow, NodeData};

mod attributes;
pub mod serialize;

pub use attributes::Attributes;

/// The `xml:` namespace.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// The `xmlns` namespace; may never be declared or used as an element prefix.
pub const XMLNS_NS: &str = "http://www.w3.org/2000/xmlns/";

/// The XInclude namespace of `xi:include` and `xi:fallback`.
pub const XI_NS: &str = "http://www.w3.org/2001/XInclude";

/// XInclude "local attributes": copied onto the included root with the
/// namespace stripped.
pub const LOCAL_NS: &str = "http://www.w3.org/2001/XInclude/local-attributes";

/// The DocBook transclusion namespace (`trans:idfixup` and friends).
pub const TRANS_NS: &str = "http://docbook.org/ns/transclude";

/// The DocBook namespace proper.
pub const DB_NS: &str = "http://docbook.org/ns/docbook";

/// Internal namespace for temporary attributes; never survives into output.
pub const DBXI_NS: &str = "dbxincluder";

// Creates an ExpandedName in one of our namespaces.
//
// The markup5ever crate doesn't have built-in namespaces for XInclude or
// DocBook, so we make our own.
macro_rules! xinclude_name {
    ($local_name:expr) => {
        markup5ever::ExpandedName {
            ns: &markup5ever::Namespace::from($crate::xml::XI_NS),
            local: &markup5ever::LocalName::from($local_name),
        }
    };
}
pub(crate) use xinclude_name;

macro_rules! xml_name {
    ($local_name:expr) => {
        markup5ever::ExpandedName {
            ns: &markup5ever::Namespace::from($crate::xml::XML_NS),
            local: &markup5ever::LocalName::from($local_name),
        }
    };
}
pub(crate) use xml_name;

macro_rules! trans_name {
    ($local_name:expr) => {
        markup5ever::ExpandedName {
            ns: &markup5ever::Namespace::from($crate::xml::TRANS_NS),
            local: &markup5ever::LocalName::from($local_name),
        }
    };
}
pub(crate) use trans_name;

macro_rules! dbxi_name {
    ($local_name:expr) => {
        markup5ever::ExpandedName {
            ns: &markup5ever::Namespace::from($crate::xml::DBXI_NS),
            local: &markup5ever::LocalName::from($local_name),
        }
    };
}
pub(crate) use dbxi_name;

macro_rules! no_ns_name {
    ($local_name:expr) => {
        markup5ever::ExpandedName {
            ns: &markup5ever::Namespace::from(""),
            local: &markup5ever::LocalName::from($local_name),
        }
    };
}
pub(crate) use no_ns_name;

/// Builds a `QualName` from string parts.
pub fn qual_name(prefix: Option<&str>, ns: &str, local: &str) -> QualName {
    QualName::new(
        prefix.map(Prefix::from),
        Namespace::from(ns),
        LocalName::from(local),
    )
}

/// Parses an XML document into a tree.
///
/// `url` is only used in diagnostics.  The returned [`Document`] owns the
/// synthetic document node; the tree below it is freely mutable.
pub fn parse_document(text: &str, url: Option<&str>) -> Result<Document, TransclusionError> {
    let mut state = XmlState::new(text, url);

    for token in xmlparser::Tokenizer::from(text) {
        let token = token.map_err(|e| state.error(&e.to_string()))?;
        state.process_token(token)?;
    }

    state.finish()
}

struct PendingTag {
    prefix: String,
    local: String,
    pos: usize,
}

struct PendingAttr {
    prefix: String,
    local: String,
    value: String,
    pos: usize,
}

/// Holds the state used while building a tree from the token stream.
///
/// Namespace scoping follows the usual model: `bindings` is a flat stack of
/// prefix bindings, `marks` records where each open element's frame begins,
/// and a start tag's own `xmlns` attributes are pushed before its names are
/// resolved.
struct XmlState {
    url: String,

    root: Node,
    current: Node,

    bindings: Vec<(Option<String>, String)>,
    marks: Vec<usize>,
    pending_mark: usize,
    pending_tag: Option<PendingTag>,
    pending_attrs: Vec<PendingAttr>,

    line_starts: Vec<usize>,
}

impl XmlState {
    fn new(text: &str, url: Option<&str>) -> XmlState {
        let root = Node::new(NodeData::Root);

        let mut line_starts = vec![0];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }

        XmlState {
            url: url.unwrap_or_default().to_string(),
            current: root.clone(),
            root,
            bindings: Vec::new(),
            marks: Vec::new(),
            pending_mark: 0,
            pending_tag: None,
            pending_attrs: Vec::new(),
            line_starts,
        }
    }

    fn line_of(&self, pos: usize) -> usize {
        self.line_starts.partition_point(|&start| start <= pos)
    }

    fn error(&self, reason: &str) -> TransclusionError {
        TransclusionError::XmlParse {
            url: self.url.clone(),
            reason: reason.to_string(),
        }
    }

    fn error_at(&self, reason: &str, pos: usize) -> TransclusionError {
        self.error(&format!("{} at line {}", reason, self.line_of(pos)))
    }

    fn process_token(&mut self, token: xmlparser::Token<'_>) -> Result<(), TransclusionError> {
        use xmlparser::Token;

        match token {
            Token::Declaration { .. } => Ok(()),

            Token::DtdStart { span, .. } => {
                Err(self.error_at("XML with an internal DTD subset is not supported", span.start()))
            }
            Token::EmptyDtd { .. } | Token::DtdEnd { .. } | Token::EntityDeclaration { .. } => {
                Ok(())
            }

            Token::ElementStart { prefix, local, span } => {
                if prefix.as_str() == "xmlns" {
                    return Err(self.error_at("'xmlns' cannot be used as an element prefix", span.start()));
                }
                self.pending_mark = self.bindings.len();
                self.pending_tag = Some(PendingTag {
                    prefix: prefix.as_str().to_string(),
                    local: local.as_str().to_string(),
                    pos: span.start(),
                });
                self.pending_attrs.clear();
                Ok(())
            }

            Token::Attribute { prefix, local, value, span } => {
                self.attribute(prefix.as_str(), local.as_str(), value.as_str(), span.start())
            }

            Token::ElementEnd { end, span } => match end {
                xmlparser::ElementEnd::Open => self.start_element(span.start(), false),
                xmlparser::ElementEnd::Empty => self.start_element(span.start(), true),
                xmlparser::ElementEnd::Close(prefix, local) => {
                    self.end_element(prefix.as_str(), local.as_str(), span.start())
                }
            },

            Token::Text { text } => {
                let resolved = self.resolve_text(text.as_str(), text.start())?;
                self.characters(&resolved, text.start())
            }

            Token::Cdata { text, span } => {
                let normalized = normalize_line_endings(text.as_str());
                self.characters(&normalized, span.start())
            }

            Token::Comment { text, .. } => {
                let mut current = self.current.clone();
                current.append(Node::new(NodeData::Comment(text.as_str().to_string())));
                Ok(())
            }

            Token::ProcessingInstruction { target, content, .. } => {
                let mut current = self.current.clone();
                current.append(Node::new(NodeData::ProcessingInstruction {
                    target: target.as_str().to_string(),
                    value: content.map(|c| c.as_str().to_string()),
                }));
                Ok(())
            }
        }
    }

    fn attribute(
        &mut self,
        prefix: &str,
        local: &str,
        raw_value: &str,
        pos: usize,
    ) -> Result<(), TransclusionError> {
        let value = self.resolve_attr_value(raw_value, pos)?;

        if prefix == "xmlns" {
            // A prefix declaration: xmlns:foo="uri"
            if local == "xml" {
                if value != XML_NS {
                    return Err(self.error_at("the 'xml' prefix must be bound to its own namespace", pos));
                }
                // The implicit binding is always in effect; don't record it.
                return Ok(());
            }
            if value == XML_NS {
                return Err(self.error_at("the XML namespace cannot be bound to another prefix", pos));
            }
            if value == XMLNS_NS {
                return Err(self.error_at("the xmlns namespace cannot be declared", pos));
            }
            if self.bindings[self.pending_mark..]
                .iter()
                .any(|(p, _)| p.as_deref() == Some(local))
            {
                return Err(self.error_at(&format!("namespace prefix {local:?} is already declared"), pos));
            }
            self.bindings.push((Some(local.to_string()), value));
        } else if prefix.is_empty() && local == "xmlns" {
            // Default namespace declaration: xmlns="uri"
            if value == XML_NS || value == XMLNS_NS {
                return Err(self.error_at("invalid default namespace declaration", pos));
            }
            if self.bindings[self.pending_mark..]
                .iter()
                .any(|(p, _)| p.is_none())
            {
                return Err(self.error_at("the default namespace is already declared", pos));
            }
            self.bindings.push((None, value));
        } else {
            self.pending_attrs.push(PendingAttr {
                prefix: prefix.to_string(),
                local: local.to_string(),
                value,
                pos,
            });
        }

        Ok(())
    }

    fn lookup_prefix(&self, prefix: &str) -> Option<&str> {
        let wanted = if prefix.is_empty() { None } else { Some(prefix) };
        self.bindings
            .iter()
            .rev()
            .find(|(p, _)| p.as_deref() == wanted)
            .map(|(_, uri)| uri.as_str())
    }

    fn element_namespace(&self, prefix: &str, pos: usize) -> Result<String, TransclusionError> {
        if prefix == "xml" {
            return Ok(XML_NS.to_string());
        }
        match self.lookup_prefix(prefix) {
            Some(uri) => Ok(uri.to_string()),
            None if prefix.is_empty() => Ok(String::new()),
            None => Err(self.error_at(&format!("unknown namespace prefix {prefix:?}"), pos)),
        }
    }

    fn start_element(&mut self, end_pos: usize, self_closing: bool) -> Result<(), TransclusionError> {
        let tag = match self.pending_tag.take() {
            Some(tag) => tag,
            None => return Err(self.error_at("unexpected end of start tag", end_pos)),
        };

        let ns = self.element_namespace(&tag.prefix, tag.pos)?;
        let name = qual_name(
            if tag.prefix.is_empty() {
                None
            } else {
                Some(tag.prefix.as_str())
            },
            &ns,
            &tag.local,
        );

        let mut attrs = Attributes::new();
        for attr in std::mem::take(&mut self.pending_attrs) {
            let attr_ns = if attr.prefix.is_empty() {
                // An unprefixed attribute never has a namespace.
                String::new()
            } else if attr.prefix == "xml" {
                XML_NS.to_string()
            } else {
                match self.lookup_prefix(&attr.prefix) {
                    Some(uri) => uri.to_string(),
                    None => {
                        return Err(self.error_at(
                            &format!("unknown namespace prefix {:?}", attr.prefix),
                            attr.pos,
                        ))
                    }
                }
            };

            let attr_name = qual_name(
                if attr.prefix.is_empty() {
                    None
                } else {
                    Some(attr.prefix.as_str())
                },
                &attr_ns,
                &attr.local,
            );
            if attrs.contains(attr_name.expanded()) {
                return Err(self.error_at(
                    &format!("attribute {:?} is already defined", attr.local),
                    attr.pos,
                ));
            }
            attrs.push(attr_name, attr.value);
        }

        if self.current == self.root && self.root.children().any(|c| c.is_element()) {
            return Err(self.error_at("junk after document element", tag.pos));
        }

        let node = Node::new(NodeData::new_element(name, attrs, self.line_of(tag.pos)));
        let mut current = self.current.clone();
        current.append(node.clone());

        if self_closing {
            self.bindings.truncate(self.pending_mark);
        } else {
            self.marks.push(self.pending_mark);
            self.current = node;
        }

        Ok(())
    }

    fn end_element(&mut self, prefix: &str, local: &str, pos: usize) -> Result<(), TransclusionError> {
        if !self.current.is_element() {
            return Err(self.error_at(&format!("unexpected closing tag {local:?}"), pos));
        }

        {
            let elem = self.current.borrow_element();
            let name = elem.name();
            let open_prefix = name.prefix.as_deref().unwrap_or("");
            if open_prefix != prefix || &*name.local != local {
                let expected = if open_prefix.is_empty() {
                    name.local.to_string()
                } else {
                    format!("{open_prefix}:{}", name.local)
                };
                return Err(self.error_at(
                    &format!("expected closing tag for {expected:?}, not {local:?}"),
                    pos,
                ));
            }
        }

        self.current = self.current.parent().unwrap_or_else(|| self.root.clone());
        self.bindings.truncate(self.marks.pop().unwrap_or(0));
        Ok(())
    }

    fn characters(&mut self, text: &str, pos: usize) -> Result<(), TransclusionError> {
        if self.current == self.root {
            if text.chars().all(char::is_whitespace) {
                return Ok(());
            }
            return Err(self.error_at("character data outside of the document element", pos));
        }

        if text.is_empty() {
            return Ok(());
        }

        // Coalesce adjacent runs into one text node.
        let mut current = self.current.clone();
        if let Some(child) = current.last_child().filter(|c| c.is_chars()) {
            child.borrow_chars().append(text);
        } else {
            current.append(Node::new(NodeData::new_chars(text)));
        }
        Ok(())
    }

    fn resolve_text(&self, raw: &str, pos: usize) -> Result<String, TransclusionError> {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;

        while let Some(i) = rest.find(|c| c == '&' || c == '\r') {
            out.push_str(&rest[..i]);
            rest = &rest[i..];

            if let Some(stripped) = rest.strip_prefix('\r') {
                out.push('\n');
                rest = stripped.strip_prefix('\n').unwrap_or(stripped);
            } else {
                let expanded;
                (expanded, rest) = self.reference(rest, pos)?;
                out.push(expanded);
            }
        }

        out.push_str(rest);
        Ok(out)
    }

    fn resolve_attr_value(&self, raw: &str, pos: usize) -> Result<String, TransclusionError> {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;

        while let Some(i) = rest.find(|c| matches!(c, '&' | '\r' | '\n' | '\t')) {
            out.push_str(&rest[..i]);
            rest = &rest[i..];

            if let Some(stripped) = rest.strip_prefix('\r') {
                out.push(' ');
                rest = stripped.strip_prefix('\n').unwrap_or(stripped);
            } else if let Some(stripped) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix('\t')) {
                out.push(' ');
                rest = stripped;
            } else {
                // Characters coming from a reference are not subject to
                // whitespace normalization.
                let expanded;
                (expanded, rest) = self.reference(rest, pos)?;
                out.push(expanded);
            }
        }

        out.push_str(rest);
        Ok(out)
    }

    /// Expands the character or predefined entity reference `rest` starts
    /// with and returns the remaining input.
    fn reference<'a>(
        &self,
        rest: &'a str,
        pos: usize,
    ) -> Result<(char, &'a str), TransclusionError> {
        debug_assert!(rest.starts_with('&'));

        let end = rest
            .find(';')
            .ok_or_else(|| self.error_at("malformed entity reference", pos))?;
        let name = &rest[1..end];

        let c = match name {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "apos" => Some('\''),
            "quot" => Some('"'),
            _ => {
                if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
                } else if let Some(dec) = name.strip_prefix('#') {
                    dec.parse::<u32>().ok().and_then(char::from_u32)
                } else {
                    None
                }
            }
        };

        match c {
            Some(c) => Ok((c, &rest[end + 1..])),
            None => Err(self.error_at(&format!("unknown entity reference \"&{name};\""), pos)),
        }
    }

    fn finish(self) -> Result<Document, TransclusionError> {
        if self.current != self.root {
            return Err(self.error("unexpected end of document"));
        }

        if !self.root.children().any(|c| c.is_element()) {
            return Err(self.error("the document has no document element"));
        }

        Ok(Document::new(self.root))
    }
}

fn normalize_line_endings(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    text.replace("\r\n", "\n").replace('\r', "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_namespaces() {
        let doc = parse_document(
            "<a xmlns='urn:default' xmlns:xi='http://www.w3.org/2001/XInclude'>\
               <xi:include href='x'/>\
             </a>",
            None,
        )
        .unwrap();

        let root = doc.document_element().unwrap();
        assert_eq!(&*root.borrow_element().name().ns, "urn:default");

        let include = root.children().find(|c| c.is_element()).unwrap();
        let elem = include.borrow_element();
        assert_eq!(elem.name().expanded(), xinclude_name!("include"));
        assert_eq!(elem.attribute(no_ns_name!("href")).as_deref(), Some("x"));
    }

    #[test]
    fn tracks_source_lines() {
        let doc = parse_document("<a>\n  <b/>\n  <c/>\n</a>", None).unwrap();

        let lines: Vec<usize> = doc
            .elements()
            .map(|n| n.borrow_element().sourceline())
            .collect();
        assert_eq!(lines, vec![1, 2, 3]);
    }

    #[test]
    fn expands_references() {
        let doc = parse_document("<a b='1 &amp; 2'>x &lt; &#x79; &#122;</a>", None).unwrap();

        let root = doc.document_element().unwrap();
        assert_eq!(
            root.borrow_element().attribute(no_ns_name!("b")).as_deref(),
            Some("1 & 2")
        );
        let text = root.first_child().unwrap();
        assert_eq!(text.borrow_chars().get_string(), "x < y z");
    }

    #[test]
    fn coalesces_text_runs() {
        let doc = parse_document("<a>one <![CDATA[two]]> three</a>", None).unwrap();

        let root = doc.document_element().unwrap();
        assert_eq!(root.children().count(), 1);
        assert_eq!(
            root.first_child().unwrap().borrow_chars().get_string(),
            "one two three"
        );
    }

    #[test]
    fn rejects_mismatched_tags() {
        assert!(matches!(
            parse_document("<a><b></a></b>", None),
            Err(TransclusionError::XmlParse { .. })
        ));
    }

    #[test]
    fn rejects_unknown_prefixes() {
        assert!(parse_document("<a random:b='c'/>", None).is_err());
        assert!(parse_document("<random:a/>", None).is_err());
    }

    #[test]
    fn rejects_duplicate_attributes() {
        // Duplication is checked on expanded names, after prefix resolution.
        let err = parse_document(
            "<e xmlns:n1='urn:x' xmlns:n2='urn:x' n1:a='b1' n2:a='b2'/>",
            None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn rejects_dtds() {
        assert!(parse_document("<!DOCTYPE a [<!ENTITY p 'q'>]><a>&p;</a>", None).is_err());
    }

    #[test]
    fn keeps_comments_and_pis() {
        let doc = parse_document("<?pi data?><a><!-- note --></a><!-- tail -->", None).unwrap();

        let kinds: Vec<String> = doc.root().children().map(|n| n.borrow().to_string()).collect();
        assert_eq!(kinds, vec!["PI pi", "a", "Comment"]);
    }

    #[test]
    fn normalizes_line_endings_in_text() {
        let doc = parse_document("<a>one\r\ntwo\rthree</a>", None).unwrap();
        let root = doc.document_element().unwrap();
        assert_eq!(
            root.first_child().unwrap().borrow_chars().get_string(),
            "one\ntwo\nthree"
        );
    }
}
