//! Serialise a document tree back to XML text.
//!
//! Two properties matter here beyond well-formedness:
//!
//! - Namespace declarations are re-derived while walking the tree: a
//!   declaration is emitted on the shallowest element whose name (or whose
//!   attributes) actually needs it.  Declarations nothing refers to anymore
//!   simply never get written, and subtrees spliced in from other documents
//!   get the declarations they require.
//!
//! - Pretty-printing must be a fixed point: serialising a reparse of the
//!   output reproduces the output byte for byte.  The indentation rule for
//!   this is the libxml2 one: an element's children go on separate indented
//!   lines only while no text node sits between them; the first text child
//!   switches the whole subtree to verbatim mode.  Indentation inserted by a
//!   previous run is itself text, so a second run changes nothing.

use std::fmt::Write;

use markup5ever::QualName;

use crate::node::{Document, Node, NodeBorrow, NodeData};

const INDENT: &str = "  ";

/// Serialises a whole document, without an XML declaration, ending in a
/// newline.
pub fn serialize_document(doc: &Document) -> String {
    let mut out = String::new();
    let mut scope = NsScope::new();

    for child in doc.root().children() {
        write_node(&child, 0, true, &mut scope, &mut out);
        out.push('\n');
    }

    out
}

/// In-scope namespace bindings, shadowing outer ones.
struct NsScope {
    bindings: Vec<(Option<String>, String)>,
}

impl NsScope {
    fn new() -> NsScope {
        NsScope {
            bindings: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.bindings.len()
    }

    fn truncate(&mut self, len: usize) {
        self.bindings.truncate(len);
    }

    fn lookup(&self, prefix: Option<&str>) -> &str {
        self.bindings
            .iter()
            .rev()
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.as_str())
            .unwrap_or("")
    }

    /// Makes sure `prefix` is bound to `ns`, recording a declaration to
    /// emit on the current element if it is not.
    fn ensure(&mut self, decls: &mut Vec<(Option<String>, String)>, prefix: Option<&str>, ns: &str) {
        if self.lookup(prefix) == ns {
            return;
        }
        decls.push((prefix.map(String::from), ns.to_string()));
        self.bindings.push((prefix.map(String::from), ns.to_string()));
    }
}

fn write_node(node: &Node, depth: usize, format: bool, scope: &mut NsScope, out: &mut String) {
    match *node.borrow() {
        NodeData::Root => (),

        NodeData::Element(_) => write_element(node, depth, format, scope, out),

        NodeData::Text(ref chars) => {
            push_escaped_text(out, &chars.get_string());
        }

        NodeData::Comment(ref text) => {
            let _ = write!(out, "<!--{text}-->");
        }

        NodeData::ProcessingInstruction {
            ref target,
            ref value,
        } => {
            match value {
                Some(value) => {
                    let _ = write!(out, "<?{target} {value}?>");
                }
                None => {
                    let _ = write!(out, "<?{target}?>");
                }
            };
        }
    }
}

fn write_element(node: &Node, depth: usize, format: bool, scope: &mut NsScope, out: &mut String) {
    let elem = node.borrow_element();
    let mark = scope.len();

    let mut decls = Vec::new();
    let name = elem.name();
    scope.ensure(&mut decls, name.prefix.as_deref(), &name.ns);
    for (attr_name, _) in elem.attributes().iter() {
        // Unprefixed attributes have no namespace, and the xml prefix is
        // bound implicitly.
        if attr_name.ns.is_empty() || attr_name.prefix.as_deref() == Some("xml") {
            continue;
        }
        scope.ensure(&mut decls, attr_name.prefix.as_deref(), &attr_name.ns);
    }

    out.push('<');
    push_qname(out, name);

    for (prefix, uri) in &decls {
        match prefix {
            Some(p) => {
                let _ = write!(out, " xmlns:{p}=\"");
            }
            None => out.push_str(" xmlns=\""),
        }
        push_escaped_attr(out, uri);
        out.push('"');
    }

    for (attr_name, value) in elem.attributes().iter() {
        out.push(' ');
        push_qname(out, attr_name);
        out.push_str("=\"");
        push_escaped_attr(out, value);
        out.push('"');
    }

    if node.first_child().is_none() {
        out.push_str("/>");
        scope.truncate(mark);
        return;
    }

    out.push('>');

    let child_format = format && !node.children().any(|c| c.is_chars());
    if child_format {
        for child in node.children() {
            out.push('\n');
            push_indent(out, depth + 1);
            write_node(&child, depth + 1, true, scope, out);
        }
        out.push('\n');
        push_indent(out, depth);
    } else {
        for child in node.children() {
            write_node(&child, depth + 1, false, scope, out);
        }
    }

    out.push_str("</");
    push_qname(out, name);
    out.push('>');

    scope.truncate(mark);
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn push_qname(out: &mut String, name: &QualName) {
    if let Some(prefix) = &name.prefix {
        out.push_str(prefix);
        out.push(':');
    }
    out.push_str(&name.local);
}

fn push_escaped_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
}

fn push_escaped_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\t' => out.push_str("&#9;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}
