//! Tree nodes, the representation of parsed XML documents.
//!
//! The tree is built on the [rctree crate][rctree]: [`rctree::Node`] is a
//! generic wrapper over nodes with strong child references and weak parent
//! references, and we put a [`NodeData`] as its type parameter.  For
//! convenience there is a type alias [`Node`]` = rctree::Node<NodeData>`.
//!
//! Character data is stored in text nodes between element nodes, so the
//! "text after this element" of other DOM flavours is simply this node's
//! following text sibling.  Splicing an included subtree in place of an
//! `xi:include` therefore never has to shuffle trailing text around.

use std::cell::{Ref, RefCell};
use std::fmt;

use markup5ever::{ExpandedName, QualName};

use crate::xml::Attributes;

/// Strong reference to a node in the document tree.
pub type Node = rctree::Node<NodeData>;

/// Data for a single DOM node.
///
/// Code that traverses the tree needs to find out at runtime what each node
/// stands for.  Use `is_element`/`is_chars` from the [`NodeBorrow`] trait to
/// see whether `borrow_element` or `borrow_chars` may be called.
pub enum NodeData {
    /// Synthetic document node.
    ///
    /// It is the parent of the document element, which means every element —
    /// including the document element itself — has a parent, and comments or
    /// processing instructions outside the document element have somewhere
    /// to live.
    Root,

    Element(Box<Element>),

    Text(Box<Chars>),

    Comment(String),

    ProcessingInstruction {
        target: String,
        value: Option<String>,
    },
}

impl NodeData {
    pub fn new_element(name: QualName, attributes: Attributes, sourceline: usize) -> NodeData {
        NodeData::Element(Box::new(Element {
            name,
            attributes: RefCell::new(attributes),
            sourceline,
        }))
    }

    pub fn new_chars(initial_text: &str) -> NodeData {
        NodeData::Text(Box::new(Chars::new(initial_text)))
    }
}

impl fmt::Display for NodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            NodeData::Root => write!(f, "Root"),
            NodeData::Element(ref e) => write!(f, "{e}"),
            NodeData::Text(_) => write!(f, "Chars"),
            NodeData::Comment(_) => write!(f, "Comment"),
            NodeData::ProcessingInstruction { ref target, .. } => write!(f, "PI {target}"),
        }
    }
}

/// An XML element: qualified name, attributes, source line.
///
/// The attributes sit behind a `RefCell` so that the many passes which
/// rewrite attribute values can do so through the shared `Ref` handles the
/// tree hands out.
pub struct Element {
    name: QualName,
    attributes: RefCell<Attributes>,
    sourceline: usize,
}

impl Element {
    pub fn name(&self) -> &QualName {
        &self.name
    }

    /// 1-based line in the source document this element started on.
    pub fn sourceline(&self) -> usize {
        self.sourceline
    }

    /// Looks up an attribute value by expanded name.
    pub fn attribute(&self, name: ExpandedName<'_>) -> Option<String> {
        self.attributes.borrow().get(name).map(String::from)
    }

    pub fn has_attribute(&self, name: ExpandedName<'_>) -> bool {
        self.attributes.borrow().contains(name)
    }

    pub fn set_attribute(&self, name: QualName, value: &str) {
        self.attributes.borrow_mut().set(name, value);
    }

    pub fn remove_attribute(&self, name: ExpandedName<'_>) -> Option<String> {
        self.attributes.borrow_mut().remove(name)
    }

    /// Removes every attribute in the given namespace.
    pub fn remove_attributes_in_namespace(&self, ns: &str) {
        self.attributes.borrow_mut().remove_namespace(ns);
    }

    /// Borrows the attribute collection; collect what you need before
    /// mutating the same element's attributes.
    pub fn attributes(&self) -> Ref<'_, Attributes> {
        self.attributes.borrow()
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name.prefix {
            Some(ref p) => write!(f, "{}:{}", p, self.name.local),
            None => write!(f, "{}", self.name.local),
        }
    }
}

/// Character data.
pub struct Chars {
    string: RefCell<String>,
}

impl Chars {
    pub fn new(initial_text: &str) -> Chars {
        Chars {
            string: RefCell::new(String::from(initial_text)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.string.borrow().is_empty()
    }

    pub fn append(&self, s: &str) {
        self.string.borrow_mut().push_str(s);
    }

    pub fn get_string(&self) -> String {
        self.string.borrow().clone()
    }
}

/// Helper trait to get at the `NodeData` variants.
pub trait NodeBorrow {
    /// Returns `true` for `NodeData::Element`, `false` otherwise.
    fn is_element(&self) -> bool;

    /// Returns `true` for `NodeData::Text`, `false` otherwise.
    fn is_chars(&self) -> bool;

    /// Borrows an `Element` reference.
    ///
    /// Panics: will panic if `&self` is not a `NodeData::Element` node
    fn borrow_element(&self) -> Ref<'_, Element>;

    /// Borrows a `Chars` reference.
    ///
    /// Panics: will panic if `&self` is not a `NodeData::Text` node
    fn borrow_chars(&self) -> Ref<'_, Chars>;
}

impl NodeBorrow for Node {
    fn is_element(&self) -> bool {
        matches!(*self.borrow(), NodeData::Element(_))
    }

    fn is_chars(&self) -> bool {
        matches!(*self.borrow(), NodeData::Text(_))
    }

    fn borrow_element(&self) -> Ref<'_, Element> {
        Ref::map(self.borrow(), |n| match n {
            NodeData::Element(e) => &**e,
            _ => panic!("tried to borrow_element for a non-element node"),
        })
    }

    fn borrow_chars(&self) -> Ref<'_, Chars> {
        Ref::map(self.borrow(), |n| match n {
            NodeData::Text(c) => &**c,
            _ => panic!("tried to borrow_chars for a non-text node"),
        })
    }
}

/// Returns whether `node` is an element with the given expanded name.
pub fn is_element_named(node: &Node, name: ExpandedName<'_>) -> bool {
    node.is_element() && node.borrow_element().name().expanded() == name
}

/// Nearest-ancestor-or-self attribute lookup.
///
/// Walks from `node` up to the document node and returns the value and the
/// owning element of the first occurrence of the attribute, or `None` if no
/// ancestor-or-self carries it.  This is how `xml:base` and the DocBook
/// transclusion attributes (`trans:idfixup`, `trans:linkscope`,
/// `trans:suffix`) are inherited.
pub fn inherited_attribute(node: &Node, name: ExpandedName<'_>) -> Option<(String, Node)> {
    for n in node.ancestors() {
        if !n.is_element() {
            continue;
        }
        if let Some(value) = n.borrow_element().attribute(name) {
            return Some((value, n.clone()));
        }
    }
    None
}

/// A parsed XML document: the synthetic document node and its tree.
pub struct Document {
    root: Node,
}

impl Document {
    /// Wraps a document node.  `root` must be a `NodeData::Root`.
    pub(crate) fn new(root: Node) -> Document {
        debug_assert!(matches!(*root.borrow(), NodeData::Root));
        Document { root }
    }

    /// The synthetic document node.
    pub fn root(&self) -> Node {
        self.root.clone()
    }

    /// The document element.
    pub fn document_element(&self) -> Option<Node> {
        self.root.children().find(|c| c.is_element())
    }

    /// All elements, in document order.
    pub fn elements(&self) -> impl Iterator<Item = Node> {
        self.root.descendants().filter(|n| n.is_element())
    }

    /// Finds all elements with the given `xml:id`, in document order.
    pub fn elements_with_id(&self, id: &str) -> Vec<Node> {
        self.elements()
            .filter(|n| {
                n.borrow_element()
                    .attribute(crate::xml::xml_name!("id"))
                    .as_deref()
                    == Some(id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml;

    #[test]
    fn inherited_attribute_finds_nearest() {
        let doc = xml::parse_document(
            "<a xml:base='outer/'><b xml:base='inner/'><c/></b><d/></a>",
            None,
        )
        .unwrap();

        let c = doc
            .elements()
            .find(|n| &*n.borrow_element().name().local == "c")
            .unwrap();
        let d = doc
            .elements()
            .find(|n| &*n.borrow_element().name().local == "d")
            .unwrap();

        let (value, owner) = inherited_attribute(&c, xml::xml_name!("base")).unwrap();
        assert_eq!(value, "inner/");
        assert_eq!(&*owner.borrow_element().name().local, "b");

        let (value, _) = inherited_attribute(&d, xml::xml_name!("base")).unwrap();
        assert_eq!(value, "outer/");

        assert!(inherited_attribute(&c, xml::xml_name!("lang")).is_none());
    }

    #[test]
    fn elements_with_id_spans_whole_document() {
        let doc = xml::parse_document(
            "<a><b xml:id='x'/><c><d xml:id='x'/><e xml:id='y'/></c></a>",
            None,
        )
        .unwrap();

        assert_eq!(doc.elements_with_id("x").len(), 2);
        assert_eq!(doc.elements_with_id("y").len(), 1);
        assert!(doc.elements_with_id("z").is_empty());
    }
}
