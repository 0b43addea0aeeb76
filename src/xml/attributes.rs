//! Store XML element attributes and their values.

use std::slice;

use markup5ever::{ExpandedName, QualName};

/// Ordered collection of an element's attributes.
///
/// Attributes keep document order, which matters for serialisation: the
/// output should list attributes the way the input did.  Lookups compare
/// expanded names (namespace + local name), so the prefix an attribute
/// happened to use in its source document is irrelevant for matching but is
/// preserved for output.
///
/// Unlike element names, attribute values get rewritten throughout the
/// transclusion pipeline (`xml:id` fixup, reference repair, cleanup), so the
/// storage is a plain growable vector.
#[derive(Clone, Default)]
pub struct Attributes {
    attrs: Vec<(QualName, String)>,
}

/// Iterator from `Attributes::iter`.
pub struct AttributesIter<'a>(slice::Iter<'a, (QualName, String)>);

impl Attributes {
    pub fn new() -> Attributes {
        Attributes { attrs: Vec::new() }
    }

    /// Returns the number of attributes.
    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Creates an iterator that yields `(&QualName, &str)` tuples in
    /// document order.
    pub fn iter(&self) -> AttributesIter<'_> {
        AttributesIter(self.attrs.iter())
    }

    /// Looks up an attribute value by expanded name.
    pub fn get(&self, name: ExpandedName<'_>) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n.expanded() == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns whether an attribute with this expanded name is present.
    pub fn contains(&self, name: ExpandedName<'_>) -> bool {
        self.get(name).is_some()
    }

    /// Sets an attribute value, replacing an existing one with the same
    /// expanded name.
    ///
    /// On replacement the original qualified name (and therefore its prefix)
    /// is kept; on insertion the attribute is appended.
    pub fn set(&mut self, name: QualName, value: &str) {
        match self
            .attrs
            .iter_mut()
            .find(|(n, _)| n.expanded() == name.expanded())
        {
            Some((_, v)) => *v = value.to_string(),
            None => self.attrs.push((name, value.to_string())),
        }
    }

    /// Removes an attribute by expanded name, returning its value.
    pub fn remove(&mut self, name: ExpandedName<'_>) -> Option<String> {
        let idx = self.attrs.iter().position(|(n, _)| n.expanded() == name)?;
        Some(self.attrs.remove(idx).1)
    }

    /// Removes every attribute whose namespace URI equals `ns`.
    pub fn remove_namespace(&mut self, ns: &str) {
        self.attrs.retain(|(n, _)| &*n.ns != ns);
    }

    /// Appends an attribute without checking for duplicates.
    ///
    /// Only the parser uses this; it has already verified that expanded
    /// names are unique within the element.
    pub(crate) fn push(&mut self, name: QualName, value: String) {
        self.attrs.push((name, value));
    }
}

impl<'a> Iterator for AttributesIter<'a> {
    type Item = (&'a QualName, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|(n, v)| (n, v.as_str()))
    }
}
