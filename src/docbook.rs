//! DocBook transclusion: rewrite IDs and repair references after expansion.
//!
//! The DocBook transclusion attributes (`trans:idfixup`, `trans:suffix`,
//! `trans:linkscope`) govern how `xml:id`s inside an included subtree are
//! renamed so the merged document stays internally consistent, and how
//! IDREF attributes pointing at them are rewritten afterwards.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use itertools::Itertools;
use markup5ever::QualName;

use crate::error::TransclusionError;
use crate::node::{inherited_attribute, Document, Node, NodeBorrow};
use crate::session::Session;
use crate::xinclude;
use crate::xml::{dbxi_name, qual_name, trans_name, xml_name, DB_NS, DBXI_NS, TRANS_NS, XML_NS};

/// Attributes on DocBook elements whose value is one `xml:id` reference.
const IDREF_ATTRIBUTES: [&str; 8] = [
    "linkend",
    "linkends",
    "otherterm",
    "zone",
    "startref",
    "arearefs",
    "targetptr",
    "endterm",
];

/// The subset holding whitespace-separated lists of references.
const IDREF_ATTRIBUTES_MULTI: [&str; 3] = ["arearefs", "linkends", "zone"];

/// Runs the full pipeline on a parsed document:
/// XInclude expansion, ID assignment, reference repair, cleanup.
pub fn process_tree(
    document: &Document,
    base_url: Option<&str>,
    catalog: Option<&str>,
    file: Option<&str>,
    session: &Session,
) -> Result<(), TransclusionError> {
    xinclude::process_tree(document, base_url, catalog, file, session)?;

    // First pass: compute the new ID of every element in a fixup region.
    // Outer regions come first in document order, so nested regions build
    // on the outer region's result.
    for node in document.elements() {
        if node
            .borrow_element()
            .has_attribute(trans_name!("idfixup"))
        {
            assign_new_ids(&node, file)?;
        }
    }

    // Second pass: point references at the new IDs.
    repair_references(document, file)?;

    // Third pass: promote dbxi:newid to xml:id and strip the transclusion
    // machinery from the output.
    cleanup(document);

    Ok(())
}

/// Assigns every `xml:id`-bearing element of the subtree its new ID as a
/// `dbxi:newid` attribute.  `xml:id` itself is untouched until cleanup, so
/// reference repair can still search by the old IDs.
fn assign_new_ids(subtree: &Node, file: Option<&str>) -> Result<(), TransclusionError> {
    let (idfixup, line) = {
        let e = subtree.borrow_element();
        (
            e.attribute(trans_name!("idfixup"))
                .unwrap_or_else(|| "none".to_string()),
            e.sourceline(),
        )
    };
    if idfixup == "none" {
        return Ok(());
    }

    let err_file = file.unwrap_or("").to_string();

    let suffix = match idfixup.as_str() {
        "suffix" => {
            let suffix = inherited_attribute(subtree, trans_name!("suffix"))
                .map(|(value, _)| value)
                .ok_or(TransclusionError::MissingSuffix {
                    file: err_file.clone(),
                    line,
                })?;
            Some(suffix)
        }
        "auto" => None,
        _ => {
            return Err(TransclusionError::BadIdfixup {
                value: idfixup,
                file: err_file,
                line,
            })
        }
    };

    for elem in subtree.descendants().filter(|n| n.is_element()) {
        let e = elem.borrow_element();
        let cur_id = match e.attribute(xml_name!("id")) {
            Some(id) => id,
            None => continue,
        };

        let mut new = e.attribute(dbxi_name!("newid")).unwrap_or(cur_id);
        match &suffix {
            Some(suffix) => new.push_str(suffix),
            None => {
                new.push_str("--");
                new.push_str(&generate_id(&elem));
            }
        }

        e.set_attribute(qual_name(Some("dbxi"), DBXI_NS, "newid"), &new);
    }

    Ok(())
}

/// Generates a per-document unique token for an element.
///
/// The token is the URL-safe Base64 of the element's root path, with the
/// `=` padding replaced by `-` so the result stays a valid ID.  Two
/// elements of one document always have different root paths, which is all
/// the uniqueness `idfixup="auto"` needs.
pub fn generate_id(elem: &Node) -> String {
    URL_SAFE.encode(root_path(elem)).replace('=', "-")
}

/// The XPath-like path of an element from the document element down, with
/// namespaces spelled out and 1-based positions where siblings share a name.
fn root_path(elem: &Node) -> String {
    let mut segments = Vec::new();
    let mut current = elem.clone();

    loop {
        let mut segment = {
            let e = current.borrow_element();
            let name = e.name();
            if name.ns.is_empty() {
                name.local.to_string()
            } else {
                format!("{{{}}}{}", name.ns, name.local)
            }
        };

        let parent = current.parent();
        if let Some(ref parent) = parent {
            let same_name: Vec<Node> = parent
                .children()
                .filter(|c| {
                    c.is_element()
                        && c.borrow_element().name().expanded()
                            == current.borrow_element().name().expanded()
                })
                .collect();
            if same_name.len() > 1 {
                let position = same_name.iter().position(|n| *n == current).unwrap_or(0) + 1;
                segment.push_str(&format!("[{position}]"));
            }
        }

        segments.push(segment);

        match parent {
            Some(parent) if parent.is_element() => current = parent,
            _ => break,
        }
    }

    segments.reverse();
    format!("/{}", segments.join("/"))
}

/// Rewrites the IDREF attributes of every DocBook element that sits in a
/// fixup region, resolving each reference within its `trans:linkscope`.
fn repair_references(document: &Document, file: Option<&str>) -> Result<(), TransclusionError> {
    let err_file = file.unwrap_or("");

    for elem in document.elements() {
        if &*elem.borrow_element().name().ns != DB_NS {
            continue;
        }

        let idfixup = inherited_attribute(&elem, trans_name!("idfixup"))
            .map(|(value, _)| value)
            .unwrap_or_else(|| "none".to_string());
        if idfixup == "none" {
            continue;
        }

        let linkscope = inherited_attribute(&elem, trans_name!("linkscope"))
            .map(|(value, _)| value)
            .unwrap_or_else(|| "near".to_string());
        if linkscope == "user" {
            // The document takes care of its references itself.
            continue;
        }

        let line = elem.borrow_element().sourceline();
        if !matches!(linkscope.as_str(), "local" | "near" | "global") {
            return Err(TransclusionError::BadLinkscope {
                value: linkscope,
                file: err_file.to_string(),
                line,
            });
        }

        let idref_attrs: Vec<(QualName, String)> = {
            let e = elem.borrow_element();
            let attrs = e.attributes();
            attrs
                .iter()
                .filter(|(name, _)| {
                    name.ns.is_empty() && IDREF_ATTRIBUTES.iter().any(|a| *a == &*name.local)
                })
                .map(|(name, value)| (name.clone(), value.to_string()))
                .collect()
        };

        for (name, value) in idref_attrs {
            let multi = IDREF_ATTRIBUTES_MULTI.iter().any(|a| *a == &*name.local);

            let new_value = if multi {
                value
                    .split_whitespace()
                    .map(|token| resolve_reference(document, &elem, token, &linkscope, err_file, line))
                    .collect::<Result<Vec<String>, TransclusionError>>()?
                    .iter()
                    .join(" ")
            } else {
                resolve_reference(document, &elem, &value, &linkscope, err_file, line)?
            };

            elem.borrow_element().set_attribute(name, &new_value);
        }
    }

    Ok(())
}

fn resolve_reference(
    document: &Document,
    elem: &Node,
    token: &str,
    linkscope: &str,
    file: &str,
    line: usize,
) -> Result<String, TransclusionError> {
    let target = find_target(document, elem, token, linkscope).ok_or_else(|| {
        TransclusionError::UnresolvedReference {
            reference: token.to_string(),
            file: file.to_string(),
            line,
        }
    })?;

    let e = target.borrow_element();
    let new = match e.attribute(dbxi_name!("newid")) {
        Some(newid) if !newid.is_empty() => newid,
        _ => e.attribute(xml_name!("id")).unwrap_or_default(),
    };
    Ok(new)
}

/// Resolves one reference starting from `elem` within the given linkscope.
fn find_target(document: &Document, elem: &Node, value: &str, linkscope: &str) -> Option<Node> {
    match linkscope {
        // Only direct children of the element governing the fixup region.
        "local" => {
            let (_, scope_root) = inherited_attribute(elem, trans_name!("idfixup"))?;
            child_with_id(&scope_root, value)
        }

        // Ascend the ancestors; at each level, look at direct children
        // only, nearest level wins.
        "near" => elem
            .ancestors()
            .skip(1)
            .filter(|a| a.is_element())
            .find_map(|ancestor| child_with_id(&ancestor, value)),

        // Anywhere in the merged document, first match in document order.
        "global" => document.elements_with_id(value).into_iter().next(),

        _ => None,
    }
}

fn child_with_id(parent: &Node, id: &str) -> Option<Node> {
    parent.children().find(|c| {
        c.is_element() && c.borrow_element().attribute(xml_name!("id")).as_deref() == Some(id)
    })
}

/// Moves every `dbxi:newid` to `xml:id` and removes all attributes in the
/// transclusion and internal namespaces.
fn cleanup(document: &Document) {
    for elem in document.elements() {
        let e = elem.borrow_element();

        if let Some(newid) = e.attribute(dbxi_name!("newid")) {
            if !newid.is_empty() {
                e.set_attribute(qual_name(Some("xml"), XML_NS, "id"), &newid);
            }
        }

        e.remove_attributes_in_namespace(TRANS_NS);
        e.remove_attributes_in_namespace(DBXI_NS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{self, no_ns_name};

    fn element(doc: &Document, local: &str) -> Node {
        doc.elements()
            .find(|n| &*n.borrow_element().name().local == local)
            .unwrap()
    }

    #[test]
    fn generate_id_is_deterministic_and_unique() {
        let doc = xml::parse_document("<a><b/><b><c/></b><d><c/></d></a>", None).unwrap();

        let ids: Vec<String> = doc.elements().map(|n| generate_id(&n)).collect();
        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(ids.len(), deduped.len(), "IDs must be unique: {ids:?}");

        let again: Vec<String> = doc.elements().map(|n| generate_id(&n)).collect();
        assert_eq!(ids, again);

        // URL-safe alphabet with the padding replaced.
        for id in &ids {
            assert!(id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }

    #[test]
    fn root_path_counts_same_name_siblings_only() {
        let doc = xml::parse_document("<a><b/><b/><c/></a>", None).unwrap();

        let paths: Vec<String> = doc.elements().map(|n| root_path(&n)).collect();
        assert_eq!(paths, vec!["/a", "/a/b[1]", "/a/b[2]", "/a/c"]);
    }

    #[test]
    fn suffix_fixup_appends_to_all_ids_in_the_subtree() {
        let doc = xml::parse_document(
            "<sect xmlns:trans='http://docbook.org/ns/transclude' \
                   trans:idfixup='suffix' trans:suffix='-x' xml:id='s'>\
               <p xml:id='p1'/><p/>\
             </sect>",
            None,
        )
        .unwrap();

        assign_new_ids(&doc.document_element().unwrap(), None).unwrap();

        let sect = element(&doc, "sect");
        let p1 = element(&doc, "p");
        assert_eq!(
            sect.borrow_element().attribute(dbxi_name!("newid")).as_deref(),
            Some("s-x")
        );
        assert_eq!(
            p1.borrow_element().attribute(dbxi_name!("newid")).as_deref(),
            Some("p1-x")
        );
    }

    #[test]
    fn missing_suffix_is_an_error() {
        let doc = xml::parse_document(
            "<sect xmlns:trans='http://docbook.org/ns/transclude' \
                   trans:idfixup='suffix' xml:id='s'/>",
            None,
        )
        .unwrap();

        assert!(matches!(
            assign_new_ids(&doc.document_element().unwrap(), None),
            Err(TransclusionError::MissingSuffix { .. })
        ));
    }

    #[test]
    fn unknown_idfixup_is_an_error() {
        let doc = xml::parse_document(
            "<sect xmlns:trans='http://docbook.org/ns/transclude' \
                   trans:idfixup='frobnicate' xml:id='s'/>",
            None,
        )
        .unwrap();

        assert!(matches!(
            assign_new_ids(&doc.document_element().unwrap(), None),
            Err(TransclusionError::BadIdfixup { .. })
        ));
    }

    #[test]
    fn nested_fixup_regions_compose() {
        let doc = xml::parse_document(
            "<outer xmlns:trans='http://docbook.org/ns/transclude' \
                    trans:idfixup='suffix' trans:suffix='-a'>\
               <inner trans:idfixup='suffix' trans:suffix='-b' xml:id='i'/>\
             </outer>",
            None,
        )
        .unwrap();

        for node in doc.elements() {
            if node.borrow_element().has_attribute(trans_name!("idfixup")) {
                assign_new_ids(&node, None).unwrap();
            }
        }

        let inner = element(&doc, "inner");
        assert_eq!(
            inner
                .borrow_element()
                .attribute(dbxi_name!("newid"))
                .as_deref(),
            Some("i-a-b")
        );
    }

    #[test]
    fn cleanup_strips_the_machinery() {
        let doc = xml::parse_document(
            "<sect xmlns:trans='http://docbook.org/ns/transclude' \
                   xmlns:dbxi='dbxincluder' \
                   trans:idfixup='suffix' trans:suffix='-x' \
                   dbxi:newid='s-x' dbxi:parentline='3' xml:id='s'/>",
            None,
        )
        .unwrap();

        cleanup(&doc);

        let sect = element(&doc, "sect");
        let e = sect.borrow_element();
        assert_eq!(e.attribute(xml_name!("id")).as_deref(), Some("s-x"));
        assert!(!e.has_attribute(dbxi_name!("newid")));
        assert!(!e.has_attribute(dbxi_name!("parentline")));
        assert!(!e.has_attribute(trans_name!("idfixup")));
        assert!(!e.has_attribute(trans_name!("suffix")));
    }

    #[test]
    fn near_linkscope_searches_direct_children_of_ancestors() {
        let doc = xml::parse_document(
            "<db:book xmlns:db='http://docbook.org/ns/docbook' \
                      xmlns:trans='http://docbook.org/ns/transclude'>\
               <db:chapter trans:idfixup='none'>\
                 <db:section xml:id='target'>\
                   <db:para><db:xref linkend='x'/></db:para>\
                 </db:section>\
                 <db:section xml:id='x'/>\
               </db:chapter>\
             </db:book>",
            None,
        )
        .unwrap();

        let xref = element(&doc, "xref");
        // Nothing at the para or section level; found among the chapter's
        // children.
        let target = find_target(&doc, &xref, "x", "near").unwrap();
        assert_eq!(
            target.borrow_element().attribute(xml_name!("id")).as_deref(),
            Some("x")
        );
        // Grandchildren of an ancestor are not searched.
        assert!(find_target(&doc, &xref, "nowhere", "near").is_none());
    }

    #[test]
    fn local_linkscope_searches_the_fixup_region_root() {
        let doc = xml::parse_document(
            "<db:book xmlns:db='http://docbook.org/ns/docbook' \
                      xmlns:trans='http://docbook.org/ns/transclude'>\
               <db:chapter trans:idfixup='suffix' trans:suffix='-s'>\
                 <db:section xml:id='s1'>\
                   <db:para><db:xref linkend='s2'/></db:para>\
                 </db:section>\
                 <db:section xml:id='s2'/>\
               </db:chapter>\
             </db:book>",
            None,
        )
        .unwrap();

        let xref = element(&doc, "xref");
        let target = find_target(&doc, &xref, "s2", "local").unwrap();
        assert_eq!(
            target.borrow_element().attribute(xml_name!("id")).as_deref(),
            Some("s2")
        );
        // "local" does not descend; s1's para is not a direct child of the
        // region root.
        assert!(find_target(&doc, &xref, "deep", "local").is_none());
    }

    #[test]
    fn multi_valued_idrefs_are_rewritten_token_by_token() {
        let doc = xml::parse_document(
            "<db:book xmlns:db='http://docbook.org/ns/docbook' \
                      xmlns:trans='http://docbook.org/ns/transclude' \
                      trans:idfixup='suffix' trans:suffix='-z' \
                      xmlns:dbxi='dbxincluder'>\
               <db:glosssee linkends='a  b'/>\
               <db:x xml:id='a' dbxi:newid='a-z'/>\
               <db:y xml:id='b' dbxi:newid='b-z'/>\
             </db:book>",
            None,
        )
        .unwrap();

        repair_references(&doc, None).unwrap();

        let see = element(&doc, "glosssee");
        assert_eq!(
            see.borrow_element()
                .attribute(no_ns_name!("linkends"))
                .as_deref(),
            Some("a-z b-z"),
            "tokens are resolved independently and rejoined with single spaces"
        );
    }

    #[test]
    fn unresolved_references_are_fatal() {
        let doc = xml::parse_document(
            "<db:book xmlns:db='http://docbook.org/ns/docbook' \
                      xmlns:trans='http://docbook.org/ns/transclude' \
                      trans:idfixup='suffix' trans:suffix='-z'>\
               <db:xref linkend='missing'/>\
             </db:book>",
            None,
        )
        .unwrap();

        assert!(matches!(
            repair_references(&doc, None),
            Err(TransclusionError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn user_linkscope_and_plain_regions_are_left_alone() {
        let doc = xml::parse_document(
            "<db:book xmlns:db='http://docbook.org/ns/docbook' \
                      xmlns:trans='http://docbook.org/ns/transclude'>\
               <db:a trans:idfixup='suffix' trans:suffix='-s' trans:linkscope='user'>\
                 <db:xref linkend='nowhere'/>\
               </db:a>\
               <db:b>\
                 <db:xref linkend='elsewhere'/>\
               </db:b>\
             </db:book>",
            None,
        )
        .unwrap();

        // Unresolvable references, but neither region is repaired: the
        // first opts out via linkscope='user', the second has no fixup.
        repair_references(&doc, None).unwrap();
    }

    #[test]
    fn unknown_linkscope_is_an_error() {
        let doc = xml::parse_document(
            "<db:book xmlns:db='http://docbook.org/ns/docbook' \
                      xmlns:trans='http://docbook.org/ns/transclude' \
                      trans:idfixup='suffix' trans:suffix='-z' \
                      trans:linkscope='sideways'>\
               <db:xref linkend='x'/>\
             </db:book>",
            None,
        )
        .unwrap();

        assert!(matches!(
            repair_references(&doc, None),
            Err(TransclusionError::BadLinkscope { .. })
        ));
    }
}
