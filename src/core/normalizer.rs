/*
 * Pre-edit formatting pass. Disguised connection-url/security comments are
 * rewritten into canonical block comments, adjacent comments get separated
 * by a clean line break, and live candidate elements get their internal
 * indentation straightened. All of it is best-effort formatting; payloads
 * that do not parse are left exactly as found.
 */
use crate::core::comment_codec::{
    block_comment_text, reindent_element, try_parse_comment_as_element,
};
use crate::core::indent::get_indent;
use crate::core::xml_tree::{Document, Element, XmlNode};

const CANDIDATE_LOCAL_NAMES: [&str; 2] = ["connection-url", "security"];

/// Canonicalizes the formatting of every candidate fragment in the
/// document. Runs the comment rewrite up to twice because fixing one
/// comment can change the whitespace context its neighbor is inferred
/// from; stops early once a pass changes nothing.
pub fn normalize(document: &mut Document) {
    log::trace!("Normalizer: normalizing document structure");
    for _ in 0..2 {
        if !rewrite_candidate_comments(&mut document.root) {
            break;
        }
    }
    separate_adjacent_comments(&mut document.root);
    reindent_live_candidates(&mut document.root);
}

fn is_candidate_local(local: &str) -> bool {
    CANDIDATE_LOCAL_NAMES.contains(&local)
}

// Pass 1: every comment that decodes to a candidate element is rewritten
// into block form, payload indented one unit past the comment markers.
fn rewrite_candidate_comments(parent: &mut Element) -> bool {
    let mut changed = false;
    for idx in 0..parent.children.len() {
        let rebuilt = match &parent.children[idx] {
            XmlNode::Comment(comment) => try_parse_comment_as_element(comment)
                .filter(|el| is_candidate_local(el.local_name()))
                .map(|el| block_comment_text(parent, idx, el)),
            XmlNode::Element(_) => None,
        };
        match rebuilt {
            Some(text) => {
                if let XmlNode::Comment(comment) = &mut parent.children[idx] {
                    if comment.text != text {
                        comment.text = text;
                        changed = true;
                    }
                }
            }
            None => {
                if let XmlNode::Element(child) = &mut parent.children[idx] {
                    changed |= rewrite_candidate_comments(child);
                }
            }
        }
    }
    changed
}

// Pass 2: immediately adjacent comment siblings must not visually merge;
// the first one's tail has to end in a newline plus the second one's
// inferred indent.
fn separate_adjacent_comments(parent: &mut Element) {
    for idx in 0..parent.children.len() {
        if idx + 1 < parent.children.len()
            && parent.children[idx].as_comment().is_some()
            && parent.children[idx + 1].as_comment().is_some()
        {
            let (own, _) = get_indent(Some(&*parent), idx + 1);
            let separator = format!("\n{own}");
            let tail = parent.children[idx].tail_mut();
            if !tail.as_deref().is_some_and(|t| t.ends_with(&separator)) {
                *tail = Some(separator);
            }
        }
        if let XmlNode::Element(child) = &mut parent.children[idx] {
            separate_adjacent_comments(child);
        }
    }
}

// Pass 3: live candidate elements get their interior rebuilt the same way
// re-activation would build it. A tail with no newline at all is repaired
// too, so a candidate jammed against its next sibling gets its own line.
fn reindent_live_candidates(parent: &mut Element) {
    for idx in 0..parent.children.len() {
        let is_candidate = matches!(
            parent.children[idx].as_element(),
            Some(el) if is_candidate_local(el.local_name())
        );
        if is_candidate {
            let (own, child_indent) = get_indent(Some(&*parent), idx);
            let unit = child_indent[own.len()..].to_string();
            if let XmlNode::Element(el) = &mut parent.children[idx] {
                reindent_element(el, &own, &unit);
                if !el.tail.as_deref().is_some_and(|t| t.contains('\n')) {
                    el.tail = Some(format!("\n{own}"));
                }
            }
        }
        if let XmlNode::Element(child) = &mut parent.children[idx] {
            reindent_live_candidates(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::xml_tree::Document;

    const INLINE_COMMENTS: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<datasources>\n    <datasource>\n        <driver>h2</driver>\n        <connection-url>jdbc:c</connection-url>\n        <!--<connection-url>jdbc:a</connection-url>-->\n    </datasource>\n</datasources>\n";

    fn datasource(doc: &Document) -> &Element {
        doc.root.children[0].as_element().unwrap()
    }

    #[test]
    fn test_candidate_comment_becomes_block_form() {
        let mut doc = Document::parse_str(INLINE_COMMENTS).unwrap();
        normalize(&mut doc);
        let comment = datasource(&doc).children[2].as_comment().unwrap();
        assert_eq!(
            comment.text,
            "\n                <connection-url>jdbc:a</connection-url>\n        "
        );
        // The comment's own tail is untouched.
        assert_eq!(comment.tail.as_deref(), Some("\n    "));
    }

    #[test]
    fn test_commented_security_block_is_pretty_printed() {
        let input = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<datasources>\n    <datasource>\n        <driver>h2</driver>\n        <!--<security><user-name>admin</user-name></security>-->\n    </datasource>\n</datasources>\n";
        let mut doc = Document::parse_str(input).unwrap();
        normalize(&mut doc);
        let comment = datasource(&doc).children[1].as_comment().unwrap();
        assert_eq!(
            comment.text,
            "\n                <security>\n                        <user-name>admin</user-name>\n                </security>\n        "
        );
    }

    #[test]
    fn test_unrelated_comments_are_left_alone() {
        let input = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<datasources>\n    <datasource>\n        <!-- tuned 2021, do not touch -->\n        <!--<driver>h2</driver>-->\n        <connection-url>jdbc:c</connection-url>\n    </datasource>\n</datasources>\n";
        let mut doc = Document::parse_str(input).unwrap();
        normalize(&mut doc);
        let ds = datasource(&doc);
        assert_eq!(
            ds.children[0].as_comment().unwrap().text,
            " tuned 2021, do not touch "
        );
        assert_eq!(ds.children[1].as_comment().unwrap().text, "<driver>h2</driver>");
    }

    #[test]
    fn test_adjacent_comments_get_separated() {
        let input = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<datasources>\n    <datasource>\n        <!--<connection-url>jdbc:a</connection-url>--><!--<connection-url>jdbc:b</connection-url>-->\n    </datasource>\n</datasources>\n";
        let mut doc = Document::parse_str(input).unwrap();
        normalize(&mut doc);
        let ds = datasource(&doc);
        let first_tail = ds.children[0].tail().unwrap();
        assert!(first_tail.starts_with('\n'));
        assert!(first_tail.ends_with("    "));
    }

    #[test]
    fn test_live_security_interior_is_reindented() {
        let input = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<datasources>\n    <datasource>\n        <driver>h2</driver>\n        <security><user-name>admin</user-name><password>x</password></security>\n    </datasource>\n</datasources>\n";
        let mut doc = Document::parse_str(input).unwrap();
        normalize(&mut doc);
        let security = datasource(&doc).children[1].as_element().unwrap();
        assert_eq!(security.text.as_deref(), Some("\n                "));
        assert_eq!(security.children[0].tail(), Some("\n                "));
        assert_eq!(security.children[1].tail(), Some("\n        "));
    }

    #[test]
    fn test_mixed_content_in_live_candidate_is_kept() {
        let input = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<datasources>\n    <datasource>\n        <driver>h2</driver>\n        <security>note before<user-name>admin</user-name>note after</security>\n    </datasource>\n</datasources>\n";
        let mut doc = Document::parse_str(input).unwrap();
        normalize(&mut doc);
        let security = datasource(&doc).children[1].as_element().unwrap();
        assert_eq!(security.text.as_deref(), Some("note before"));
        assert_eq!(security.children[0].tail(), Some("note after"));
    }

    #[test]
    fn test_normalize_is_stable_on_second_run() {
        let inputs = [
            INLINE_COMMENTS,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<datasources>\n    <datasource>\n        <!--<connection-url>jdbc:a</connection-url>--><!--<connection-url>jdbc:b</connection-url>-->\n        <security><user-name>admin</user-name></security>\n    </datasource>\n</datasources>\n",
        ];
        for input in inputs {
            let mut doc = Document::parse_str(input).unwrap();
            normalize(&mut doc);
            let first = doc.to_xml_string();
            normalize(&mut doc);
            assert_eq!(doc.to_xml_string(), first);
        }
    }
}
