/*
 * Conversions between live elements and comment payloads. Disabling an
 * element serializes it into a comment at the same child index; enabling
 * parses the payload back and rebuilds the indentation the flattened form
 * lost. `replace_child_at` is the one structural primitive both directions
 * (and the activation engine) share.
 */
use crate::core::indent::get_indent;
use crate::core::xml_tree::{Comment, Element, XmlNode};

/// Swaps the node at `index` for `node`, returning the old node. Child
/// order and the indices of all other siblings are unaffected.
pub fn replace_child_at(parent: &mut Element, index: usize, node: XmlNode) -> XmlNode {
    std::mem::replace(&mut parent.children[index], node)
}

/// Serializes the element at `index` into a block comment in place. The
/// payload is the element's textual form indented one level past the
/// comment markers, so a disabled fragment reads like the live one did.
/// The element's tail moves onto the comment so the following sibling
/// keeps its visual alignment.
pub fn element_to_comment(parent: &mut Element, index: usize) {
    let payload = match parent.children[index].as_element() {
        Some(el) => {
            let mut copy = el.clone();
            copy.tail = None;
            block_comment_text(parent, index, copy)
        }
        None => return,
    };
    let tail = parent.children[index].tail_mut().take();
    let mut comment = Comment::new(&payload);
    comment.tail = tail;
    replace_child_at(parent, index, XmlNode::Comment(comment));
    log::trace!("CommentCodec: disabled element at child index {index}");
}

/// The canonical comment payload for `element` sitting at `index` under
/// `parent`: a newline, the fragment indented one level past the comment
/// markers, and a closing newline that puts `-->` at the sibling column.
pub fn block_comment_text(parent: &Element, index: usize, mut element: Element) -> String {
    let (own, child_indent) = get_indent(Some(parent), index);
    let unit = child_indent[own.len()..].to_string();
    reindent_element(&mut element, &child_indent, &unit);
    format!("\n{child_indent}{}\n{own}", element.to_fragment_string())
}

/// Attempts to read a comment payload as one XML element. `None` means the
/// comment is not a disguised element, which is a normal outcome rather
/// than an error.
pub fn try_parse_comment_as_element(comment: &Comment) -> Option<Element> {
    let trimmed = comment.text.trim();
    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        if let Ok(element) = Element::parse_fragment(trimmed) {
            return Some(element);
        }
    }
    // Fallback for payloads with prose around the markup: take the span
    // from the first '<' to the last '>'.
    let start = comment.text.find('<')?;
    let end = comment.text.rfind('>')?;
    if start >= end {
        return None;
    }
    Element::parse_fragment(&comment.text[start..=end]).ok()
}

/// Replaces the comment at `index` with `element`, keeping the comment's
/// tail and re-deriving the element's internal indentation from context.
/// A single-line payload becomes a proper block when the element has
/// children.
pub fn replace_comment_with_element(parent: &mut Element, index: usize, mut element: Element) {
    let (own, child_indent) = get_indent(Some(&*parent), index);
    let unit = child_indent[own.len()..].to_string();
    reindent_element(&mut element, &own, &unit);
    element.tail = parent.children[index].tail_mut().take();
    replace_child_at(parent, index, XmlNode::Element(element));
    log::trace!("CommentCodec: enabled element at child index {index}");
}

/// Rewrites the internal whitespace of `element` so its children sit one
/// `unit` below `own`, recursively. Childless elements keep their text
/// untouched, and so does any slot holding non-whitespace character data;
/// only missing or whitespace-only slots are rebuilt.
pub fn reindent_element(element: &mut Element, own: &str, unit: &str) {
    if element.children.is_empty() {
        return;
    }
    let inner = format!("{own}{unit}");
    if whitespace_only(element.text.as_deref()) {
        element.text = Some(format!("\n{inner}"));
    }
    let last = element.children.len() - 1;
    for (i, child) in element.children.iter_mut().enumerate() {
        if let XmlNode::Element(el) = child {
            reindent_element(el, &inner, unit);
        }
        if whitespace_only(child.tail()) {
            let tail = if i == last {
                format!("\n{own}")
            } else {
                format!("\n{inner}")
            };
            child.set_tail(Some(tail));
        }
    }
}

fn whitespace_only(slot: Option<&str>) -> bool {
    slot.map_or(true, |text| text.trim().is_empty())
}
