/*
 * Indentation inference for edits that rebuild whitespace. Everything here
 * is a pure function over the tree: the editing passes derive their indent
 * strings first and mutate afterwards, which keeps these heuristics
 * unit-testable against whitespace fixtures on their own.
 */
use crate::core::xml_tree::Element;

pub const DEFAULT_INDENT_WIDTH: usize = 4;

/// Prevailing indentation width under `parent`. Samples the trailing
/// whitespace of each child in order, then the parent's own leading text,
/// and returns the length of the first newline-plus-horizontal-whitespace
/// run found, a tab counting as four spaces. Defaults to 4 when nothing is
/// informative.
pub fn detect_indent_width(parent: &Element) -> usize {
    for child in &parent.children {
        if let Some(width) = first_indent_run_width(child.tail()) {
            return width;
        }
    }
    if let Some(width) = first_indent_run_width(parent.text.as_deref()) {
        return width;
    }
    DEFAULT_INDENT_WIDTH
}

/// Indent strings for the child of `parent` at `index`: the whitespace that
/// should precede the node itself, and the whitespace for its children.
/// `index` may be one past the end to describe a yet-to-be-inserted child.
/// Passing `None` addresses the root element, which sits in column zero.
/// Never fails; malformed surroundings fall back to detected-width spaces.
pub fn get_indent(parent: Option<&Element>, index: usize) -> (String, String) {
    let parent = match parent {
        Some(p) => p,
        None => return (String::new(), " ".repeat(DEFAULT_INDENT_WIDTH)),
    };
    let width = detect_indent_width(parent);
    let preceding = if index == 0 {
        parent.text.as_deref()
    } else {
        parent.children.get(index - 1).and_then(|c| c.tail())
    };
    let own = preceding
        .and_then(indent_after_last_newline)
        .unwrap_or_else(|| " ".repeat(width));
    let child = format!("{own}{}", " ".repeat(width));
    (own, child)
}

// First newline followed by at least one space or tab; returns the run's
// width or None when the sample has no such run.
fn first_indent_run_width(sample: Option<&str>) -> Option<usize> {
    let sample = sample?;
    let mut after_newline = false;
    let mut width = 0usize;
    for ch in sample.chars() {
        match ch {
            '\n' => {
                if after_newline && width > 0 {
                    return Some(width);
                }
                after_newline = true;
                width = 0;
            }
            ' ' if after_newline => width += 1,
            '\t' if after_newline => width += 4,
            _ => {
                if after_newline && width > 0 {
                    return Some(width);
                }
                after_newline = false;
                width = 0;
            }
        }
    }
    if after_newline && width > 0 { Some(width) } else { None }
}

// The run after the sample's last newline, accepted only when it is pure
// horizontal whitespace (an empty run means column zero and is fine).
fn indent_after_last_newline(sample: &str) -> Option<String> {
    let idx = sample.rfind('\n')?;
    let run = &sample[idx + 1..];
    if run.chars().all(|c| c == ' ' || c == '\t') {
        Some(run.to_string())
    } else {
        None
    }
}
