/*
 * This module defines the XML document tree the rest of the core operates on,
 * together with parsing (via `quick-xml`) and serialization back to text.
 * The tree keeps every whitespace-only text fragment: an element's `text` is
 * the content before its first child and each node's `tail` is the content
 * between the node and its next sibling. Editing operations rely on those
 * fields to reason about, and preserve, the surrounding indentation.
 */
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug)]
pub enum XmlError {
    Io(io::Error),
    Parse(quick_xml::Error),
    NoRootElement,
    ExtraRootElement,
    UnclosedElement,
    UnexpectedClosingTag,
}

impl From<io::Error> for XmlError {
    fn from(err: io::Error) -> Self {
        XmlError::Io(err)
    }
}

impl From<quick_xml::Error> for XmlError {
    fn from(err: quick_xml::Error) -> Self {
        XmlError::Parse(err)
    }
}

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XmlError::Io(e) => write!(f, "XML I/O error: {e}"),
            XmlError::Parse(e) => write!(f, "XML syntax error: {e}"),
            XmlError::NoRootElement => write!(f, "document contains no root element"),
            XmlError::ExtraRootElement => {
                write!(f, "document contains more than one top-level element")
            }
            XmlError::UnclosedElement => {
                write!(f, "document ended before all elements were closed")
            }
            XmlError::UnexpectedClosingTag => {
                write!(f, "closing tag without a matching opening tag")
            }
        }
    }
}

impl std::error::Error for XmlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            XmlError::Io(e) => Some(e),
            XmlError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, XmlError>;

// A node in an element's ordered child list. Only elements and comments are
// materialized as nodes; character data lives in `text`/`tail` fields so that
// replacing a node never disturbs the whitespace around its siblings.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(Element),
    Comment(Comment),
}

impl XmlNode {
    pub fn tail(&self) -> Option<&str> {
        match self {
            XmlNode::Element(el) => el.tail.as_deref(),
            XmlNode::Comment(c) => c.tail.as_deref(),
        }
    }

    pub fn tail_mut(&mut self) -> &mut Option<String> {
        match self {
            XmlNode::Element(el) => &mut el.tail,
            XmlNode::Comment(c) => &mut c.tail,
        }
    }

    pub fn set_tail(&mut self, tail: Option<String>) {
        *self.tail_mut() = tail;
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            XmlNode::Element(el) => Some(el),
            XmlNode::Comment(_) => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            XmlNode::Element(el) => Some(el),
            XmlNode::Comment(_) => None,
        }
    }

    pub fn as_comment(&self) -> Option<&Comment> {
        match self {
            XmlNode::Comment(c) => Some(c),
            XmlNode::Element(_) => None,
        }
    }
}

// An XML element. The tag is stored exactly as written, prefix included;
// namespace prefixes are never resolved, callers match on `local_name()`.
// Attributes keep document order.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    /// Content between the opening tag and the first child.
    pub text: Option<String>,
    /// Content between this element's closing tag and the next sibling.
    pub tail: Option<String>,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Element {
            tag: tag.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
            text: None,
            tail: None,
        }
    }

    /// The tag name with any namespace prefix stripped.
    pub fn local_name(&self) -> &str {
        match self.tag.rfind(':') {
            Some(idx) => &self.tag[idx + 1..],
            None => &self.tag,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First descendant element (depth-first, self excluded) whose local
    /// name matches.
    pub fn find_descendant(&self, local: &str) -> Option<&Element> {
        for child in &self.children {
            if let XmlNode::Element(el) = child {
                if el.local_name() == local {
                    return Some(el);
                }
                if let Some(found) = el.find_descendant(local) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Parses a standalone fragment such as a comment payload. Exactly one
    /// element is expected; surrounding whitespace and stray comments are
    /// tolerated, and the returned element carries no tail.
    pub fn parse_fragment(input: &str) -> Result<Element> {
        let parsed = parse_nodes(input)?;
        let mut found: Option<Element> = None;
        for node in parsed.nodes {
            if let XmlNode::Element(el) = node {
                if found.is_some() {
                    return Err(XmlError::ExtraRootElement);
                }
                found = Some(el);
            }
        }
        let mut element = found.ok_or(XmlError::NoRootElement)?;
        element.tail = None;
        Ok(element)
    }

    /// Serializes this element alone, tail excluded, exactly as stored.
    pub fn to_fragment_string(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out, 0, false);
        out
    }
}

// A comment node. The payload is kept raw, delimiters excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub text: String,
    pub tail: Option<String>,
}

impl Comment {
    pub fn new(text: &str) -> Self {
        Comment {
            text: text.to_string(),
            tail: None,
        }
    }
}

// A parsed document: declaration data, optional DOCTYPE payload, comments
// around the root, and the single root element. Whitespace between top-level
// nodes lives in their tails; the gap after the declaration is always
// rendered as one newline.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub version: Option<String>,
    pub standalone: Option<String>,
    pub doctype: Option<String>,
    pub prolog: Vec<Comment>,
    pub root: Element,
    pub epilog: Vec<Comment>,
}

impl Document {
    pub fn parse_str(input: &str) -> Result<Document> {
        let parsed = parse_nodes(input)?;
        let mut prolog = Vec::new();
        let mut root: Option<Element> = None;
        let mut epilog = Vec::new();
        for node in parsed.nodes {
            match node {
                XmlNode::Element(el) => {
                    if root.is_some() {
                        return Err(XmlError::ExtraRootElement);
                    }
                    root = Some(el);
                }
                XmlNode::Comment(c) => {
                    if root.is_some() {
                        epilog.push(c);
                    } else {
                        prolog.push(c);
                    }
                }
            }
        }
        Ok(Document {
            version: parsed.version,
            standalone: parsed.standalone,
            doctype: parsed.doctype,
            prolog,
            root: root.ok_or(XmlError::NoRootElement)?,
            epilog,
        })
    }

    pub fn parse_file(path: &Path) -> Result<Document> {
        let content = fs::read_to_string(path)?;
        Document::parse_str(&content)
    }

    /// Serializes the whole document. A declaration is always written; the
    /// encoding is fixed to UTF-8. Regions that carry no whitespace of their
    /// own (no text, no child tails) are auto-indented, everything else is
    /// written verbatim.
    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        let version = self.version.as_deref().unwrap_or("1.0");
        out.push_str(&format!("<?xml version=\"{version}\" encoding=\"UTF-8\""));
        if let Some(standalone) = &self.standalone {
            out.push_str(&format!(" standalone=\"{standalone}\""));
        }
        out.push_str("?>\n");
        if let Some(doctype) = &self.doctype {
            out.push_str(&format!("<!DOCTYPE {doctype}>\n"));
        }
        for comment in &self.prolog {
            write_comment(comment, &mut out);
            if let Some(tail) = &comment.tail {
                out.push_str(&escape_text(tail));
            }
        }
        write_element(&self.root, &mut out, 0, true);
        if let Some(tail) = &self.root.tail {
            out.push_str(&escape_text(tail));
        }
        for comment in &self.epilog {
            write_comment(comment, &mut out);
            if let Some(tail) = &comment.tail {
                out.push_str(&escape_text(tail));
            }
        }
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_xml_string())?;
        Ok(())
    }
}

struct ParsedNodes {
    version: Option<String>,
    standalone: Option<String>,
    doctype: Option<String>,
    nodes: Vec<XmlNode>,
}

// Incremental tree assembly over the event stream. Open elements live on the
// stack; finished top-level nodes accumulate in `top`.
struct TreeBuilder {
    stack: Vec<Element>,
    top: Vec<XmlNode>,
}

impl TreeBuilder {
    fn new() -> Self {
        TreeBuilder {
            stack: Vec::new(),
            top: Vec::new(),
        }
    }

    fn append_node(&mut self, node: XmlNode) {
        match self.stack.last_mut() {
            Some(open) => open.children.push(node),
            None => self.top.push(node),
        }
    }

    fn append_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(open) = self.stack.last_mut() {
            if let Some(last) = open.children.last_mut() {
                append_to(last.tail_mut(), text);
            } else {
                append_to(&mut open.text, text);
            }
        } else if let Some(last) = self.top.last_mut() {
            append_to(last.tail_mut(), text);
        }
        // Text before the first top-level node is dropped; the writer emits
        // the declaration newline itself.
    }

    fn start(&mut self, element: Element) {
        self.stack.push(element);
    }

    fn end(&mut self) -> Result<()> {
        let element = self.stack.pop().ok_or(XmlError::UnexpectedClosingTag)?;
        self.append_node(XmlNode::Element(element));
        Ok(())
    }
}

fn append_to(slot: &mut Option<String>, text: &str) {
    match slot {
        Some(existing) => existing.push_str(text),
        None => *slot = Some(text.to_string()),
    }
}

fn element_from_start(start: &BytesStart) -> Result<Element> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(&tag);
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn parse_nodes(input: &str) -> Result<ParsedNodes> {
    let mut reader = Reader::from_str(input);
    let mut builder = TreeBuilder::new();
    let mut version = None;
    let mut standalone = None;
    let mut doctype = None;
    loop {
        match reader.read_event()? {
            Event::Start(start) => builder.start(element_from_start(&start)?),
            Event::End(_) => builder.end()?,
            Event::Empty(start) => {
                builder.append_node(XmlNode::Element(element_from_start(&start)?));
            }
            Event::Text(text) => builder.append_text(&text.unescape()?),
            Event::CData(data) => builder.append_text(&String::from_utf8_lossy(&data)),
            Event::Comment(text) => {
                builder.append_node(XmlNode::Comment(Comment::new(&String::from_utf8_lossy(
                    &text,
                ))));
            }
            Event::Decl(decl) => {
                if let Ok(v) = decl.version() {
                    version = Some(String::from_utf8_lossy(&v).into_owned());
                }
                if let Some(Ok(s)) = decl.standalone() {
                    standalone = Some(String::from_utf8_lossy(&s).into_owned());
                }
            }
            Event::DocType(text) => {
                doctype = Some(String::from_utf8_lossy(&text).into_owned());
            }
            Event::PI(_) => {}
            Event::Eof => break,
        }
    }
    if !builder.stack.is_empty() {
        return Err(XmlError::UnclosedElement);
    }
    Ok(ParsedNodes {
        version,
        standalone,
        doctype,
        nodes: builder.top,
    })
}

fn write_comment(comment: &Comment, out: &mut String) {
    out.push_str("<!--");
    out.push_str(&comment.text);
    out.push_str("-->");
}

fn write_element(element: &Element, out: &mut String, depth: usize, pretty: bool) {
    out.push('<');
    out.push_str(&element.tag);
    for (key, value) in &element.attributes {
        out.push_str(&format!(" {key}=\"{}\"", escape_attr(value)));
    }
    if element.text.is_none() && element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    if let Some(text) = &element.text {
        out.push_str(&escape_text(text));
    }
    // Auto-indent only regions with no whitespace of their own, so formatting
    // that was preserved from the input (or derived by the editing passes)
    // always wins over this fallback.
    let synthesize = pretty
        && element.text.is_none()
        && !element.children.is_empty()
        && element.children.iter().all(|c| c.tail().is_none());
    for child in &element.children {
        if synthesize {
            out.push('\n');
            push_indent(out, depth + 1);
        }
        match child {
            XmlNode::Element(el) => write_element(el, out, depth + 1, pretty),
            XmlNode::Comment(c) => write_comment(c, out),
        }
        if let Some(tail) = child.tail() {
            out.push_str(&escape_text(tail));
        }
    }
    if synthesize {
        out.push('\n');
        push_indent(out, depth);
    }
    out.push_str("</");
    out.push_str(&element.tag);
    out.push('>');
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
