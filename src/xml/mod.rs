//! # XML Element Tree
//!
//! A small owned element tree for the documents inside an EPUB: chapter
//! XHTML, the OPF package document and the SMIL overlays we generate.
//!
//! ## Design:
//! - **Tagged union nodes**: `Node` is `Text | Element | Comment | Raw`, so
//!   rewriting code pattern-matches instead of probing dynamic properties.
//! - **Verbatim prolog/epilog**: everything before the root element (XML
//!   declaration, DOCTYPE, comments, whitespace) and after it is kept as the
//!   original text and written back unchanged.
//! - **Reading via quick-xml**: events are folded into the tree with an
//!   explicit element stack; text is stored unescaped and re-escaped on output.

use crate::error::{SyncError, SyncResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;

/// A node in the element tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Character data, already unescaped
    Text(String),
    /// A nested element
    Element(Element),
    /// `<!-- ... -->` content
    Comment(String),
    /// Markup copied through verbatim (CDATA sections, processing instructions)
    Raw(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(el) => Some(el),
            _ => None,
        }
    }
}

/// An XML element with ordered attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Qualified name as written in the source (`epub:switch`, `p`, ...)
    pub name: String,
    /// Attributes in source order, values unescaped
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    /// Serialize as `<name/>` when there are no children
    pub self_closing: bool,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
            self_closing: true,
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder-style child appender.
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set an attribute, replacing an existing value in place.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    /// Child elements, skipping text and comments.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    /// First child element with the given local name.
    pub fn find_child(&self, local: &str) -> Option<&Element> {
        self.child_elements().find(|el| el.local_name() == local)
    }

    pub fn find_child_mut(&mut self, local: &str) -> Option<&mut Element> {
        self.children.iter_mut().find_map(|node| match node {
            Node::Element(el) if el.local_name() == local => Some(el),
            _ => None,
        })
    }

    /// Concatenated text of every descendant text node.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => collect_text(&el.children, out),
            Node::Comment(_) | Node::Raw(_) => {}
        }
    }
}

/// Name without its namespace prefix.
pub fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

/// A parsed document: verbatim prolog, root element, verbatim epilog.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    pub prolog: String,
    pub root: Element,
    pub epilog: String,
}

impl XmlDocument {
    /// Wrap a freshly built root with a standard XML declaration.
    pub fn new(root: Element) -> Self {
        Self {
            prolog: "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n".to_string(),
            root,
            epilog: "\n".to_string(),
        }
    }

    /// Parse a document from text.
    pub fn parse(input: &str) -> SyncResult<Self> {
        let mut reader = Reader::from_str(input);
        reader.trim_text(false);
        reader.expand_empty_elements(false);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        let mut prolog_end: Option<usize> = None;
        let mut epilog_start = input.len();

        loop {
            let before = reader.buffer_position();
            let event = reader.read_event()?;

            match event {
                Event::Start(start) => {
                    if stack.is_empty() && root.is_none() && prolog_end.is_none() {
                        prolog_end = Some(before);
                    }
                    let mut element = read_start(&start)?;
                    element.self_closing = false;
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let element = read_start(&start)?;
                    if stack.is_empty() {
                        if root.is_none() {
                            prolog_end = Some(before);
                            root = Some(element);
                            epilog_start = reader.buffer_position();
                        }
                    } else {
                        append(&mut stack, Node::Element(element));
                    }
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| SyncError::Parse("unbalanced closing tag".to_string()))?;
                    if stack.is_empty() {
                        root = Some(element);
                        epilog_start = reader.buffer_position();
                    } else {
                        append(&mut stack, Node::Element(element));
                    }
                }
                Event::Text(text) => {
                    if !stack.is_empty() {
                        let value = match text.unescape_with(resolve_html_entity) {
                            Ok(value) => value.into_owned(),
                            Err(_) => String::from_utf8_lossy(&text).into_owned(),
                        };
                        append_text(&mut stack, value);
                    }
                }
                Event::CData(data) => {
                    if !stack.is_empty() {
                        let raw = format!("<![CDATA[{}]]>", String::from_utf8_lossy(&data));
                        append(&mut stack, Node::Raw(raw));
                    }
                }
                Event::Comment(comment) => {
                    if !stack.is_empty() {
                        append(&mut stack, Node::Comment(String::from_utf8_lossy(&comment).into_owned()));
                    }
                }
                Event::PI(pi) => {
                    if !stack.is_empty() {
                        append(&mut stack, Node::Raw(format!("<?{}?>", String::from_utf8_lossy(&pi))));
                    }
                }
                Event::Decl(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        if !stack.is_empty() {
            return Err(SyncError::Parse("document ended inside an element".to_string()));
        }

        let root = root.ok_or_else(|| SyncError::Parse("document has no root element".to_string()))?;
        let prolog = input[..prolog_end.unwrap_or(0)].to_string();
        let epilog = input[epilog_start.min(input.len())..].to_string();

        Ok(Self { prolog, root, epilog })
    }

    /// Serialize back to text.
    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(self.prolog.len() + 1024);
        out.push_str(&self.prolog);
        write_element(&self.root, &mut out);
        out.push_str(&self.epilog);
        out
    }
}

fn read_start(start: &BytesStart<'_>) -> SyncResult<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = Element::new(name);

    for attribute in start.attributes() {
        let attribute = attribute?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = match attribute.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attribute.value).into_owned(),
        };
        element.attributes.push((key, value));
    }

    Ok(element)
}

fn append(stack: &mut [Element], node: Node) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    }
}

/// Append text, merging with a preceding text node (entity boundaries split
/// text into several events).
fn append_text(stack: &mut [Element], text: String) {
    if let Some(parent) = stack.last_mut() {
        if let Some(Node::Text(previous)) = parent.children.last_mut() {
            previous.push_str(&text);
            return;
        }
        parent.children.push(Node::Text(text));
    }
}

/// Named entities XHTML content commonly carries besides the XML five.
fn resolve_html_entity(entity: &str) -> Option<&'static str> {
    Some(match entity {
        "nbsp" => "\u{a0}",
        "shy" => "\u{ad}",
        "ensp" => "\u{2002}",
        "emsp" => "\u{2003}",
        "thinsp" => "\u{2009}",
        "zwnj" => "\u{200c}",
        "zwj" => "\u{200d}",
        "ndash" => "–",
        "mdash" => "—",
        "lsquo" => "‘",
        "rsquo" => "’",
        "ldquo" => "“",
        "rdquo" => "”",
        "hellip" => "…",
        "copy" => "©",
        "reg" => "®",
        "trade" => "™",
        "laquo" => "«",
        "raquo" => "»",
        "middot" => "·",
        "bull" => "•",
        "eacute" => "é",
        "egrave" => "è",
        "aacute" => "á",
        "iacute" => "í",
        "oacute" => "ó",
        "uacute" => "ú",
        "ntilde" => "ñ",
        "uuml" => "ü",
        _ => return None,
    })
}

/// Serialize a single element (and its subtree) into `out`.
pub fn write_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for (key, value) in &element.attributes {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        out.push_str(&quick_xml::escape::escape(value.as_str()));
        out.push('"');
    }

    if element.children.is_empty() && element.self_closing {
        out.push_str("/>");
        return;
    }

    out.push('>');
    write_nodes(&element.children, out);
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

pub fn write_nodes(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => {
                let escaped: Cow<'_, str> = quick_xml::escape::partial_escape(text.as_str());
                out.push_str(&escaped);
            }
            Node::Element(el) => write_element(el, out),
            Node::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
            Node::Raw(raw) => out.push_str(raw),
        }
    }
}
