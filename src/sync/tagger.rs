//! # XHTML Sentence Tagger
//!
//! Wraps every sentence of a chapter in `<span id="{chapterId}-sentence{n}">`
//! while leaving all other structure alone.
//!
//! ## How it works:
//! 1. The body and each block element are independent regions. A region is
//!    flattened into leaves: text pieces carrying the stack of inline
//!    elements ("marks") above them, atoms (empty or opaque elements,
//!    comments) and nested blocks.
//! 2. Each run of leaves between nested blocks is segmented as one string;
//!    text leaves are cut at sentence boundaries.
//! 3. The region is rebuilt: pieces of the same sentence share one span and
//!    consecutive pieces under the same original inline element share one
//!    copy of it.
//!
//! Only `<body>` is rebuilt; everything else in the document is cloned as is.

use crate::error::{SyncError, SyncResult};
use crate::text::{sentence_spans, Language};
use crate::xml::{Element, Node, XmlDocument};

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "canvas", "dd", "div", "dl", "dt", "fieldset", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav",
    "noscript", "ol", "p", "pre", "section", "table", "tbody", "thead", "tfoot", "tr", "td", "th", "ul", "video",
];

/// Elements whose text never takes part in segmentation.
const OPAQUE_ELEMENTS: &[&str] = &["script", "style", "rt"];

fn is_block(element: &Element) -> bool {
    BLOCK_ELEMENTS.contains(&element.local_name())
}

fn is_opaque(element: &Element) -> bool {
    OPAQUE_ELEMENTS.contains(&element.local_name())
}

/// Id of the marker span for sentence `index` of a chapter.
pub fn sentence_id(chapter_id: &str, index: usize) -> String {
    format!("{}-sentence{}", chapter_id, index)
}

/// A chapter after tagging.
#[derive(Debug, Clone)]
pub struct TaggedChapter {
    pub document: XmlDocument,
    /// Sentence texts; index `i` is wrapped in `sentence_id(chapter, i)`
    pub sentences: Vec<String>,
}

/// Sentence numbering threaded through the recursion.
#[derive(Debug, Default)]
struct Cursor {
    next_index: usize,
    sentences: Vec<String>,
}

enum LeafKind<'a> {
    Text(&'a str),
    Atom(&'a Node),
    Block(&'a Element),
}

struct Leaf<'a> {
    marks: Vec<&'a Element>,
    kind: LeafKind<'a>,
}

enum RunItem<'a> {
    Text(&'a str),
    Atom(&'a Node),
}

enum Content {
    Text(String),
    Node(Node),
}

struct Piece<'a> {
    marks: Vec<&'a Element>,
    content: Content,
    sentence: Option<usize>,
}

/// Wrap each sentence of `document`'s body in an identifiable span.
pub fn tag_sentences(document: &XmlDocument, chapter_id: &str, language: Language) -> SyncResult<TaggedChapter> {
    if document.root.local_name() != "html" {
        return Err(SyncError::Parse(format!(
            "chapter {} has <{}> as its root, expected <html>",
            chapter_id, document.root.name
        )));
    }

    let body_index = document
        .root
        .children
        .iter()
        .position(|node| matches!(node, Node::Element(el) if el.local_name() == "body"))
        .ok_or_else(|| SyncError::Parse(format!("chapter {} has no <body>", chapter_id)))?;

    let body = match &document.root.children[body_index] {
        Node::Element(el) => el,
        _ => return Err(SyncError::Parse(format!("chapter {} has no <body>", chapter_id))),
    };

    let (tagged_body, cursor) = tag_region(body, chapter_id, language, Cursor::default());

    let mut tagged = document.clone();
    tagged.root.children[body_index] = Node::Element(tagged_body);

    Ok(TaggedChapter {
        document: tagged,
        sentences: cursor.sentences,
    })
}

/// The ordered sentences `tag_sentences` would number for this document.
pub fn get_xhtml_sentences(document: &XmlDocument, language: Language) -> SyncResult<Vec<String>> {
    Ok(tag_sentences(document, "chapter", language)?.sentences)
}

fn tag_region(region: &Element, chapter_id: &str, language: Language, mut cursor: Cursor) -> (Element, Cursor) {
    let mut pieces: Vec<Piece> = Vec::new();
    let mut run: Vec<(Vec<&Element>, RunItem)> = Vec::new();

    for leaf in flatten(&region.children, &[]) {
        match leaf.kind {
            LeafKind::Block(block) => {
                let (run_pieces, next) = segment_run(std::mem::take(&mut run), language, cursor);
                pieces.extend(run_pieces);
                let (tagged, next) = tag_region(block, chapter_id, language, next);
                cursor = next;
                pieces.push(Piece {
                    marks: leaf.marks,
                    content: Content::Node(Node::Element(tagged)),
                    sentence: None,
                });
            }
            LeafKind::Text(text) => run.push((leaf.marks, RunItem::Text(text))),
            LeafKind::Atom(node) => run.push((leaf.marks, RunItem::Atom(node))),
        }
    }

    let (run_pieces, cursor) = segment_run(run, language, cursor);
    pieces.extend(run_pieces);

    let children = build_sentences(pieces, chapter_id);
    let element = Element {
        name: region.name.clone(),
        attributes: region.attributes.clone(),
        self_closing: region.self_closing && children.is_empty(),
        children,
    };
    (element, cursor)
}

/// Flatten inline content into leaves, recording the inline elements above each.
fn flatten<'a>(nodes: &'a [Node], marks: &[&'a Element]) -> Vec<Leaf<'a>> {
    let mut leaves = Vec::new();

    for node in nodes {
        let kind = match node {
            Node::Text(text) if text.is_empty() => continue,
            Node::Text(text) => LeafKind::Text(text),
            Node::Comment(_) | Node::Raw(_) => LeafKind::Atom(node),
            Node::Element(el) if is_block(el) => LeafKind::Block(el),
            Node::Element(el) if is_opaque(el) || el.children.is_empty() => LeafKind::Atom(node),
            Node::Element(el) => {
                let mut nested = marks.to_vec();
                nested.push(el);
                leaves.extend(flatten(&el.children, &nested));
                continue;
            }
        };
        leaves.push(Leaf {
            marks: marks.to_vec(),
            kind,
        });
    }

    leaves
}

/// Segment one run of inline leaves and cut its text at sentence boundaries.
fn segment_run<'a>(
    run: Vec<(Vec<&'a Element>, RunItem<'a>)>,
    language: Language,
    mut cursor: Cursor,
) -> (Vec<Piece<'a>>, Cursor) {
    let mut text = String::new();
    let mut offsets = Vec::with_capacity(run.len());
    for (_, item) in &run {
        offsets.push(text.len());
        if let RunItem::Text(t) = item {
            text.push_str(t);
        }
    }

    let spans = sentence_spans(&text, language);
    let first_index = cursor.next_index;
    for (start, end) in &spans {
        cursor.sentences.push(text[*start..*end].to_string());
    }
    cursor.next_index += spans.len();

    let mut pieces = Vec::new();
    for ((marks, item), start) in run.into_iter().zip(offsets) {
        match item {
            RunItem::Atom(node) => {
                let sentence = spans
                    .iter()
                    .position(|(s, e)| *s < start && start < *e)
                    .map(|i| first_index + i);
                pieces.push(Piece {
                    marks,
                    content: Content::Node(node.clone()),
                    sentence,
                });
            }
            RunItem::Text(t) => {
                let end = start + t.len();
                let mut cuts = vec![start, end];
                for (s, e) in &spans {
                    for boundary in [*s, *e] {
                        if boundary > start && boundary < end {
                            cuts.push(boundary);
                        }
                    }
                }
                cuts.sort_unstable();
                cuts.dedup();

                for window in cuts.windows(2) {
                    let (a, b) = (window[0], window[1]);
                    let sentence = spans
                        .iter()
                        .position(|(s, e)| *s <= a && b <= *e)
                        .map(|i| first_index + i);
                    pieces.push(Piece {
                        marks: marks.clone(),
                        content: Content::Text(t[a - start..b - start].to_string()),
                        sentence,
                    });
                }
            }
        }
    }

    (pieces, cursor)
}

/// Group consecutive pieces of one sentence under a marker span.
fn build_sentences(pieces: Vec<Piece>, chapter_id: &str) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut start = 0;

    while start < pieces.len() {
        let sentence = pieces[start].sentence;
        let end = start
            + pieces[start..]
                .iter()
                .take_while(|piece| piece.sentence == sentence)
                .count();
        let children = build_marks(&pieces[start..end], 0);

        match sentence {
            Some(index) => {
                let mut span = Element::new("span").with_attr("id", sentence_id(chapter_id, index));
                span.children = children;
                span.self_closing = false;
                nodes.push(Node::Element(span));
            }
            None => nodes.extend(children),
        }
        start = end;
    }

    nodes
}

/// Replay inline marks from `depth` down, sharing one element per run of
/// pieces under the same original mark.
fn build_marks(pieces: &[Piece], depth: usize) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut start = 0;

    while start < pieces.len() {
        let Some(mark) = pieces[start].marks.get(depth).copied() else {
            nodes.push(match &pieces[start].content {
                Content::Text(text) => Node::Text(text.clone()),
                Content::Node(node) => node.clone(),
            });
            start += 1;
            continue;
        };

        let end = start
            + pieces[start..]
                .iter()
                .take_while(|piece| piece.marks.get(depth).is_some_and(|m| std::ptr::eq(*m, mark)))
                .count();

        nodes.push(Node::Element(Element {
            name: mark.name.clone(),
            attributes: mark.attributes.clone(),
            children: build_marks(&pieces[start..end], depth + 1),
            self_closing: false,
        }));
        start = end;
    }

    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::write_nodes;

    fn chapter(body: &str) -> XmlDocument {
        XmlDocument::parse(&format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">\
<head><title>Chapter</title></head><body>{}</body></html>\n",
            body
        ))
        .unwrap()
    }

    fn body_xml(doc: &XmlDocument) -> String {
        let body = doc.root.find_child("body").unwrap();
        let mut out = String::new();
        write_nodes(&body.children, &mut out);
        out
    }

    fn strip_spans(nodes: &[Node]) -> Vec<Node> {
        let mut out = Vec::new();
        for node in nodes {
            match node {
                Node::Element(el) if el.name == "span" && el.attr("id").is_some_and(|id| id.contains("-sentence")) => {
                    for child in strip_spans(&el.children) {
                        push_merged(&mut out, child);
                    }
                }
                Node::Element(el) => {
                    let mut copy = el.clone();
                    copy.children = strip_spans(&el.children);
                    out.push(Node::Element(copy));
                }
                other => push_merged(&mut out, other.clone()),
            }
        }
        out
    }

    fn push_merged(out: &mut Vec<Node>, node: Node) {
        if let (Some(Node::Text(last)), Node::Text(text)) = (out.last_mut(), &node) {
            last.push_str(text);
            return;
        }
        out.push(node);
    }

    #[test]
    fn test_tags_paragraph_sentences() {
        let doc = chapter("<p>Hello world. Second one.</p><p>Third.</p>");
        let tagged = tag_sentences(&doc, "ch1", Language::English).unwrap();
        assert_eq!(
            body_xml(&tagged.document),
            "<p><span id=\"ch1-sentence0\">Hello world.</span> <span id=\"ch1-sentence1\">Second one.</span></p>\
<p><span id=\"ch1-sentence2\">Third.</span></p>"
        );
        assert_eq!(tagged.sentences, vec!["Hello world.", "Second one.", "Third."]);
    }

    #[test]
    fn test_sentence_crossing_inline_element() {
        let doc = chapter("<p>One <em>two. Three</em> four.</p>");
        let tagged = tag_sentences(&doc, "c", Language::English).unwrap();
        assert_eq!(
            body_xml(&tagged.document),
            "<p><span id=\"c-sentence0\">One <em>two.</em></span><em> </em>\
<span id=\"c-sentence1\"><em>Three</em> four.</span></p>"
        );
    }

    #[test]
    fn test_nested_blocks_are_separate_regions() {
        let doc = chapter("<div>Intro <p>Inner.</p> Outro.</div>");
        let tagged = tag_sentences(&doc, "c", Language::English).unwrap();
        assert_eq!(tagged.sentences, vec!["Intro", "Inner.", "Outro."]);
        assert_eq!(
            body_xml(&tagged.document),
            "<div><span id=\"c-sentence0\">Intro</span> <p><span id=\"c-sentence1\">Inner.</span></p> \
<span id=\"c-sentence2\">Outro.</span></div>"
        );
    }

    #[test]
    fn test_atoms_stay_inside_their_sentence() {
        let doc = chapter("<p>Line one<br/>still going.<a id=\"p5\"/> Next.</p>");
        let tagged = tag_sentences(&doc, "c", Language::English).unwrap();
        assert_eq!(
            body_xml(&tagged.document),
            "<p><span id=\"c-sentence0\">Line one<br/>still going.</span><a id=\"p5\"/> \
<span id=\"c-sentence1\">Next.</span></p>"
        );
    }

    #[test]
    fn test_opaque_text_is_not_segmented() {
        let doc = chapter("<p>Kanji <ruby>漢<rt>kan.</rt></ruby> here.</p><script>var x = 1;</script>");
        let tagged = tag_sentences(&doc, "c", Language::English).unwrap();
        assert_eq!(tagged.sentences, vec!["Kanji 漢 here."]);
        assert!(body_xml(&tagged.document).contains("<script>var x = 1;</script>"));
    }

    #[test]
    fn test_stripping_spans_restores_document() {
        let doc = chapter("\n<h1>Title</h1>\n<p>A <b>bold</b> move. Then &amp; now!</p>\n<ul><li>One.</li><li>Two</li></ul>\n");
        let tagged = tag_sentences(&doc, "c", Language::English).unwrap();
        let original = doc.root.find_child("body").unwrap();
        let body = tagged.document.root.find_child("body").unwrap();
        assert_eq!(strip_spans(&body.children), original.children);
        assert!(tagged.document.to_xml().starts_with(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>Chapter</title></head>"
        ));
    }

    #[test]
    fn test_text_content_round_trip_with_split_marks() {
        let doc = chapter("<p><i>First. Second.</i> Third <a href=\"#n\">note</a>.</p>");
        let tagged = tag_sentences(&doc, "c", Language::English).unwrap();
        let original = doc.root.find_child("body").unwrap().text_content();
        let body = tagged.document.root.find_child("body").unwrap();
        let mut stripped = body.clone();
        stripped.children = strip_spans(&body.children);
        assert_eq!(stripped.text_content(), original);
        assert_eq!(tagged.sentences, vec!["First.", "Second.", "Third note."]);
    }

    #[test]
    fn test_missing_body_or_html_is_parse_error() {
        let doc = XmlDocument::parse("<html><head/></html>").unwrap();
        assert!(matches!(tag_sentences(&doc, "c", Language::English), Err(SyncError::Parse(_))));

        let doc = XmlDocument::parse("<svg><body>x</body></svg>").unwrap();
        assert!(matches!(tag_sentences(&doc, "c", Language::English), Err(SyncError::Parse(_))));
    }

    #[test]
    fn test_get_xhtml_sentences() {
        let doc = chapter("<p>Mr. Smith arrived. He sat.</p>");
        let sentences = get_xhtml_sentences(&doc, Language::English).unwrap();
        assert_eq!(sentences, vec!["Mr. Smith arrived.", "He sat."]);
    }
}
