//! # SMIL Media Overlays
//!
//! One overlay per chapter: a `<seq>` bound to the chapter document holding
//! a `<par>` per sentence, each pairing the sentence's marker span with an
//! audio clip.
//!
//! ## Example:
//! ```xml
//! <par id="ch1-sentence0">
//!   <text src="../Text/ch1.xhtml#ch1-sentence0"/>
//!   <audio src="../Audio/00001.mp3" clipBegin="0s" clipEnd="1.5s"/>
//! </par>
//! ```

use super::alignment::SentenceRange;
use super::tagger::sentence_id;
use crate::xml::{Element, Node, XmlDocument};

const SMIL_NS: &str = "http://www.w3.org/ns/SMIL";
const EPUB_NS: &str = "http://www.idpf.org/2007/ops";

/// Render seconds for `clipBegin`/`clipEnd`, trimmed to millisecond precision.
pub fn format_clock(seconds: f64) -> String {
    let formatted = format!("{:.3}", seconds.max(0.0));
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{}s", trimmed)
}

/// Render a duration for `media:duration` metadata (`h:mm:ss.fff`).
pub fn format_duration(seconds: f64) -> String {
    let millis = (seconds.max(0.0) * 1000.0).round() as u64;
    let (hours, rest) = (millis / 3_600_000, millis % 3_600_000);
    let (minutes, rest) = (rest / 60_000, rest % 60_000);
    format!("{}:{:02}:{:02}.{:03}", hours, minutes, rest / 1000, rest % 1000)
}

/// Build the overlay for one chapter.
///
/// ## Parameters:
/// - `chapter_id`: manifest id of the chapter; names the `<seq>` and the sentence ids
/// - `chapter_href`: the chapter document, relative to the SMIL document
/// - `ranges`: one `<par>` per range, in the given order
/// - `audio_href`: maps a range's `audiofile` to its href relative to the SMIL document
pub fn build_smil(
    chapter_id: &str,
    chapter_href: &str,
    ranges: &[SentenceRange],
    audio_href: impl Fn(&str) -> String,
) -> XmlDocument {
    let mut seq = Element::new("seq")
        .with_attr("id", format!("{}_overlay", chapter_id))
        .with_attr("epub:textref", chapter_href)
        .with_attr("epub:type", "chapter");

    for range in ranges {
        let tag_id = sentence_id(chapter_id, range.id);
        let text = Element::new("text").with_attr("src", format!("{}#{}", chapter_href, tag_id));
        let audio = Element::new("audio")
            .with_attr("src", audio_href(&range.audiofile))
            .with_attr("clipBegin", format_clock(range.start))
            .with_attr("clipEnd", format_clock(range.end));
        let par = Element::new("par")
            .with_attr("id", tag_id)
            .with_child(Node::Element(text))
            .with_child(Node::Element(audio));
        seq.children.push(Node::Element(par));
    }
    seq.self_closing = false;

    let body = Element::new("body").with_child(Node::Element(seq));
    let root = Element::new("smil")
        .with_attr("xmlns", SMIL_NS)
        .with_attr("xmlns:epub", EPUB_NS)
        .with_attr("version", "3.0")
        .with_child(Node::Element(body));

    XmlDocument::new(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(1.5), "1.5s");
        assert_eq!(format_clock(3.0), "3s");
        assert_eq!(format_clock(0.12345), "0.123s");
        assert_eq!(format_clock(-1.0), "0s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.0), "0:00:00.000");
        assert_eq!(format_duration(3723.5), "1:02:03.500");
    }

    #[test]
    fn test_build_smil() {
        let ranges = vec![
            SentenceRange {
                id: 0,
                start: 0.0,
                end: 1.5,
                audiofile: "/data/00001.mp3".to_string(),
            },
            SentenceRange {
                id: 1,
                start: 1.5,
                end: 4.25,
                audiofile: "/data/00001.mp3".to_string(),
            },
        ];
        let doc = build_smil("ch1", "../Text/ch1.xhtml", &ranges, |_| "../Audio/00001.mp3".to_string());
        let xml = doc.to_xml();

        assert!(xml.contains("<smil xmlns=\"http://www.w3.org/ns/SMIL\" xmlns:epub=\"http://www.idpf.org/2007/ops\" version=\"3.0\">"));
        assert!(xml.contains("<seq id=\"ch1_overlay\" epub:textref=\"../Text/ch1.xhtml\" epub:type=\"chapter\">"));
        assert!(xml.contains(
            "<par id=\"ch1-sentence1\"><text src=\"../Text/ch1.xhtml#ch1-sentence1\"/>\
<audio src=\"../Audio/00001.mp3\" clipBegin=\"1.5s\" clipEnd=\"4.25s\"/></par>"
        ));

        let reparsed = XmlDocument::parse(&xml).unwrap();
        let seq = reparsed.root.find_child("body").unwrap().find_child("seq").unwrap();
        assert_eq!(seq.child_elements().count(), 2);
    }
}
