//! # EPUB Container
//!
//! In-memory view of an EPUB: every zip entry, plus the parsed OPF package
//! document. The synchronizer reads chapters through it, writes tagged
//! chapters and new SMIL/audio items back, and serializes the result.
//!
//! ## Operations:
//! - **open / from_bytes**: unzip, locate the package via `META-INF/container.xml`
//! - **spine / manifest**: reading order and resources
//! - **read_xhtml / item_text / write_xhtml**: chapter documents
//! - **add_manifest_item / set_media_overlay / add_metadata**: overlay wiring
//! - **to_bytes / save**: re-zip with `mimetype` stored first

use crate::error::{SyncError, SyncResult};
use crate::xml::{Element, Node, XmlDocument};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;

const CONTAINER_PATH: &str = "META-INF/container.xml";
const MIMETYPE_PATH: &str = "mimetype";

/// A resource declared in the package manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestItem {
    pub id: String,
    /// Href relative to the package document
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
    pub media_overlay: Option<String>,
}

impl ManifestItem {
    pub fn new(id: impl Into<String>, href: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            href: href.into(),
            media_type: media_type.into(),
            properties: None,
            media_overlay: None,
        }
    }

    fn from_element(el: &Element) -> Option<Self> {
        Some(Self {
            id: el.attr("id")?.to_string(),
            href: el.attr("href")?.to_string(),
            media_type: el.attr("media-type").unwrap_or_default().to_string(),
            properties: el.attr("properties").map(str::to_string),
            media_overlay: el.attr("media-overlay").map(str::to_string),
        })
    }

    fn to_element(&self) -> Element {
        let mut el = Element::new("item")
            .with_attr("id", &self.id)
            .with_attr("href", &self.href)
            .with_attr("media-type", &self.media_type);
        if let Some(properties) = &self.properties {
            el.set_attr("properties", properties);
        }
        if let Some(overlay) = &self.media_overlay {
            el.set_attr("media-overlay", overlay);
        }
        el
    }

    pub fn is_xhtml(&self) -> bool {
        self.media_type == "application/xhtml+xml"
    }
}

/// An unpacked EPUB held in memory.
///
/// ## Representation:
/// - Archive entries keep their original order; new ones are appended
/// - The package document is parsed once and serialized again on save, so
///   manifest and metadata edits never touch the raw bytes directly
///
/// Chapter lookups go through manifest ids, never archive paths.
pub struct Epub {
    /// `(archive path, content)` pairs
    entries: Vec<(String, Vec<u8>)>,
    opf_path: String,
    package: XmlDocument,
}

impl Epub {
    /// Read an EPUB file from disk.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(&bytes)
    }

    /// Read an EPUB from an in-memory zip archive.
    pub fn from_bytes(bytes: &[u8]) -> SyncResult<Self> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        let mut entries = Vec::with_capacity(archive.len());

        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut content = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut content)?;
            entries.push((name, content));
        }

        let container = entries
            .iter()
            .find(|(name, _)| name == CONTAINER_PATH)
            .ok_or_else(|| SyncError::Epub("missing META-INF/container.xml".to_string()))?;
        let container = XmlDocument::parse(&String::from_utf8_lossy(&container.1))?;
        let opf_path = container
            .root
            .find_child("rootfiles")
            .and_then(|rootfiles| rootfiles.find_child("rootfile"))
            .and_then(|rootfile| rootfile.attr("full-path"))
            .ok_or_else(|| SyncError::Epub("container.xml names no rootfile".to_string()))?
            .to_string();

        let opf = entries
            .iter()
            .find(|(name, _)| *name == opf_path)
            .ok_or_else(|| SyncError::Epub(format!("package document {} not found", opf_path)))?;
        let package = XmlDocument::parse(&String::from_utf8_lossy(&opf.1))?;
        if package.root.local_name() != "package" {
            return Err(SyncError::Epub("package document root is not <package>".to_string()));
        }

        Ok(Self {
            entries,
            opf_path,
            package,
        })
    }

    /// The parsed package document.
    pub fn package(&self) -> &XmlDocument {
        &self.package
    }

    /// Path of the package document inside the archive.
    pub fn opf_path(&self) -> &str {
        &self.opf_path
    }

    /// Every manifest item, in document order.
    pub fn manifest(&self) -> Vec<ManifestItem> {
        self.package
            .root
            .find_child("manifest")
            .map(|manifest| {
                manifest
                    .child_elements()
                    .filter(|el| el.local_name() == "item")
                    .filter_map(ManifestItem::from_element)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn manifest_item(&self, id: &str) -> Option<ManifestItem> {
        self.manifest().into_iter().find(|item| item.id == id)
    }

    /// Manifest items in reading order.
    pub fn spine(&self) -> Vec<ManifestItem> {
        let manifest = self.manifest();
        self.package
            .root
            .find_child("spine")
            .map(|spine| {
                spine
                    .child_elements()
                    .filter(|el| el.local_name() == "itemref")
                    .filter_map(|itemref| itemref.attr("idref"))
                    .filter_map(|idref| manifest.iter().find(|item| item.id == idref).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The book's declared language (`dc:language`), if any.
    pub fn language(&self) -> Option<String> {
        self.package
            .root
            .find_child("metadata")
            .and_then(|metadata| metadata.find_child("language"))
            .map(|el| el.text_content().trim().to_string())
            .filter(|lang| !lang.is_empty())
    }

    /// Archive path of a manifest href.
    pub fn resolve_href(&self, href: &str) -> String {
        let href = href.split('#').next().unwrap_or(href);
        match self.opf_path.rfind('/') {
            Some(idx) => normalize_path(&format!("{}/{}", &self.opf_path[..idx], href)),
            None => normalize_path(href),
        }
    }

    /// Archive path of a manifest item.
    pub fn item_path(&self, id: &str) -> SyncResult<String> {
        let item = self
            .manifest_item(id)
            .ok_or_else(|| SyncError::Epub(format!("no manifest item with id {}", id)))?;
        Ok(self.resolve_href(&item.href))
    }

    pub fn read_item(&self, id: &str) -> SyncResult<&[u8]> {
        let path = self.item_path(id)?;
        self.read_path(&path)
    }

    fn read_path(&self, path: &str) -> SyncResult<&[u8]> {
        self.entries
            .iter()
            .find(|(name, _)| name == path)
            .map(|(_, content)| content.as_slice())
            .ok_or_else(|| SyncError::Epub(format!("archive has no entry {}", path)))
    }

    /// Parse a chapter document.
    pub fn read_xhtml(&self, id: &str) -> SyncResult<XmlDocument> {
        let bytes = self.read_item(id)?;
        XmlDocument::parse(&String::from_utf8_lossy(bytes))
    }

    /// Plain text of a chapter's `<body>`.
    pub fn item_text(&self, id: &str) -> SyncResult<String> {
        let doc = self.read_xhtml(id)?;
        let body = doc
            .root
            .find_child("body")
            .ok_or_else(|| SyncError::Parse(format!("chapter {} has no <body>", id)))?;
        Ok(body.text_content())
    }

    /// Replace a chapter document.
    pub fn write_xhtml(&mut self, id: &str, doc: &XmlDocument) -> SyncResult<()> {
        let path = self.item_path(id)?;
        self.put_entry(path, doc.to_xml().into_bytes());
        Ok(())
    }

    /// Declare a new resource (replacing one with the same id) and store its content.
    pub fn add_manifest_item(&mut self, item: ManifestItem, content: Vec<u8>) -> SyncResult<()> {
        let path = self.resolve_href(&item.href);
        let manifest = self
            .package
            .root
            .find_child_mut("manifest")
            .ok_or_else(|| SyncError::Epub("package has no <manifest>".to_string()))?;

        manifest.children.retain(|node| match node {
            Node::Element(el) => !(el.local_name() == "item" && el.attr("id") == Some(item.id.as_str())),
            _ => true,
        });
        manifest.children.push(Node::Element(item.to_element()));

        self.put_entry(path, content);
        Ok(())
    }

    /// Link a chapter item to its SMIL overlay.
    pub fn set_media_overlay(&mut self, spine_id: &str, smil_id: &str) -> SyncResult<()> {
        let manifest = self
            .package
            .root
            .find_child_mut("manifest")
            .ok_or_else(|| SyncError::Epub("package has no <manifest>".to_string()))?;

        let item = manifest
            .children
            .iter_mut()
            .find_map(|node| match node {
                Node::Element(el) if el.local_name() == "item" && el.attr("id") == Some(spine_id) => Some(el),
                _ => None,
            })
            .ok_or_else(|| SyncError::Epub(format!("no manifest item with id {}", spine_id)))?;

        item.set_attr("media-overlay", smil_id);
        Ok(())
    }

    /// Add (or replace) a `<meta property>` entry in the package metadata.
    pub fn add_metadata(&mut self, property: &str, refines: Option<&str>, value: &str) -> SyncResult<()> {
        let metadata = self
            .package
            .root
            .find_child_mut("metadata")
            .ok_or_else(|| SyncError::Epub("package has no <metadata>".to_string()))?;

        metadata.children.retain(|node| match node {
            Node::Element(el) => {
                !(el.local_name() == "meta" && el.attr("property") == Some(property) && el.attr("refines") == refines)
            }
            _ => true,
        });

        let mut meta = Element::new("meta").with_attr("property", property);
        if let Some(refines) = refines {
            meta.set_attr("refines", refines);
        }
        meta.children.push(Node::Text(value.to_string()));
        metadata.children.push(Node::Element(meta));
        Ok(())
    }

    fn put_entry(&mut self, path: String, content: Vec<u8>) {
        match self.entries.iter_mut().find(|(name, _)| *name == path) {
            Some(entry) => entry.1 = content,
            None => self.entries.push((path, content)),
        }
    }

    /// Serialize the container, `mimetype` first and uncompressed.
    pub fn to_bytes(&self) -> SyncResult<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        writer.start_file(MIMETYPE_PATH, stored)?;
        let mimetype = self
            .entries
            .iter()
            .find(|(name, _)| name == MIMETYPE_PATH)
            .map(|(_, content)| content.as_slice())
            .unwrap_or(b"application/epub+zip");
        writer.write_all(mimetype)?;

        let package = self.package.to_xml();
        for (name, content) in &self.entries {
            if name == MIMETYPE_PATH {
                continue;
            }
            writer.start_file(name.as_str(), deflated)?;
            if *name == self.opf_path {
                writer.write_all(package.as_bytes())?;
            } else {
                writer.write_all(content)?;
            }
        }

        Ok(writer.finish()?.into_inner())
    }

    /// Write the container to disk.
    pub fn save(&self, path: impl AsRef<Path>) -> SyncResult<()> {
        let bytes = self.to_bytes()?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

/// Collapse `.` and `..` segments of an archive path.
fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Href that reaches archive path `to` from a document stored at archive path `from`.
pub fn relative_href(from: &str, to: &str) -> String {
    let from_dir: Vec<&str> = match from.rfind('/') {
        Some(idx) => from[..idx].split('/').collect(),
        None => Vec::new(),
    };
    let to_parts: Vec<&str> = to.split('/').collect();

    let common = from_dir
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = Vec::new();
    for _ in common..from_dir.len() {
        parts.push("..");
    }
    parts.extend(&to_parts[common..]);
    parts.join("/")
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Build a minimal EPUB3 with the given `(id, xhtml)` chapters under `OEBPS/Text/`.
    pub fn sample_epub(chapters: &[(&str, &str)]) -> Epub {
        let mut manifest = String::new();
        let mut spine = String::new();
        for (id, _) in chapters {
            manifest.push_str(&format!(
                "<item id=\"{id}\" href=\"Text/{id}.xhtml\" media-type=\"application/xhtml+xml\"/>"
            ));
            spine.push_str(&format!("<itemref idref=\"{id}\"/>"));
        }
        let opf = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\" unique-identifier=\"uid\">\
<metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\"><dc:identifier id=\"uid\">test</dc:identifier>\
<dc:title>Test</dc:title><dc:language>en-US</dc:language></metadata>\
<manifest>{manifest}</manifest><spine>{spine}</spine></package>\n"
        );
        let container = "<?xml version=\"1.0\"?>\n\
<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\
<rootfiles><rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/></rootfiles>\
</container>";

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("mimetype", options).unwrap();
        writer.write_all(b"application/epub+zip").unwrap();
        writer.start_file(CONTAINER_PATH, options).unwrap();
        writer.write_all(container.as_bytes()).unwrap();
        writer.start_file("OEBPS/content.opf", options).unwrap();
        writer.write_all(opf.as_bytes()).unwrap();
        for (id, xhtml) in chapters {
            writer.start_file(format!("OEBPS/Text/{id}.xhtml"), options).unwrap();
            writer.write_all(xhtml.as_bytes()).unwrap();
        }
        let bytes = writer.finish().unwrap().into_inner();
        Epub::from_bytes(&bytes).unwrap()
    }

    pub fn chapter(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">\
<head><title>t</title></head><body>{body}</body></html>\n"
        )
    }
}
