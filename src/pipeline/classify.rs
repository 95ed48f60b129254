//! Input classification: decide what kind of document a path holds.
//!
//! The extension picks the family. PDFs must also start with the `%PDF`
//! signature, and the first few pages are probed for an image layer (image
//! XObjects or inline images) and a text layer (font resources plus
//! text-showing operators). Scanned PDFs that already carry an OCR text
//! layer show both and are reported as [`DocumentKind::DualLayerPdf`].
//!
//! Probing parses the file with `lopdf`, which is CPU-bound, so
//! [`classify`] runs it on the blocking pool.

use crate::config::ProbeConfig;
use crate::error::ClassificationError;
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Supported input kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    /// Image layer plus an extractable text layer on the probed pages.
    DualLayerPdf,
    Doc,
    Docx,
}

impl DocumentKind {
    pub fn is_pdf(self) -> bool {
        matches!(self, DocumentKind::Pdf | DocumentKind::DualLayerPdf)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::DualLayerPdf => "dual-layer pdf",
            DocumentKind::Doc => "doc",
            DocumentKind::Docx => "docx",
        })
    }
}

/// Classify `path` without modifying it.
pub async fn classify(path: &Path, probe: &ProbeConfig) -> Result<DocumentKind, ClassificationError> {
    let owned = path.to_path_buf();
    let probe = *probe;
    tokio::task::spawn_blocking(move || classify_blocking(&owned, &probe))
        .await
        .map_err(|e| ClassificationError::Unreadable {
            path: path.to_path_buf(),
            detail: format!("classifier task failed: {e}"),
        })?
}

/// Synchronous core of [`classify`].
pub fn classify_blocking(path: &Path, probe: &ProbeConfig) -> Result<DocumentKind, ClassificationError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let family = match ext.as_str() {
        "pdf" => DocumentKind::Pdf,
        "doc" => DocumentKind::Doc,
        "docx" => DocumentKind::Docx,
        _ => {
            return Err(ClassificationError::UnsupportedKind {
                path: path.to_path_buf(),
            })
        }
    };

    let mut file = open_regular(path)?;
    if family != DocumentKind::Pdf {
        debug!("Classified {} as {}", path.display(), family);
        return Ok(family);
    }

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
        return Err(unreadable(path, "missing %PDF signature"));
    }
    drop(file);

    let doc = match Document::load(path) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(
                "Cannot parse PDF structure of {} ({}); treating as plain PDF",
                path.display(),
                e
            );
            return Ok(DocumentKind::Pdf);
        }
    };

    let layers = probe_layers(&doc, probe.max_pages);
    let kind = if layers.has_images && layers.has_text {
        DocumentKind::DualLayerPdf
    } else {
        DocumentKind::Pdf
    };
    debug!(
        images = layers.has_images,
        text = layers.has_text,
        "Classified {} as {}",
        path.display(),
        kind
    );
    Ok(kind)
}

fn open_regular(path: &Path) -> Result<std::fs::File, ClassificationError> {
    let file = std::fs::File::open(path).map_err(|e| unreadable(path, &e.to_string()))?;
    let meta = file.metadata().map_err(|e| unreadable(path, &e.to_string()))?;
    if !meta.is_file() {
        return Err(unreadable(path, "not a regular file"));
    }
    Ok(file)
}

fn unreadable(path: &Path, detail: &str) -> ClassificationError {
    ClassificationError::Unreadable {
        path: PathBuf::from(path),
        detail: detail.to_string(),
    }
}

/// What the first pages of a PDF contain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LayerProbe {
    pub has_images: bool,
    pub has_text: bool,
}

/// Inspect at most `max_pages` pages from the start of `doc`.
pub fn probe_layers(doc: &Document, max_pages: usize) -> LayerProbe {
    let mut probe = LayerProbe::default();

    for (_, page_id) in doc.get_pages().into_iter().take(max_pages.max(1)) {
        let resources = page_resources(doc, page_id);
        let has_fonts = resources
            .and_then(|r| resolve_dict(doc, r.get(b"Font").ok()?))
            .is_some_and(|fonts| !fonts.is_empty());
        if resources.is_some_and(|r| has_image_xobject(doc, r)) {
            probe.has_images = true;
        }

        let ops = match doc.get_page_content(page_id) {
            Ok(data) => scan_operators(&data),
            Err(e) => {
                debug!("Page {:?}: unreadable content stream ({})", page_id, e);
                ContentOps::default()
            }
        };
        probe.has_images |= ops.inline_image;
        probe.has_text |= has_fonts && ops.shows_text;

        if probe.has_images && probe.has_text {
            break;
        }
    }
    probe
}

#[derive(Debug, Default)]
struct ContentOps {
    shows_text: bool,
    inline_image: bool,
}

fn scan_operators(data: &[u8]) -> ContentOps {
    let mut ops = ContentOps::default();
    match Content::decode(data) {
        Ok(content) => {
            for op in &content.operations {
                mark(&mut ops, op.operator.as_str());
            }
            // Inline image data is not always surfaced as operations.
            ops.inline_image |= raw_tokens(data).any(|t| t == "BI");
        }
        // Fall back to a token scan when the stream does not decode cleanly.
        Err(_) => {
            for token in raw_tokens(data) {
                mark(&mut ops, token);
            }
        }
    }
    ops
}

fn raw_tokens(data: &[u8]) -> impl Iterator<Item = &str> {
    data.split(|b| b.is_ascii_whitespace())
        .filter_map(|t| std::str::from_utf8(t).ok())
}

fn mark(ops: &mut ContentOps, operator: &str) {
    match operator {
        "Tj" | "TJ" | "'" | "\"" => ops.shows_text = true,
        "BI" | "ID" => ops.inline_image = true,
        _ => {}
    }
}

/// Page resources, inherited from the page tree when the page has none.
fn page_resources(doc: &Document, page_id: ObjectId) -> Option<&Dictionary> {
    let mut node = doc.get_dictionary(page_id).ok()?;
    // Bounded walk; malformed trees can loop.
    for _ in 0..32 {
        if let Some(res) = node.get(b"Resources").ok().and_then(|o| resolve_dict(doc, o)) {
            return Some(res);
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_dictionary(parent).ok()?;
    }
    None
}

fn has_image_xobject(doc: &Document, resources: &Dictionary) -> bool {
    let Some(xobjects) = resources.get(b"XObject").ok().and_then(|o| resolve_dict(doc, o)) else {
        return false;
    };
    xobjects.iter().any(|(_, obj)| {
        let dict = match obj {
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(Object::Stream(s)) => &s.dict,
                _ => return false,
            },
            Object::Stream(s) => &s.dict,
            _ => return false,
        };
        matches!(dict.get(b"Subtype"), Ok(Object::Name(name)) if name == b"Image")
    })
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match obj {
        Object::Dictionary(d) => Some(d),
        Object::Reference(id) => match doc.get_object(*id).ok()? {
            Object::Dictionary(d) => Some(d),
            _ => None,
        },
        _ => None,
    }
}
