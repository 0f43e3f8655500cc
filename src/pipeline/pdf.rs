//! Pure-Rust PDF operations on the `lopdf` object model.
//!
//! - [`merge_documents`]: concatenate page trees, preserving input order
//! - [`write_image_pdf`]: one page sized to a JPEG, embedded as `DCTDecode`
//! - [`write_text_pdf`]: lay out styled text blocks on Letter pages
//! - [`extract_page_texts`]: per-page text for the PDF→DOCX fallback
//!
//! All functions are blocking; callers run them on the blocking pool.

use crate::config::PageSelection;
use crate::error::StrategyError;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Letter size in points.
const PAGE_WIDTH: f32 = 612.0;
const PAGE_HEIGHT: f32 = 792.0;
const MARGIN: f32 = 56.0;

fn failed(strategy: &str, detail: impl ToString) -> StrategyError {
    StrategyError::failed(strategy, detail)
}

fn dict_type(object: &Object) -> Option<&[u8]> {
    object
        .as_dict()
        .ok()
        .and_then(|d| d.get(b"Type").ok())
        .and_then(|t| t.as_name().ok())
}

/// Walk `Parent` links until `key` is found.
fn inherited_attribute(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    // Bounded walk; malformed files can contain Parent cycles.
    for _ in 0..64 {
        let node = doc.get_dictionary(parent?).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

/// Number of pages in a PDF file.
pub fn page_count(path: &Path) -> Result<usize, StrategyError> {
    let doc = Document::load(path).map_err(|e| failed("lopdf", e))?;
    Ok(doc.get_pages().len())
}

/// Concatenate every page of `inputs`, in order, into `output`.
///
/// Returns the number of pages written.
pub fn merge_documents(inputs: &[PathBuf], output: &Path) -> Result<usize, StrategyError> {
    const NAME: &str = "lopdf-merge";

    let mut merged = Document::with_version("1.5");
    let mut next_id = 1;
    let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();

    for path in inputs {
        let mut doc = Document::load(path)
            .map_err(|e| failed(NAME, format!("{}: {}", path.display(), e)))?;
        if doc.is_encrypted() {
            return Err(failed(
                NAME,
                format!("{} is encrypted", path.display()),
            ));
        }

        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        // get_pages is keyed by page number, so this preserves page order.
        for page_id in doc.get_pages().into_values() {
            let mut page = doc
                .get_dictionary(page_id)
                .map_err(|e| failed(NAME, e))?
                .clone();
            for key in INHERITABLE {
                if !page.has(key) {
                    if let Some(value) = inherited_attribute(&doc, &page, key) {
                        page.set(key.to_vec(), value);
                    }
                }
            }
            pages.push((page_id, page));
        }

        debug!("Merging {} ({} objects)", path.display(), doc.objects.len());
        for (id, object) in doc.objects {
            let skip = matches!(
                dict_type(&object),
                Some(b"Catalog" | b"Pages" | b"Page" | b"Outlines" | b"Outline")
            );
            if !skip {
                merged.objects.insert(id, object);
            }
        }
    }

    if pages.is_empty() {
        return Err(failed(NAME, "inputs contain no pages"));
    }

    merged.max_id = next_id - 1;
    let pages_id = merged.new_object_id();
    let catalog_id = merged.new_object_id();

    let kids: Vec<Object> = pages.iter().map(|(id, _)| Object::Reference(*id)).collect();
    let count = pages.len();
    for (id, mut page) in pages {
        page.set("Parent", pages_id);
        merged.objects.insert(id, Object::Dictionary(page));
    }
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count as i64,
        }),
    );
    merged.objects.insert(
        catalog_id,
        Object::Dictionary(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        }),
    );
    merged.trailer.set("Root", catalog_id);
    merged.compress();
    merged
        .save(output)
        .map_err(|e| failed(NAME, format!("write {}: {}", output.display(), e)))?;

    Ok(count)
}

/// Write a single-page PDF showing a baseline JPEG at 72 DPI (1 px = 1 pt).
pub fn write_image_pdf(
    jpeg: Vec<u8>,
    width: u32,
    height: u32,
    output: &Path,
) -> Result<(), StrategyError> {
    const NAME: &str = "image-pdf";

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        jpeg,
    )
    .with_compression(false);
    let image_id = doc.add_object(image);

    let (w, h) = (width as f32, height as f32);
    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![w.into(), 0.into(), 0.into(), h.into(), 0.into(), 0.into()],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().map_err(|e| failed(NAME, e))?,
    ));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), w.into(), h.into()],
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
        "Contents" => content_id,
    });

    finish_document(doc, pages_id, vec![page_id], output, NAME)
}

/// Visual style of a [`TextBlock`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub size: f32,
    pub bold: bool,
    /// Extra space above the block, in points.
    pub space_before: f32,
}

impl TextStyle {
    pub const BODY: TextStyle = TextStyle {
        size: 11.0,
        bold: false,
        space_before: 6.0,
    };

    /// Heading style for levels 1–6.
    pub fn heading(level: u8) -> Self {
        let size = match level {
            1 => 20.0,
            2 => 16.0,
            3 => 14.0,
            _ => 12.0,
        };
        TextStyle {
            size,
            bold: true,
            space_before: size * 0.8,
        }
    }
}

/// One paragraph of the text layout, or a forced page break.
#[derive(Debug, Clone, PartialEq)]
pub enum TextBlock {
    Paragraph { text: String, style: TextStyle },
    PageBreak,
}

impl TextBlock {
    pub fn body(text: impl Into<String>) -> Self {
        TextBlock::Paragraph {
            text: text.into(),
            style: TextStyle::BODY,
        }
    }
}

/// Approximate Helvetica advance width in em units.
fn char_width(c: char) -> f32 {
    match c {
        'i' | 'j' | 'l' | '.' | ',' | ':' | ';' | '\'' | '!' | '|' => 0.28,
        ' ' | 'f' | 't' | 'r' | 'I' | '(' | ')' | '[' | ']' | '-' => 0.33,
        'm' | 'w' | 'M' | 'W' | '@' => 0.83,
        'A'..='Z' => 0.67,
        _ => 0.556,
    }
}

fn text_width(s: &str, size: f32) -> f32 {
    s.chars().map(char_width).sum::<f32>() * size
}

/// Greedy word wrap to `max_width` points. Words longer than a line are split.
fn wrap(text: &str, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let candidate = if line.is_empty() {
            word.to_string()
        } else {
            format!("{line} {word}")
        };
        if text_width(&candidate, size) <= max_width {
            line = candidate;
            continue;
        }
        if !line.is_empty() {
            lines.push(std::mem::take(&mut line));
        }
        let mut chunk = String::new();
        for c in word.chars() {
            if !chunk.is_empty() && text_width(&chunk, size) + char_width(c) * size > max_width {
                lines.push(std::mem::take(&mut chunk));
            }
            chunk.push(c);
        }
        line = chunk;
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Encode for the standard fonts' WinAnsiEncoding. Unmappable characters become `?`.
fn win_ansi(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| match c {
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{20AC}' => 0x80,
            '\t' => b' ',
            c if (c as u32) < 0x20 => b' ',
            c if (c as u32) <= 0xFF => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

/// Lay out `blocks` on Letter pages with Helvetica and write the PDF.
///
/// Returns the number of pages written. An empty document still produces one
/// blank page.
pub fn write_text_pdf(blocks: &[TextBlock], output: &Path) -> Result<usize, StrategyError> {
    const NAME: &str = "text-pdf";

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => regular, "F2" => bold },
    });

    let max_width = PAGE_WIDTH - 2.0 * MARGIN;
    let mut pages: Vec<Vec<Operation>> = vec![Vec::new()];
    let mut y = PAGE_HEIGHT - MARGIN;

    for block in blocks {
        let (text, style) = match block {
            TextBlock::PageBreak => {
                pages.push(Vec::new());
                y = PAGE_HEIGHT - MARGIN;
                continue;
            }
            TextBlock::Paragraph { text, style } => (text, style),
        };
        let leading = style.size * 1.25;
        y -= style.space_before;
        let font = if style.bold { "F2" } else { "F1" };

        for line in wrap(text, style.size, max_width) {
            if y - leading < MARGIN {
                pages.push(Vec::new());
                y = PAGE_HEIGHT - MARGIN;
            }
            y -= leading;
            if let Some(ops) = pages.last_mut() {
                ops.extend([
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec![font.into(), style.size.into()]),
                    Operation::new("Td", vec![MARGIN.into(), y.into()]),
                    Operation::new("Tj", vec![Object::string_literal(win_ansi(&line))]),
                    Operation::new("ET", vec![]),
                ]);
            }
        }
    }

    let mut page_ids = Vec::with_capacity(pages.len());
    for operations in pages {
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().map_err(|e| failed(NAME, e))?,
        ));
        page_ids.push(doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), PAGE_WIDTH.into(), PAGE_HEIGHT.into()],
            "Resources" => resources,
            "Contents" => content_id,
        }));
    }

    let count = page_ids.len();
    finish_document(doc, pages_id, page_ids, output, NAME)?;
    Ok(count)
}

fn finish_document(
    mut doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
    output: &Path,
    strategy: &str,
) -> Result<(), StrategyError> {
    let count = page_ids.len() as i64;
    let kids: Vec<Object> = page_ids.into_iter().map(Object::Reference).collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    doc.save(output)
        .map_err(|e| failed(strategy, format!("write {}: {}", output.display(), e)))?;
    Ok(())
}

/// Extract the text of each selected page, in page order.
pub fn extract_page_texts(
    path: &Path,
    selection: &PageSelection,
) -> Result<Vec<String>, StrategyError> {
    const NAME: &str = "lopdf-text";

    let doc = Document::load(path).map_err(|e| failed(NAME, e))?;
    if doc.is_encrypted() {
        return Err(failed(NAME, "document is encrypted"));
    }
    let total = doc.get_pages().len();
    let indices = selection.to_indices(total);
    if indices.is_empty() {
        return Err(failed(
            NAME,
            format!("page selection matches none of {total} pages"),
        ));
    }

    indices
        .into_iter()
        .map(|idx| {
            doc.extract_text(&[idx as u32 + 1])
                .map_err(|e| failed(NAME, format!("page {}: {}", idx + 1, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_pdf(dir: &Path, name: &str, pages: &[&str]) -> PathBuf {
        let mut blocks = Vec::new();
        for (i, text) in pages.iter().enumerate() {
            if i > 0 {
                blocks.push(TextBlock::PageBreak);
            }
            blocks.push(TextBlock::body(*text));
        }
        let path = dir.join(name);
        write_text_pdf(&blocks, &path).unwrap();
        path
    }

    #[test]
    fn text_pdf_page_breaks_and_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let path = text_pdf(dir.path(), "a.pdf", &["alpha page", "bravo page", "charlie page"]);
        assert_eq!(page_count(&path).unwrap(), 3);

        let texts = extract_page_texts(&path, &PageSelection::Set(vec![3, 1])).unwrap();
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("alpha"), "got {:?}", texts[0]);
        assert!(texts[1].contains("charlie"), "got {:?}", texts[1]);
    }

    #[test]
    fn long_text_flows_onto_new_pages() {
        let dir = tempfile::tempdir().unwrap();
        let para = "lorem ipsum dolor sit amet ".repeat(40);
        let blocks: Vec<TextBlock> = (0..30).map(|_| TextBlock::body(para.clone())).collect();
        let path = dir.path().join("long.pdf");
        let pages = write_text_pdf(&blocks, &path).unwrap();
        assert!(pages > 1);
        assert_eq!(page_count(&path).unwrap(), pages);
    }

    #[test]
    fn merge_preserves_order_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let a = text_pdf(dir.path(), "a.pdf", &["first-a", "second-a"]);
        let b = text_pdf(dir.path(), "b.pdf", &["only-b"]);
        let c = text_pdf(dir.path(), "c.pdf", &["first-c", "second-c", "third-c"]);
        let out = dir.path().join("merged.pdf");

        let n = merge_documents(&[a, b, c], &out).unwrap();
        assert_eq!(n, 6);
        assert_eq!(page_count(&out).unwrap(), 6);

        let texts = extract_page_texts(&out, &PageSelection::All).unwrap();
        let expected = ["first-a", "second-a", "only-b", "first-c", "second-c", "third-c"];
        for (text, want) in texts.iter().zip(expected) {
            assert!(text.contains(want), "expected {want}, got {text:?}");
        }
    }

    #[test]
    fn merge_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.pdf");
        std::fs::write(&bad, b"%PDF-1.4 not really").unwrap();
        let err = merge_documents(&[bad], &dir.path().join("out.pdf")).unwrap_err();
        assert!(!err.is_skip());
    }

    #[test]
    fn empty_selection_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = text_pdf(dir.path(), "a.pdf", &["one"]);
        assert!(extract_page_texts(&path, &PageSelection::Single(5)).is_err());
    }

    #[test]
    fn wrap_respects_width() {
        let lines = wrap(&"word ".repeat(200), 11.0, 300.0);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| text_width(l, 11.0) <= 300.0));
    }

    #[test]
    fn win_ansi_maps_latin1_and_replaces_rest() {
        assert_eq!(win_ansi("café"), vec![b'c', b'a', b'f', 0xE9]);
        assert_eq!(win_ansi("日"), vec![b'?']);
        assert_eq!(win_ansi("\u{2014}"), vec![0x97]);
    }
}
