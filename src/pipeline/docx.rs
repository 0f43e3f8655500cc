//! DOCX reading and writing.
//!
//! Reading walks `word/document.xml` inside the ZIP container with
//! `quick-xml` and emits a small XHTML document: headings, paragraphs,
//! list items, table rows and page breaks. Run-level formatting, images
//! and floating content are dropped; this is the degraded input of the
//! HTML round-trip renderer.
//!
//! Writing uses `docx-rs`: one section per source page, separated by hard
//! page breaks, each holding the page's paragraphs and optionally a page
//! image.

use crate::error::StrategyError;
use docx_rs::{BreakType, Docx, Paragraph, Pic, Run};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};
use zip::ZipArchive;

const DOCUMENT_PART: &str = "word/document.xml";

/// EMU per pixel at 96 DPI.
const EMU_PER_PX: u32 = 9525;
/// Widest picture that fits Letter with 1" margins (6.5"), in pixels at 96 DPI.
const MAX_PICTURE_PX: u32 = 624;

/// Paragraph kinds recognised in `word/document.xml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Paragraph,
    Heading(u8),
    ListItem,
}

/// Map a `w:pStyle` value to a block kind.
fn block_for_style(style: &str) -> Block {
    let lower = style.to_ascii_lowercase();
    if lower == "title" {
        return Block::Heading(1);
    }
    if let Some(level) = lower.strip_prefix("heading") {
        if let Ok(n) = level.trim().parse::<u8>() {
            return Block::Heading(n.clamp(1, 6));
        }
    }
    if lower.contains("list") {
        return Block::ListItem;
    }
    Block::Paragraph
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(Result::ok)
        .find(|a| a.key.as_ref() == name)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn escape(s: &str) -> String {
    quick_xml::escape::escape(s).into_owned()
}

/// Read a DOCX file and return its body as XHTML.
pub fn docx_to_xhtml(path: &Path) -> Result<String, StrategyError> {
    const NAME: &str = "docx-read";

    let file = File::open(path).map_err(|e| StrategyError::failed(NAME, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| StrategyError::failed(NAME, e))?;
    let mut xml = String::new();
    archive
        .by_name(DOCUMENT_PART)
        .map_err(|e| StrategyError::failed(NAME, format!("{DOCUMENT_PART}: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| StrategyError::failed(NAME, e))?;

    document_xml_to_xhtml(&xml).map_err(|e| StrategyError::failed(NAME, e))
}

/// Convert the WordprocessingML body to XHTML.
fn document_xml_to_xhtml(xml: &str) -> Result<String, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(false);

    let mut html = String::from("<html><body>\n");
    let mut buf = Vec::new();

    let mut in_text = false;
    // Inside `w:pPr/w:tabs`, where `w:tab` defines a tab stop, not a tab.
    let mut in_tabs = false;
    let mut block = Block::Paragraph;
    let mut para = String::new();
    let mut in_table = 0usize;
    let mut row: Vec<String> = Vec::new();
    let mut paragraphs = 0usize;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"w:p" => {
                    block = Block::Paragraph;
                    para.clear();
                }
                b"w:t" => in_text = true,
                b"w:tabs" => in_tabs = true,
                b"w:numPr" if matches!(block, Block::Paragraph) => block = Block::ListItem,
                b"w:tbl" => in_table += 1,
                b"w:tr" => row.clear(),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:pStyle" => {
                    if let Some(v) = attr(&e, b"w:val") {
                        block = block_for_style(&v);
                    }
                }
                b"w:numPr" if matches!(block, Block::Paragraph) => block = Block::ListItem,
                b"w:tab" if !in_tabs => para.push('\t'),
                b"w:br" => {
                    if attr(&e, b"w:type").as_deref() == Some("page") {
                        flush_paragraph(&mut html, block, &mut para);
                        html.push_str("<hr class=\"page-break\"/>\n");
                    } else {
                        para.push('\n');
                    }
                }
                b"w:p" => html.push_str("<p></p>\n"),
                _ => {}
            },
            Event::Text(t) if in_text => {
                para.push_str(&t.unescape()?);
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:tabs" => in_tabs = false,
                b"w:p" => {
                    paragraphs += 1;
                    if in_table > 0 {
                        let cell_text = std::mem::take(&mut para);
                        if !cell_text.trim().is_empty() {
                            row.push(cell_text);
                        }
                    } else {
                        flush_paragraph(&mut html, block, &mut para);
                    }
                }
                b"w:tr" => {
                    if !row.is_empty() {
                        html.push_str(&format!("<p>{}</p>\n", escape(&row.join(" | "))));
                    }
                    row.clear();
                }
                b"w:tbl" => in_table = in_table.saturating_sub(1),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    html.push_str("</body></html>\n");
    debug!("DOCX body: {} paragraphs → {} bytes XHTML", paragraphs, html.len());
    Ok(html)
}

fn flush_paragraph(html: &mut String, block: Block, para: &mut String) {
    let text = std::mem::take(para);
    let text = escape(&text);
    match block {
        Block::Heading(n) => html.push_str(&format!("<h{n}>{text}</h{n}>\n")),
        Block::ListItem => html.push_str(&format!("<li>{text}</li>\n")),
        Block::Paragraph => html.push_str(&format!("<p>{text}</p>\n")),
    }
}

/// Content of one output page.
#[derive(Debug, Clone, Default)]
pub struct DocxPage {
    pub paragraphs: Vec<String>,
    /// PNG bytes and pixel size of a rendering of the page.
    pub image: Option<PageImage>,
}

#[derive(Debug, Clone)]
pub struct PageImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl DocxPage {
    /// Split extracted page text into paragraphs on blank lines.
    pub fn from_text(text: &str) -> Self {
        let paragraphs = text
            .split("\n\n")
            .map(|p| p.lines().map(str::trim).collect::<Vec<_>>().join(" "))
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            paragraphs,
            image: None,
        }
    }
}

/// Write `pages` as a DOCX, one hard page break between pages.
pub fn write_docx(pages: &[DocxPage], output: &Path, strategy: &str) -> Result<(), StrategyError> {
    let mut docx = Docx::new();

    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            docx = docx.add_paragraph(
                Paragraph::new().add_run(Run::new().add_break(BreakType::Page)),
            );
        }
        for text in &page.paragraphs {
            docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_text(text)));
        }
        if let Some(img) = &page.image {
            let (w, h) = fit_picture(img.width, img.height);
            let pic = Pic::new(&img.png).size(w * EMU_PER_PX, h * EMU_PER_PX);
            docx = docx.add_paragraph(Paragraph::new().add_run(Run::new().add_image(pic)));
        }
        if page.paragraphs.is_empty() && page.image.is_none() {
            warn!("Page {} has no extractable content", i + 1);
        }
    }

    let file = File::create(output).map_err(|e| StrategyError::failed(strategy, e))?;
    docx.build()
        .pack(file)
        .map_err(|e| StrategyError::failed(strategy, format!("pack docx: {e}")))?;
    Ok(())
}

/// Scale to at most [`MAX_PICTURE_PX`] wide, keeping the aspect ratio.
fn fit_picture(width: u32, height: u32) -> (u32, u32) {
    if width <= MAX_PICTURE_PX || width == 0 {
        return (width, height);
    }
    let h = (height as u64 * MAX_PICTURE_PX as u64 / width as u64) as u32;
    (MAX_PICTURE_PX, h.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("doc.docx");
        let file = File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file(DOCUMENT_PART, zip::write::SimpleFileOptions::default())
            .unwrap();
        write!(
            zip,
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
        )
        .unwrap();
        zip.finish().unwrap();
        path
    }

    #[test]
    fn headings_paragraphs_and_breaks() {
        let dir = tempfile::tempdir().unwrap();
        let path = docx_with_body(
            dir.path(),
            r#"<w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Intro</w:t></w:r></w:p>
               <w:p><w:r><w:t xml:space="preserve">Fish &amp; </w:t></w:r><w:r><w:t>chips</w:t></w:r></w:p>
               <w:p><w:r><w:br w:type="page"/></w:r></w:p>
               <w:p><w:pPr><w:numPr><w:ilvl w:val="0"/><w:numId w:val="3"/></w:numPr></w:pPr><w:r><w:t>item</w:t></w:r></w:p>"#,
        );

        let html = docx_to_xhtml(&path).unwrap();
        assert!(html.contains("<h1>Intro</h1>"), "{html}");
        assert!(html.contains("<p>Fish &amp; chips</p>"), "{html}");
        assert!(html.contains("<hr class=\"page-break\"/>"), "{html}");
        assert!(html.contains("<li>item</li>"), "{html}");
    }

    #[test]
    fn tab_stop_definitions_are_not_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = docx_with_body(
            dir.path(),
            r#"<w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/><w:tab w:val="right" w:pos="9000"/></w:tabs></w:pPr>
                 <w:r><w:t>Name</w:t></w:r><w:r><w:tab/></w:r><w:r><w:t>Total</w:t></w:r></w:p>"#,
        );

        let html = docx_to_xhtml(&path).unwrap();
        assert!(html.contains("<p>Name\tTotal</p>"), "{html}");
    }

    #[test]
    fn table_rows_become_paragraphs() {
        let dir = tempfile::tempdir().unwrap();
        let path = docx_with_body(
            dir.path(),
            r#"<w:tbl><w:tr><w:tc><w:p><w:r><w:t>a</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>b</w:t></w:r></w:p></w:tc></w:tr></w:tbl>"#,
        );
        let html = docx_to_xhtml(&path).unwrap();
        assert!(html.contains("<p>a | b</p>"), "{html}");
    }

    #[test]
    fn not_a_docx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.docx");
        std::fs::write(&path, b"PK\x03\x04 truncated").unwrap();
        assert!(docx_to_xhtml(&path).is_err());
    }

    #[test]
    fn style_mapping() {
        assert_eq!(block_for_style("Heading2"), Block::Heading(2));
        assert_eq!(block_for_style("heading 9"), Block::Heading(6));
        assert_eq!(block_for_style("Title"), Block::Heading(1));
        assert_eq!(block_for_style("ListParagraph"), Block::ListItem);
        assert_eq!(block_for_style("Normal"), Block::Paragraph);
    }

    #[test]
    fn written_docx_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.docx");
        let pages = vec![
            DocxPage::from_text("first para\nwraps here\n\nsecond para"),
            DocxPage::from_text("page two"),
        ];
        write_docx(&pages, &out, "test").unwrap();

        let html = docx_to_xhtml(&out).unwrap();
        assert!(html.contains("first para wraps here"), "{html}");
        assert!(html.contains("second para"), "{html}");
        assert!(html.contains("page-break"), "{html}");
        assert!(html.contains("page two"), "{html}");
    }

    #[test]
    fn pictures_are_scaled_to_page_width() {
        assert_eq!(fit_picture(300, 200), (300, 200));
        assert_eq!(fit_picture(1248, 1000), (624, 500));
    }
}
