//! XHTML → PDF renderer: the last resort of the `word-to-pdf` chain.
//!
//! The document is reduced to headings, paragraphs, list items and page
//! breaks and laid out with the standard Helvetica fonts. Tables, images,
//! columns and run formatting do not survive. The output is readable but
//! visibly plainer than a native office export, and that is accepted as a
//! degraded-but-available result.

use crate::error::StrategyError;
use crate::pipeline::pdf::{self, TextBlock, TextStyle};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::path::Path;
use tracing::debug;

/// Parse the XHTML produced by [`crate::pipeline::docx::docx_to_xhtml`]
/// (or any simple XHTML) into layout blocks.
pub fn xhtml_to_blocks(xhtml: &str) -> Result<Vec<TextBlock>, StrategyError> {
    const NAME: &str = "html-parse";

    let mut reader = Reader::from_str(xhtml);
    reader.trim_text(false);
    let mut buf = Vec::new();

    let mut blocks = Vec::new();
    let mut current: Option<(TextStyle, String)> = None;
    let mut list_item = false;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| StrategyError::failed(NAME, e))?;
        match event {
            Event::Start(e) => {
                let name = e.name();
                match name.as_ref() {
                    b"h1" | b"h2" | b"h3" | b"h4" | b"h5" | b"h6" => {
                        let level = name.as_ref()[1] - b'0';
                        current = Some((TextStyle::heading(level), String::new()));
                    }
                    b"p" | b"div" => current = Some((TextStyle::BODY, String::new())),
                    b"li" => {
                        list_item = true;
                        current = Some((TextStyle::BODY, String::from("\u{2022} ")));
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => match e.name().as_ref() {
                b"hr" => {
                    let page_break = e
                        .attributes()
                        .filter_map(Result::ok)
                        .any(|a| a.key.as_ref() == b"class" && a.value.as_ref() == b"page-break");
                    if page_break {
                        blocks.push(TextBlock::PageBreak);
                    }
                }
                b"br" => {
                    if let Some((_, text)) = current.as_mut() {
                        text.push(' ');
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if let Some((_, text)) = current.as_mut() {
                    let unescaped = t.unescape().map_err(|e| StrategyError::failed(NAME, e))?;
                    text.push_str(&unescaped);
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"h1" | b"h2" | b"h3" | b"h4" | b"h5" | b"h6" | b"p" | b"div" | b"li" => {
                    if let Some((style, text)) = current.take() {
                        let bullet_only = list_item && text.trim() == "\u{2022}";
                        if !text.trim().is_empty() && !bullet_only {
                            blocks.push(TextBlock::Paragraph { text, style });
                        }
                    }
                    list_item = false;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(blocks)
}

/// Render XHTML to a PDF at `output`. Returns the page count.
pub fn render_xhtml_pdf(xhtml: &str, output: &Path) -> Result<usize, StrategyError> {
    let blocks = xhtml_to_blocks(xhtml)?;
    debug!("HTML render: {} blocks", blocks.len());
    pdf::write_text_pdf(&blocks, output)
}
