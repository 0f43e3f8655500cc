//! pdfium-backed PDF → DOCX: text per page, with a rendering of any page
//! that has no text layer (scans, vector drawings).
//!
//! pdfium wraps a C++ library with global state; callers run this on the
//! blocking pool. The `thread_safe` feature of `pdfium-render` serialises
//! calls into the library.

use crate::config::PageSelection;
use crate::error::StrategyError;
use crate::pipeline::docx::{self, DocxPage, PageImage};
use image::codecs::png::PngEncoder;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info};

const NAME: &str = "pdfium-text";

/// Longest edge of a page rendering embedded for textless pages.
const RENDER_PIXELS: i32 = 1600;

/// Convert the selected pages of `input` into a DOCX at `output`.
pub fn pdf_to_docx(
    library: &Path,
    input: &Path,
    output: &Path,
    selection: &PageSelection,
) -> Result<(), StrategyError> {
    let pdfium = backend_probe::bind_pdfium(library)
        .map_err(|e| StrategyError::unavailable(NAME, e.to_string()))?;

    let document = pdfium
        .load_pdf_from_file(input, None)
        .map_err(|e| StrategyError::failed(NAME, format!("{:?}", e)))?;

    let pages = document.pages();
    let total = pages.len() as usize;
    let indices = selection.to_indices(total);
    if indices.is_empty() {
        return Err(StrategyError::failed(
            NAME,
            format!("page selection matches none of {total} pages"),
        ));
    }
    info!("pdfium: {} of {} pages selected", indices.len(), total);

    let render_config = PdfRenderConfig::new()
        .set_target_width(RENDER_PIXELS)
        .set_maximum_height(RENDER_PIXELS);

    let mut out = Vec::with_capacity(indices.len());
    for idx in indices {
        let page = pages
            .get(idx as u16)
            .map_err(|e| StrategyError::failed(NAME, format!("page {}: {:?}", idx + 1, e)))?;
        let text = page
            .text()
            .map_err(|e| StrategyError::failed(NAME, format!("page {}: {:?}", idx + 1, e)))?
            .all();

        let mut docx_page = DocxPage::from_text(&text);
        if docx_page.paragraphs.is_empty() {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| StrategyError::failed(NAME, format!("render {}: {:?}", idx + 1, e)))?;
            let image = bitmap.as_image();
            let (width, height) = (image.width(), image.height());
            let mut png = Vec::new();
            image
                .write_with_encoder(PngEncoder::new(&mut png))
                .map_err(|e| StrategyError::failed(NAME, e))?;
            debug!("Page {} has no text; embedding {}x{} render", idx + 1, width, height);
            docx_page.image = Some(PageImage { png, width, height });
        }
        out.push(docx_page);
    }

    docx::write_docx(&out, output, NAME)
}
