//! Conversion building blocks used by the strategy chains.
//!
//! Each submodule implements one family of transformations. Strategies in
//! [`crate::chain`] compose them; none of them knows about chains, storage
//! naming or retention.
//!
//! ## Data Flow
//!
//! ```text
//! stored inputs ──▶ input (magic bytes) ──▶ strategy ──▶ attempt dir ──▶ commit
//!                                             │
//!               office · pdfium · pdf · docx · html · image
//! ```
//!
//! 1. [`input`]:  content sniffing before any strategy runs
//! 2. [`office`]: LibreOffice / unoconv child processes; async, lane-serialised
//! 3. [`pdfium`]: pdfium text extraction and page rendering; blocking
//! 4. [`pdf`]:    lopdf merge, text extraction and PDF writing
//! 5. [`docx`]:   DOCX reading (to XHTML) and writing (docx-rs)
//! 6. [`html`]:   XHTML → PDF layout, last resort for `word-to-pdf`
//! 7. [`image`]:  decode, transcode, compress, crop, image → PDF

pub mod docx;
pub mod html;
pub mod image;
pub mod input;
pub mod office;
pub mod pdf;
pub mod pdfium;
