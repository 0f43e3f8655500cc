//! Input validation: check stored inputs look like what the kind expects
//! before any strategy is attempted.
//!
//! Strategies would fail on bad input anyway, but only after spawning office
//! processes or decoding whole images, and the caller would see a server
//! error for what is really a bad upload. Checking magic bytes up front
//! turns that into [`ConvertError::InvalidInput`].

use crate::error::ConvertError;
use crate::kind::{ConversionKind, InputFamily};
use crate::storage::StoredFile;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const PDF_MAGIC: &[u8] = b"%PDF";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Bytes read from each file; enough for every signature `image` sniffs.
const SNIFF_LEN: usize = 64;

/// Validate every input of a request for `kind`.
pub fn validate_inputs(kind: ConversionKind, inputs: &[StoredFile]) -> Result<(), ConvertError> {
    for input in inputs {
        validate_one(kind.input_family(), input)?;
    }
    Ok(())
}

fn validate_one(family: InputFamily, input: &StoredFile) -> Result<(), ConvertError> {
    let head = read_head(&input.path)?;
    let ok = match family {
        InputFamily::Pdf => head.starts_with(PDF_MAGIC),
        InputFamily::Docx => head.starts_with(ZIP_MAGIC),
        InputFamily::Image => image::guess_format(&head).is_ok(),
    };
    if !ok {
        return Err(ConvertError::InvalidInput {
            name: input.original_name.clone(),
            expected: expected_label(family),
        });
    }
    debug!("Input {} passed {:?} check", input.path.display(), family);
    Ok(())
}

fn expected_label(family: InputFamily) -> &'static str {
    match family {
        InputFamily::Pdf => "PDF document",
        InputFamily::Docx => "Word (.docx) document",
        InputFamily::Image => "image",
    }
}

fn read_head(path: &Path) -> Result<Vec<u8>, ConvertError> {
    let file = std::fs::File::open(path).map_err(|e| ConvertError::storage(path, e))?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64)
        .read_to_end(&mut head)
        .map_err(|e| ConvertError::storage(path, e))?;
    Ok(head)
}
