//! Request-side types: raw uploads, validated parameters and the immutable
//! [`ConversionRequest`] handed to the Dispatcher.

use crate::config::PageSelection;
use crate::error::ConvertError;
use crate::kind::{ConversionKind, TargetFormat};
use crate::storage::{RequestId, StoredFile};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// One uploaded file as received by the request handler.
#[derive(Clone)]
pub struct Upload {
    /// Client-supplied file name, unsanitised.
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a local file, keeping its base name as the upload name.
    pub async fn from_path(path: &Path) -> Result<Self, ConvertError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ConvertError::storage(path, e))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { filename, bytes })
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Upload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upload")
            .field("filename", &self.filename)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// Form fields exactly as the request handler received them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawParams {
    pub format: Option<String>,
    pub quality: Option<String>,
    pub pages: Option<String>,
    pub crop: Option<String>,
}

/// Rectangle cut out by `crop-image`, in pixels. `right`/`bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropBox {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    /// Whether the box lies within an image of the given size.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.right <= width && self.bottom <= height
    }
}

impl FromStr for CropBox {
    type Err = ConvertError;

    /// Parse `left,top,right,bottom`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConvertError::InvalidParameter {
            name: "crop",
            value: s.to_string(),
            reason: reason.to_string(),
        };
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid("expected four non-negative integers"))?;
        let [left, top, right, bottom] = parts[..] else {
            return Err(invalid("expected left,top,right,bottom"));
        };
        if right <= left || bottom <= top {
            return Err(invalid("box has zero or negative area"));
        }
        Ok(Self {
            left,
            top,
            right,
            bottom,
        })
    }
}

/// Validated, typed parameters for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionParams {
    /// Target of `image-convert`.
    pub format: Option<TargetFormat>,
    /// Lossy quality 1–100 for `compress-image`.
    pub quality: Option<u8>,
    /// Pages honoured by `pdf-to-word`.
    pub pages: PageSelection,
    /// Rectangle for `crop-image`.
    pub crop: Option<CropBox>,
}

impl ConversionParams {
    pub fn with_format(mut self, format: TargetFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_pages(mut self, pages: PageSelection) -> Self {
        self.pages = pages;
        self
    }

    pub fn with_crop(mut self, crop: CropBox) -> Self {
        self.crop = Some(crop);
        self
    }

    /// Parse the raw form fields and check what `kind` requires.
    ///
    /// Parameters a kind does not use are ignored rather than rejected, so a
    /// stray `quality` on `merge-pdf` is harmless.
    pub fn parse(kind: ConversionKind, raw: &RawParams) -> Result<Self, ConvertError> {
        let non_empty = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let mut params = ConversionParams::default();

        if kind == ConversionKind::ImageConvert {
            if let Some(f) = non_empty(&raw.format) {
                params.format = Some(f.parse()?);
            }
        }

        if kind == ConversionKind::CompressImage {
            if let Some(q) = non_empty(&raw.quality) {
                params.quality = Some(parse_quality(&q)?);
            }
        }

        if kind == ConversionKind::PdfToWord {
            if let Some(p) = non_empty(&raw.pages) {
                params.pages = p.parse()?;
            }
        }

        if kind == ConversionKind::CropImage {
            if let Some(c) = non_empty(&raw.crop) {
                params.crop = Some(c.parse()?);
            }
        }

        params.validate_for(kind)?;
        Ok(params)
    }

    /// Check that every parameter `kind` requires is present and in range.
    pub fn validate_for(&self, kind: ConversionKind) -> Result<(), ConvertError> {
        match kind {
            ConversionKind::ImageConvert if self.format.is_none() => {
                Err(ConvertError::MissingParameter {
                    kind,
                    name: "format",
                })
            }
            ConversionKind::CropImage if self.crop.is_none() => {
                Err(ConvertError::MissingParameter { kind, name: "crop" })
            }
            _ => match self.quality {
                Some(q) if !(1..=100).contains(&q) => Err(ConvertError::InvalidParameter {
                    name: "quality",
                    value: q.to_string(),
                    reason: "must be between 1 and 100".into(),
                }),
                _ => Ok(()),
            },
        }
    }
}

fn parse_quality(s: &str) -> Result<u8, ConvertError> {
    let invalid = |reason: &str| ConvertError::InvalidParameter {
        name: "quality",
        value: s.to_string(),
        reason: reason.to_string(),
    };
    let q: u32 = s.parse().map_err(|_| invalid("not an integer"))?;
    if !(1..=100).contains(&q) {
        return Err(invalid("must be between 1 and 100"));
    }
    Ok(q as u8)
}

/// A validated request, immutable once constructed.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    id: RequestId,
    kind: ConversionKind,
    inputs: Vec<StoredFile>,
    params: ConversionParams,
}

impl ConversionRequest {
    pub fn new(
        id: RequestId,
        kind: ConversionKind,
        inputs: Vec<StoredFile>,
        params: ConversionParams,
    ) -> Self {
        Self {
            id,
            kind,
            inputs,
            params,
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn kind(&self) -> ConversionKind {
        self.kind
    }

    pub fn inputs(&self) -> &[StoredFile] {
        &self.inputs
    }

    pub fn params(&self) -> &ConversionParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawParams {
        RawParams::default()
    }

    #[test]
    fn image_convert_requires_format() {
        let err = ConversionParams::parse(ConversionKind::ImageConvert, &raw()).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::MissingParameter { name: "format", .. }
        ));

        let p = ConversionParams::parse(
            ConversionKind::ImageConvert,
            &RawParams {
                format: Some("png".into()),
                ..raw()
            },
        )
        .unwrap();
        assert_eq!(p.format, Some(TargetFormat::Png));
    }

    #[test]
    fn compress_quality_is_optional_and_bounded() {
        let p = ConversionParams::parse(ConversionKind::CompressImage, &raw()).unwrap();
        assert_eq!(p.quality, None);

        for bad in ["0", "101", "high", "-5"] {
            let err = ConversionParams::parse(
                ConversionKind::CompressImage,
                &RawParams {
                    quality: Some(bad.into()),
                    ..raw()
                },
            )
            .unwrap_err();
            assert!(
                matches!(err, ConvertError::InvalidParameter { name: "quality", .. }),
                "{bad} → {err}"
            );
        }
    }

    #[test]
    fn unrelated_params_are_ignored() {
        let p = ConversionParams::parse(
            ConversionKind::MergePdf,
            &RawParams {
                quality: Some("abc".into()),
                format: Some("heic".into()),
                ..raw()
            },
        )
        .unwrap();
        assert_eq!(p, ConversionParams::default());
    }

    #[test]
    fn crop_box_parsing() {
        let c: CropBox = "10, 20, 110, 70".parse().unwrap();
        assert_eq!((c.width(), c.height()), (100, 50));
        assert!(c.fits(110, 70));
        assert!(!c.fits(109, 70));

        assert!("10,20,5,70".parse::<CropBox>().is_err());
        assert!("1,2,3".parse::<CropBox>().is_err());
        assert!("a,b,c,d".parse::<CropBox>().is_err());
    }

    #[test]
    fn crop_image_requires_crop() {
        let err = ConversionParams::parse(ConversionKind::CropImage, &raw()).unwrap_err();
        assert!(matches!(err, ConvertError::MissingParameter { name: "crop", .. }));
    }

    #[test]
    fn upload_debug_hides_bytes() {
        let u = Upload::new("a.pdf", vec![0u8; 2048]);
        let dbg = format!("{u:?}");
        assert!(dbg.contains("2048 bytes"));
        assert!(!dbg.contains("0, 0"));
    }
}
