//! Conversion-kind tokens and target formats.
//!
//! The token strings are the wire contract with the request handler
//! (`type=merge-pdf`, `format=PNG`, …); everything inside the crate works
//! with the enums.

use crate::error::ConvertError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The requested transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionKind {
    /// Concatenate N ≥ 1 PDFs into one, preserving input order.
    MergePdf,
    PdfToWord,
    WordToPdf,
    JpgToPdf,
    PngToPdf,
    /// Re-encode an image into the `format` parameter.
    ImageConvert,
    /// Re-encode an image at `quality` (default 50).
    CompressImage,
    /// Cut the `crop` rectangle out of an image.
    CropImage,
}

/// What a kind expects its input file(s) to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFamily {
    Pdf,
    Docx,
    Image,
}

impl ConversionKind {
    pub const ALL: [ConversionKind; 8] = [
        ConversionKind::MergePdf,
        ConversionKind::PdfToWord,
        ConversionKind::WordToPdf,
        ConversionKind::JpgToPdf,
        ConversionKind::PngToPdf,
        ConversionKind::ImageConvert,
        ConversionKind::CompressImage,
        ConversionKind::CropImage,
    ];

    pub fn token(self) -> &'static str {
        match self {
            ConversionKind::MergePdf => "merge-pdf",
            ConversionKind::PdfToWord => "pdf-to-word",
            ConversionKind::WordToPdf => "word-to-pdf",
            ConversionKind::JpgToPdf => "jpg-to-pdf",
            ConversionKind::PngToPdf => "png-to-pdf",
            ConversionKind::ImageConvert => "image-convert",
            ConversionKind::CompressImage => "compress-image",
            ConversionKind::CropImage => "crop-image",
        }
    }

    /// Only `merge-pdf` takes more than one file.
    pub fn accepts_multiple(self) -> bool {
        self == ConversionKind::MergePdf
    }

    pub fn input_family(self) -> InputFamily {
        match self {
            ConversionKind::MergePdf | ConversionKind::PdfToWord => InputFamily::Pdf,
            ConversionKind::WordToPdf => InputFamily::Docx,
            ConversionKind::JpgToPdf
            | ConversionKind::PngToPdf
            | ConversionKind::ImageConvert
            | ConversionKind::CompressImage
            | ConversionKind::CropImage => InputFamily::Image,
        }
    }

    /// Fixed output extension, or `None` when it depends on the request
    /// (`image-convert` follows `format`; compress/crop keep the input's).
    pub fn fixed_extension(self) -> Option<&'static str> {
        match self {
            ConversionKind::MergePdf
            | ConversionKind::WordToPdf
            | ConversionKind::JpgToPdf
            | ConversionKind::PngToPdf => Some("pdf"),
            ConversionKind::PdfToWord => Some("docx"),
            ConversionKind::ImageConvert
            | ConversionKind::CompressImage
            | ConversionKind::CropImage => None,
        }
    }
}

impl fmt::Display for ConversionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for ConversionKind {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        ConversionKind::ALL
            .into_iter()
            .find(|k| k.token() == token)
            .ok_or_else(|| ConvertError::UnsupportedConversionKind {
                token: token.to_string(),
            })
    }
}

/// Target of `image-convert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetFormat {
    Jpeg,
    Png,
    Webp,
    Bmp,
    Gif,
    Tiff,
    /// Single-page PDF wrapping the image.
    Pdf,
}

impl TargetFormat {
    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Jpeg => "jpg",
            TargetFormat::Png => "png",
            TargetFormat::Webp => "webp",
            TargetFormat::Bmp => "bmp",
            TargetFormat::Gif => "gif",
            TargetFormat::Tiff => "tiff",
            TargetFormat::Pdf => "pdf",
        }
    }

    /// The `image` codec, or `None` for PDF which has its own writer.
    pub fn image_format(self) -> Option<image::ImageFormat> {
        match self {
            TargetFormat::Jpeg => Some(image::ImageFormat::Jpeg),
            TargetFormat::Png => Some(image::ImageFormat::Png),
            TargetFormat::Webp => Some(image::ImageFormat::WebP),
            TargetFormat::Bmp => Some(image::ImageFormat::Bmp),
            TargetFormat::Gif => Some(image::ImageFormat::Gif),
            TargetFormat::Tiff => Some(image::ImageFormat::Tiff),
            TargetFormat::Pdf => None,
        }
    }

    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(TargetFormat::Jpeg),
            image::ImageFormat::Png => Some(TargetFormat::Png),
            image::ImageFormat::WebP => Some(TargetFormat::Webp),
            image::ImageFormat::Bmp => Some(TargetFormat::Bmp),
            image::ImageFormat::Gif => Some(TargetFormat::Gif),
            image::ImageFormat::Tiff => Some(TargetFormat::Tiff),
            _ => None,
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.extension().to_uppercase())
    }
}

impl FromStr for TargetFormat {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "JPG" | "JPEG" => Ok(TargetFormat::Jpeg),
            "PNG" => Ok(TargetFormat::Png),
            "WEBP" => Ok(TargetFormat::Webp),
            "BMP" => Ok(TargetFormat::Bmp),
            "GIF" => Ok(TargetFormat::Gif),
            "TIF" | "TIFF" => Ok(TargetFormat::Tiff),
            "PDF" => Ok(TargetFormat::Pdf),
            _ => Err(ConvertError::InvalidParameter {
                name: "format",
                value: s.to_string(),
                reason: "expected one of JPG, PNG, WEBP, BMP, GIF, TIFF, PDF".into(),
            }),
        }
    }
}
