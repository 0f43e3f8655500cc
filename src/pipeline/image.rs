//! Image strategies on the `image` crate: format conversion, compression,
//! cropping and image→PDF.
//!
//! ## Colour policy
//!
//! JPEG and PDF targets are always normalised to 8-bit RGB first; palette,
//! greyscale-alpha and 16-bit sources would otherwise be rejected by the
//! encoder or lose their meaning. Other targets keep alpha when the source
//! has it, narrowed to whatever the encoder accepts.

use crate::error::StrategyError;
use crate::kind::TargetFormat;
use crate::pipeline::pdf;
use crate::request::CropBox;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageFormat};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Load an image, sniffing the format from its content.
pub fn decode(path: &Path, strategy: &str) -> Result<(DynamicImage, ImageFormat), StrategyError> {
    let bytes = std::fs::read(path).map_err(|e| StrategyError::failed(strategy, e))?;
    let format = image::guess_format(&bytes)
        .map_err(|e| StrategyError::failed(strategy, format!("unrecognised image: {e}")))?;
    let img = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| StrategyError::failed(strategy, format!("decode {format:?}: {e}")))?;
    debug!(
        "Decoded {} as {:?} {}x{} {:?}",
        path.display(),
        format,
        img.width(),
        img.height(),
        img.color()
    );
    Ok((img, format))
}

/// Convert `img` into a colour type the target encoder accepts.
pub fn normalize_for(img: DynamicImage, target: TargetFormat) -> DynamicImage {
    let has_alpha = img.color().has_alpha();
    match target {
        TargetFormat::Jpeg | TargetFormat::Pdf => DynamicImage::ImageRgb8(img.into_rgb8()),
        TargetFormat::Webp | TargetFormat::Gif | TargetFormat::Bmp => {
            if has_alpha {
                DynamicImage::ImageRgba8(img.into_rgba8())
            } else {
                DynamicImage::ImageRgb8(img.into_rgb8())
            }
        }
        TargetFormat::Png | TargetFormat::Tiff => match img {
            DynamicImage::ImageRgb32F(_) => DynamicImage::ImageRgb16(img.into_rgb16()),
            DynamicImage::ImageRgba32F(_) => DynamicImage::ImageRgba16(img.into_rgba16()),
            // TIFF has no grey+alpha encoder.
            DynamicImage::ImageLumaA8(_) if target == TargetFormat::Tiff => {
                DynamicImage::ImageRgba8(img.into_rgba8())
            }
            DynamicImage::ImageLumaA16(_) if target == TargetFormat::Tiff => {
                DynamicImage::ImageRgba16(img.into_rgba16())
            }
            other => other,
        },
    }
}

/// How hard the encoder should work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effort {
    /// Defaults of each encoder; JPEG at the given quality.
    Standard(u8),
    /// Smallest output: JPEG at the given quality, PNG at best compression,
    /// WebP lossless.
    Compress(u8),
}

fn encode(
    img: &DynamicImage,
    target: TargetFormat,
    effort: Effort,
    output: &Path,
    strategy: &str,
) -> Result<(), StrategyError> {
    let fail = |e: &dyn std::fmt::Display| StrategyError::failed(strategy, e);
    let file = File::create(output).map_err(|e| fail(&e))?;
    let mut w = BufWriter::new(file);

    let result = match (target, effort) {
        (TargetFormat::Jpeg, Effort::Standard(q) | Effort::Compress(q)) => {
            img.write_with_encoder(JpegEncoder::new_with_quality(&mut w, q))
        }
        (TargetFormat::Png, Effort::Compress(_)) => img.write_with_encoder(
            PngEncoder::new_with_quality(&mut w, CompressionType::Best, FilterType::Adaptive),
        ),
        (TargetFormat::Webp, _) => img.write_with_encoder(WebPEncoder::new_lossless(&mut w)),
        (TargetFormat::Pdf, _) => {
            return Err(StrategyError::failed(strategy, "PDF is not an image codec"));
        }
        (other, _) => match other.image_format() {
            Some(format) => img.write_to(&mut w, format),
            None => return Err(StrategyError::failed(strategy, "no encoder")),
        },
    };
    result.map_err(|e| fail(&e))?;
    w.flush().map_err(|e| fail(&e))?;
    Ok(())
}

/// `image-convert`: decode, normalise, encode into `target`.
pub fn transcode(
    input: &Path,
    output: &Path,
    target: TargetFormat,
    jpeg_quality: u8,
) -> Result<(), StrategyError> {
    const NAME: &str = "image-transcode";

    if target == TargetFormat::Pdf {
        return image_to_pdf(input, output, jpeg_quality);
    }
    let (img, _) = decode(input, NAME)?;
    let img = normalize_for(img, target);
    encode(&img, target, Effort::Standard(jpeg_quality), output, NAME)
}

/// `jpg-to-pdf` / `png-to-pdf`: one page sized to the image.
pub fn image_to_pdf(input: &Path, output: &Path, jpeg_quality: u8) -> Result<(), StrategyError> {
    const NAME: &str = "image-pdf";

    let (img, _) = decode(input, NAME)?;
    let rgb = normalize_for(img, TargetFormat::Pdf);
    let (width, height) = (rgb.width(), rgb.height());

    let mut jpeg = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, jpeg_quality))
        .map_err(|e| StrategyError::failed(NAME, e))?;

    pdf::write_image_pdf(jpeg, width, height, output)
}

/// `compress-image`: re-encode in the source format, as small as possible.
///
/// JPEG honours `quality`; PNG and WebP have no quality knob and get a
/// lossless maximum-effort re-encode instead; other formats are re-encoded
/// plainly.
pub fn compress(input: &Path, output: &Path, quality: u8) -> Result<(), StrategyError> {
    const NAME: &str = "image-compress";

    let (img, format) = decode(input, NAME)?;
    let target = TargetFormat::from_image_format(format).ok_or_else(|| {
        StrategyError::failed(NAME, format!("cannot re-encode {format:?}"))
    })?;
    let img = normalize_for(img, target);
    encode(&img, target, Effort::Compress(quality), output, NAME)
}

/// `crop-image`: cut `crop` out and re-encode in the source format.
pub fn crop(
    input: &Path,
    output: &Path,
    crop: CropBox,
    jpeg_quality: u8,
) -> Result<(), StrategyError> {
    const NAME: &str = "image-crop";

    let (img, format) = decode(input, NAME)?;
    if !crop.fits(img.width(), img.height()) {
        return Err(StrategyError::failed(
            NAME,
            format!(
                "crop box {},{},{},{} exceeds {}x{} image",
                crop.left,
                crop.top,
                crop.right,
                crop.bottom,
                img.width(),
                img.height()
            ),
        ));
    }
    let target = TargetFormat::from_image_format(format).ok_or_else(|| {
        StrategyError::failed(NAME, format!("cannot re-encode {format:?}"))
    })?;
    let cropped = img.crop_imm(crop.left, crop.top, crop.width(), crop.height());
    let cropped = normalize_for(cropped, target);
    encode(&cropped, target, Effort::Standard(jpeg_quality), output, NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgb, RgbImage, Rgba, RgbaImage};

    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
        })
    }

    fn write_jpeg(path: &Path, w: u32, h: u32) {
        DynamicImage::ImageRgb8(gradient(w, h))
            .save_with_format(path, ImageFormat::Jpeg)
            .unwrap();
    }

    #[test]
    fn jpeg_to_png_keeps_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.jpg");
        let out = dir.path().join("out.png");
        write_jpeg(&src, 64, 40);

        transcode(&src, &out, TargetFormat::Png, 95).unwrap();

        let bytes = std::fs::read(&out).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), ImageFormat::Png);
        assert_eq!(image::load_from_memory(&bytes).unwrap().dimensions(), (64, 40));
    }

    #[test]
    fn rgba_png_to_jpeg_drops_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.png");
        let out = dir.path().join("out.jpg");
        RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 128]))
            .save_with_format(&src, ImageFormat::Png)
            .unwrap();

        transcode(&src, &out, TargetFormat::Jpeg, 90).unwrap();

        let img = image::open(&out).unwrap();
        assert!(!img.color().has_alpha());
    }

    #[test]
    fn palette_like_greyscale_alpha_to_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.png");
        let out = dir.path().join("out.pdf");
        DynamicImage::ImageLumaA8(image::GrayAlphaImage::from_pixel(
            30,
            20,
            image::LumaA([100, 200]),
        ))
        .save_with_format(&src, ImageFormat::Png)
        .unwrap();

        image_to_pdf(&src, &out, 95).unwrap();
        assert_eq!(pdf::page_count(&out).unwrap(), 1);
    }

    #[test]
    fn jpeg_compression_is_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.jpg");
        write_jpeg(&src, 200, 150);
        let q50 = dir.path().join("q50.jpg");
        let q90 = dir.path().join("q90.jpg");

        compress(&src, &q50, 50).unwrap();
        compress(&src, &q90, 90).unwrap();

        let s50 = std::fs::metadata(&q50).unwrap().len();
        let s90 = std::fs::metadata(&q90).unwrap().len();
        assert!(s50 <= s90, "q50={s50} q90={s90}");
    }

    #[test]
    fn png_compression_is_lossless() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.png");
        let out = dir.path().join("out.png");
        let original = gradient(50, 50);
        original.save_with_format(&src, ImageFormat::Png).unwrap();

        compress(&src, &out, 10).unwrap();

        assert_eq!(image::open(&out).unwrap().into_rgb8(), original);
    }

    #[test]
    fn crop_extracts_region_and_checks_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.png");
        let out = dir.path().join("out.png");
        gradient(40, 30).save_with_format(&src, ImageFormat::Png).unwrap();

        let region = CropBox {
            left: 5,
            top: 5,
            right: 25,
            bottom: 15,
        };
        crop(&src, &out, region, 95).unwrap();
        assert_eq!(image::open(&out).unwrap().dimensions(), (20, 10));

        let too_big = CropBox {
            left: 0,
            top: 0,
            right: 41,
            bottom: 30,
        };
        let err = crop(&src, &out, too_big, 95).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn non_image_fails() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.png");
        std::fs::write(&src, b"not an image").unwrap();
        let err = transcode(&src, &dir.path().join("o.png"), TargetFormat::Png, 95).unwrap_err();
        assert!(matches!(err, StrategyError::Failed { .. }));
    }
}
